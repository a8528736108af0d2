//! # Batch Runtime
//!
//! Execution side of the engine: the job runner, composite orchestration,
//! the step runner and the three kinds of step bodies (chunk, batchlet,
//! partitioned).
//!
//! ## Module Organization
//!
//! - `job`: job listeners, element walk, final status and restart position
//! - `composite`: sequential walk of jobs/flows, parallel splits, decisions
//! - `step`: restart skipping, start limits, loopback detection
//! - `chunk`: read-process-write loop with checkpoints, skip and retry
//! - `batchlet`: single invocation with stop forwarding
//! - `partition`: partition dispatch, throttling and aggregation
//! - `transition`: exit-status pattern matching
//! - `context`: shared per-execution state and status scopes

mod batchlet;
pub mod chunk;
mod composite;
pub mod context;
pub mod job;
pub(crate) mod listeners;
pub mod partition;
mod step;
pub mod transition;
mod unit;

pub use chunk::{CheckpointPolicy, ChunkPolicy, SkipRetryPolicy};
pub use context::{JobContext, ScopeKind, ScopeSnapshot, ScopeStack, StatusCell, StopRegistry};
pub use job::run_job;
pub use partition::{consolidate_status, PartitionReport};
pub use transition::{matches_exit_status, resolve_transition, Resolution};
