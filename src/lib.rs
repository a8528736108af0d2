#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Batch
//!
//! Batch job execution runtime: declarative jobs made of steps, flows, splits
//! and decisions, driven to a terminal status with durable checkpoints.
//!
//! ## Overview
//!
//! A job definition is a tree of elements. Steps either run a single
//! batchlet or a chunk loop (read, process, write) that commits in
//! checkpoint intervals and resumes from the last checkpoint after a restart.
//! Steps may be partitioned and run in parallel. Flows run elements in
//! sequence, splits run flows concurrently and decisions pick the next
//! element from a decider's exit status.
//!
//! ## Key Features
//!
//! - **Chunk processing** with item-count, time-limit or custom checkpoints
//! - **Skip, retry and rollback** driven by exception class filters and limits
//! - **Partitioned steps** with throttling, collectors, analyzers and reducers
//! - **Transitions** (`next`, `end`, `fail`, `stop`) with glob exit-status patterns
//! - **Restart** from the recorded restart position, reusing checkpoints
//! - **Stop** requests that reach chunk loops and running batchlets
//!
//! ## Module Organization
//!
//! - [`engine`] - Launch, restart and stop job executions
//! - [`definition`] - Job element graph
//! - [`artifacts`] - Reader/processor/writer/listener/... traits and the factory seam
//! - [`runtime`] - Job, composite, step, chunk, batchlet and partition runners
//! - [`repository`] - Persistence seam and the in-memory repository
//! - [`transaction`] - Transaction seam and the in-process manager
//! - [`models`] - Execution records and metrics
//! - [`state_machine`] - Batch, item and chunk states
//! - [`config`] - Engine configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasker_batch::artifacts::{ArtifactRegistry, ArtifactResult, Batchlet};
//! use tasker_batch::definition::{Job, JobElement, Properties, RefArtifact, Step};
//! use tasker_batch::engine::BatchEngine;
//! use tasker_batch::repository::InMemoryJobRepository;
//!
//! struct Hello;
//!
//! #[async_trait::async_trait]
//! impl Batchlet for Hello {
//!     async fn process(&self) -> ArtifactResult<Option<String>> {
//!         Ok(Some("SAID_HELLO".to_string()))
//!     }
//!     async fn stop(&self) -> ArtifactResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> tasker_batch::BatchResult<()> {
//! let registry = ArtifactRegistry::new();
//! registry.register_batchlet("hello", |_| Ok(Hello));
//!
//! let job = Job::new("greeting").with_element(JobElement::Step(
//!     Step::new("say-hello").with_batchlet(RefArtifact::new("hello")),
//! ));
//!
//! let engine = BatchEngine::new(Arc::new(InMemoryJobRepository::new()), Arc::new(registry));
//! let execution = engine.start(job, Properties::new()).await?.wait().await?;
//! assert_eq!(execution.status, tasker_batch::BatchStatus::Completed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod artifacts;
pub mod config;
pub mod constants;
pub mod definition;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod repository;
pub mod runtime;
pub mod state_machine;
pub mod transaction;

pub use artifacts::{ArtifactError, ArtifactFactory, ArtifactRegistry, ArtifactResult, Item};
pub use config::{ConfigManager, EngineConfig};
pub use definition::{Job, JobElement, Properties, RefArtifact, Step};
pub use engine::{BatchEngine, JobHandle};
pub use error::{BatchError, BatchResult};
pub use models::{JobExecution, PartitionExecution, StepExecution, StepMetrics};
pub use repository::{InMemoryJobRepository, JobRepository};
pub use state_machine::BatchStatus;
