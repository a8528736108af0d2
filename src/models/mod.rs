//! # Execution Models
//!
//! Job instances, job/step/partition executions and the metrics they carry.

pub mod execution;
pub mod metrics;

pub use execution::{
    CheckpointToken, FailureRecord, JobExecution, JobInstance, OpaqueData, PartitionExecution,
    RestartPosition, StepExecution, StepState,
};
pub use metrics::{MetricType, StepMetrics};
