//! # Job Repository
//!
//! Persistence seam for job instances and job/step/partition executions.
//!
//! ## Overview
//!
//! The runtime works on its own copies of execution records and writes them
//! back through this trait at defined points. Implementations must tolerate
//! concurrent use by the partitions of one job execution, and must expect an
//! external stop to flip stored statuses to `stopping` at any moment, which is
//! why checkpoint writes go through the `*_if_not_stopping` variants.
//!
//! [`InMemoryJobRepository`] is the bundled implementation. It is an ordinary
//! value: create as many isolated instances as needed.

pub mod in_memory;

use async_trait::async_trait;

use crate::definition::Properties;
use crate::error::BatchResult;
use crate::models::{JobExecution, JobInstance, PartitionExecution, StepExecution};

pub use in_memory::InMemoryJobRepository;

/// Which parts of a job execution an update writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobExecutionUpdate {
    /// Status, exit status and timestamps
    Partial,
    /// Everything except job parameters
    Full,
    /// Everything including job parameters
    FullWithParameters,
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job_instance(&self, job_name: &str) -> BatchResult<JobInstance>;

    async fn get_job_instance(&self, instance_id: i64) -> BatchResult<Option<JobInstance>>;

    /// Persist a new execution of `instance`, assigning its id
    async fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: Properties,
    ) -> BatchResult<JobExecution>;

    async fn get_job_execution(&self, execution_id: i64) -> BatchResult<Option<JobExecution>>;

    /// All executions of an instance, oldest first
    async fn get_job_executions(&self, instance_id: i64) -> BatchResult<Vec<JobExecution>>;

    async fn update_job_execution(
        &self,
        execution: &JobExecution,
        mode: JobExecutionUpdate,
    ) -> BatchResult<()>;

    /// Ids of executions of `job_name` that have not reached a terminal status
    async fn get_running_executions(&self, job_name: &str) -> BatchResult<Vec<i64>>;

    /// Mark a running execution and its running steps and partitions `stopping`.
    /// Returns `false` when the execution was not running.
    async fn stop_job_execution(&self, execution_id: i64) -> BatchResult<bool>;

    /// Persist a new step execution, returning it with its assigned id
    async fn add_step_execution(&self, step: &StepExecution) -> BatchResult<StepExecution>;

    async fn update_step_execution(&self, step: &StepExecution) -> BatchResult<()>;

    /// Write unless the stored record was marked `stopping`; returns whether it applied
    async fn save_step_execution_if_not_stopping(&self, step: &StepExecution) -> BatchResult<bool>;

    async fn get_step_executions(&self, job_execution_id: i64) -> BatchResult<Vec<StepExecution>>;

    /// Most recent execution of `step_name` in an earlier execution of the instance
    async fn find_original_step_execution_for_restart(
        &self,
        step_name: &str,
        instance_id: i64,
        current_job_execution_id: i64,
    ) -> BatchResult<Option<StepExecution>>;

    /// How many times `step_name` was started across all executions of the instance
    async fn count_step_start_times(&self, step_name: &str, instance_id: i64) -> BatchResult<u32>;

    async fn add_partition_execution(&self, partition: &PartitionExecution) -> BatchResult<()>;

    async fn update_partition_execution(&self, partition: &PartitionExecution) -> BatchResult<()>;

    async fn save_partition_execution_if_not_stopping(
        &self,
        partition: &PartitionExecution,
    ) -> BatchResult<bool>;

    /// Partitions of a step execution ordered by index, optionally only those not completed
    async fn get_partition_executions(
        &self,
        step_execution_id: i64,
        not_completed_only: bool,
    ) -> BatchResult<Vec<PartitionExecution>>;
}
