//! In-memory job repository backed by concurrent maps.
//!
//! ```rust
//! use tasker_batch::definition::Properties;
//! use tasker_batch::repository::{InMemoryJobRepository, JobRepository};
//! use tasker_batch::BatchStatus;
//!
//! # tokio_test::block_on(async {
//! let repository = InMemoryJobRepository::new();
//! let instance = repository.create_job_instance("nightly-import").await?;
//! let execution = repository
//!     .create_job_execution(&instance, Properties::new())
//!     .await?;
//!
//! let stored = repository.get_job_execution(execution.id).await?.unwrap();
//! assert_eq!(stored.status, BatchStatus::Starting);
//! assert_eq!(stored.instance_id, instance.id);
//! # Ok::<(), tasker_batch::BatchError>(())
//! # }).unwrap();
//! ```

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use super::{JobExecutionUpdate, JobRepository};
use crate::definition::Properties;
use crate::error::{BatchError, BatchResult};
use crate::models::{JobExecution, JobInstance, PartitionExecution, StepExecution};
use crate::state_machine::BatchStatus;

#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    next_instance_id: AtomicI64,
    next_execution_id: AtomicI64,
    next_step_execution_id: AtomicI64,
    instances: DashMap<i64, JobInstance>,
    executions: DashMap<i64, JobExecution>,
    step_executions: DashMap<i64, StepExecution>,
    partitions: DashMap<(i64, usize), PartitionExecution>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(counter: &AtomicI64) -> i64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn partitions_of(&self, step_execution_id: i64) -> Vec<PartitionExecution> {
        let mut partitions: Vec<PartitionExecution> = self
            .partitions
            .iter()
            .filter(|entry| entry.key().0 == step_execution_id)
            .map(|entry| entry.value().clone())
            .collect();
        partitions.sort_by_key(|p| p.partition_index);
        partitions
    }

    fn with_partitions(&self, mut step: StepExecution) -> StepExecution {
        step.partition_executions = self.partitions_of(step.id);
        step
    }

    fn instance_of(&self, job_execution_id: i64) -> Option<i64> {
        self.executions
            .get(&job_execution_id)
            .map(|execution| execution.instance_id)
    }

    fn store_step(&self, step: &StepExecution) {
        let mut stored = step.clone();
        // partitions are stored on their own
        stored.partition_executions.clear();
        self.step_executions.insert(stored.id, stored);
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create_job_instance(&self, job_name: &str) -> BatchResult<JobInstance> {
        let instance = JobInstance {
            id: Self::next_id(&self.next_instance_id),
            job_name: job_name.to_string(),
            created_at: Utc::now(),
        };
        self.instances.insert(instance.id, instance.clone());
        debug!(instance_id = instance.id, job_name = %job_name, "💾 REPOSITORY: Job instance created");
        Ok(instance)
    }

    async fn get_job_instance(&self, instance_id: i64) -> BatchResult<Option<JobInstance>> {
        Ok(self.instances.get(&instance_id).map(|i| i.clone()))
    }

    async fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: Properties,
    ) -> BatchResult<JobExecution> {
        if !self.instances.contains_key(&instance.id) {
            return Err(BatchError::RepositoryError(format!(
                "job instance {} does not exist",
                instance.id
            )));
        }
        let mut execution = JobExecution::new(instance, parameters);
        execution.id = Self::next_id(&self.next_execution_id);
        self.executions.insert(execution.id, execution.clone());
        debug!(execution_id = execution.id, instance_id = instance.id, "💾 REPOSITORY: Job execution created");
        Ok(execution)
    }

    async fn get_job_execution(&self, execution_id: i64) -> BatchResult<Option<JobExecution>> {
        Ok(self.executions.get(&execution_id).map(|e| e.clone()))
    }

    async fn get_job_executions(&self, instance_id: i64) -> BatchResult<Vec<JobExecution>> {
        let mut executions: Vec<JobExecution> = self
            .executions
            .iter()
            .filter(|entry| entry.instance_id == instance_id)
            .map(|entry| entry.value().clone())
            .collect();
        executions.sort_by_key(|e| e.id);
        Ok(executions)
    }

    async fn update_job_execution(
        &self,
        execution: &JobExecution,
        mode: JobExecutionUpdate,
    ) -> BatchResult<()> {
        let mut stored = self
            .executions
            .get_mut(&execution.id)
            .ok_or(BatchError::JobExecutionNotFound(execution.id))?;

        stored.status = execution.status;
        stored.exit_status = execution.exit_status.clone();
        stored.start_time = execution.start_time;
        stored.end_time = execution.end_time;
        stored.last_updated = Utc::now();

        if matches!(mode, JobExecutionUpdate::Full | JobExecutionUpdate::FullWithParameters) {
            stored.restart_position = execution.restart_position.clone();
            for id in &execution.step_execution_ids {
                if !stored.step_execution_ids.contains(id) {
                    stored.step_execution_ids.push(*id);
                }
            }
        }
        if mode == JobExecutionUpdate::FullWithParameters {
            stored.parameters = execution.parameters.clone();
        }
        Ok(())
    }

    async fn get_running_executions(&self, job_name: &str) -> BatchResult<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .executions
            .iter()
            .filter(|entry| entry.job_name == job_name && entry.status.is_running())
            .map(|entry| entry.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn stop_job_execution(&self, execution_id: i64) -> BatchResult<bool> {
        let step_ids = {
            let mut execution = self
                .executions
                .get_mut(&execution_id)
                .ok_or(BatchError::JobExecutionNotFound(execution_id))?;
            if !execution.status.is_running() {
                return Ok(false);
            }
            execution.status = BatchStatus::Stopping;
            execution.last_updated = Utc::now();
            execution.step_execution_ids.clone()
        };

        for step_id in step_ids {
            if let Some(mut step) = self.step_executions.get_mut(&step_id) {
                if matches!(step.status(), BatchStatus::Starting | BatchStatus::Started) {
                    step.state.force_status(BatchStatus::Stopping);
                }
            }
            for mut partition in self.partitions.iter_mut() {
                if partition.key().0 == step_id
                    && matches!(partition.status(), BatchStatus::Starting | BatchStatus::Started)
                {
                    partition.state.force_status(BatchStatus::Stopping);
                }
            }
        }
        debug!(execution_id = execution_id, "💾 REPOSITORY: Job execution marked stopping");
        Ok(true)
    }

    async fn add_step_execution(&self, step: &StepExecution) -> BatchResult<StepExecution> {
        let mut added = step.clone();
        added.id = Self::next_id(&self.next_step_execution_id);
        {
            let mut execution = self
                .executions
                .get_mut(&step.job_execution_id)
                .ok_or(BatchError::JobExecutionNotFound(step.job_execution_id))?;
            execution.step_execution_ids.push(added.id);
        }
        self.store_step(&added);
        Ok(added)
    }

    async fn update_step_execution(&self, step: &StepExecution) -> BatchResult<()> {
        if !self.step_executions.contains_key(&step.id) {
            return Err(BatchError::RepositoryError(format!(
                "step execution {} does not exist",
                step.id
            )));
        }
        self.store_step(step);
        Ok(())
    }

    async fn save_step_execution_if_not_stopping(&self, step: &StepExecution) -> BatchResult<bool> {
        let stopping = self
            .step_executions
            .get(&step.id)
            .map(|stored| stored.status() == BatchStatus::Stopping)
            .unwrap_or(false);
        if stopping {
            return Ok(false);
        }
        self.update_step_execution(step).await?;
        Ok(true)
    }

    async fn get_step_executions(&self, job_execution_id: i64) -> BatchResult<Vec<StepExecution>> {
        let mut steps: Vec<StepExecution> = self
            .step_executions
            .iter()
            .filter(|entry| entry.job_execution_id == job_execution_id)
            .map(|entry| self.with_partitions(entry.value().clone()))
            .collect();
        steps.sort_by_key(|s| s.id);
        Ok(steps)
    }

    async fn find_original_step_execution_for_restart(
        &self,
        step_name: &str,
        instance_id: i64,
        current_job_execution_id: i64,
    ) -> BatchResult<Option<StepExecution>> {
        let original = self
            .step_executions
            .iter()
            .filter(|entry| {
                entry.step_name == step_name
                    && entry.job_execution_id != current_job_execution_id
                    && self.instance_of(entry.job_execution_id) == Some(instance_id)
            })
            .max_by_key(|entry| entry.id)
            .map(|entry| entry.value().clone());
        Ok(original.map(|step| self.with_partitions(step)))
    }

    async fn count_step_start_times(&self, step_name: &str, instance_id: i64) -> BatchResult<u32> {
        let count = self
            .step_executions
            .iter()
            .filter(|entry| {
                entry.step_name == step_name
                    && self.instance_of(entry.job_execution_id) == Some(instance_id)
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn add_partition_execution(&self, partition: &PartitionExecution) -> BatchResult<()> {
        self.partitions.insert(
            (partition.step_execution_id, partition.partition_index),
            partition.clone(),
        );
        Ok(())
    }

    async fn update_partition_execution(&self, partition: &PartitionExecution) -> BatchResult<()> {
        self.add_partition_execution(partition).await
    }

    async fn save_partition_execution_if_not_stopping(
        &self,
        partition: &PartitionExecution,
    ) -> BatchResult<bool> {
        let key = (partition.step_execution_id, partition.partition_index);
        let stopping = self
            .partitions
            .get(&key)
            .map(|stored| stored.status() == BatchStatus::Stopping)
            .unwrap_or(false);
        if stopping {
            return Ok(false);
        }
        self.partitions.insert(key, partition.clone());
        Ok(true)
    }

    async fn get_partition_executions(
        &self,
        step_execution_id: i64,
        not_completed_only: bool,
    ) -> BatchResult<Vec<PartitionExecution>> {
        let partitions = self.partitions_of(step_execution_id);
        if not_completed_only {
            return Ok(partitions
                .into_iter()
                .filter(|p| p.status() != BatchStatus::Completed)
                .collect());
        }
        Ok(partitions)
    }
}
