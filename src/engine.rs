//! # Batch Engine
//!
//! Entry point for launching, restarting and stopping job executions.
//!
//! ## Overview
//!
//! [`BatchEngine`] wires a [`JobRepository`], an [`ArtifactFactory`] and a
//! [`TransactionManager`] together and runs every job execution as its own
//! tokio task. Running executions are tracked so that [`BatchEngine::stop`]
//! can reach their stop token and running batchlets.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasker_batch::artifacts::ArtifactRegistry;
//! use tasker_batch::definition::{Job, Properties};
//! use tasker_batch::engine::BatchEngine;
//! use tasker_batch::repository::InMemoryJobRepository;
//!
//! # async fn example(job: Job) -> tasker_batch::BatchResult<()> {
//! let engine = BatchEngine::new(
//!     Arc::new(InMemoryJobRepository::new()),
//!     Arc::new(ArtifactRegistry::new()),
//! );
//! let handle = engine.start(job, Properties::new()).await?;
//! let execution = handle.wait().await?;
//! println!("{} finished {}", execution.job_name, execution.status);
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::artifacts::ArtifactFactory;
use crate::config::EngineConfig;
use crate::definition::{Job, Properties};
use crate::error::{BatchError, BatchResult};
use crate::models::{JobExecution, RestartPosition, StepExecution};
use crate::repository::JobRepository;
use crate::runtime::{run_job, JobContext};
use crate::state_machine::BatchStatus;
use crate::transaction::{LocalTransactionManager, TransactionManager};

pub struct BatchEngine {
    repository: Arc<dyn JobRepository>,
    factory: Arc<dyn ArtifactFactory>,
    transactions: Arc<dyn TransactionManager>,
    config: Arc<EngineConfig>,
    running: Arc<DashMap<i64, Arc<JobContext>>>,
}

impl std::fmt::Debug for BatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("config", &self.config)
            .field("running", &self.running.len())
            .finish()
    }
}

impl BatchEngine {
    pub fn new(repository: Arc<dyn JobRepository>, factory: Arc<dyn ArtifactFactory>) -> Self {
        Self {
            repository,
            factory,
            transactions: Arc::new(LocalTransactionManager::new()),
            config: Arc::new(EngineConfig::default()),
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn with_transaction_manager(mut self, transactions: Arc<dyn TransactionManager>) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    /// Ids of executions currently running in this engine
    pub fn running_executions(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.running.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Create a new instance of `job` and launch its first execution
    pub async fn start(&self, job: Job, parameters: Properties) -> BatchResult<JobHandle> {
        let instance = self.repository.create_job_instance(&job.id).await?;
        let execution = self
            .repository
            .create_job_execution(&instance, parameters)
            .await?;
        info!(
            job = %job.id,
            instance_id = instance.id,
            execution_id = execution.id,
            "🚀 ENGINE: Starting job"
        );
        Ok(self.launch(Arc::new(job), execution, None))
    }

    /// Launch a new execution of the instance `execution_id` belongs to.
    ///
    /// Only the most recent execution of an instance can be restarted, and
    /// only when it ended failed or stopped and the job is restartable.
    /// `parameters` override the original execution's parameters.
    pub async fn restart(
        &self,
        job: Job,
        execution_id: i64,
        parameters: Properties,
    ) -> BatchResult<JobHandle> {
        let original = self
            .repository
            .get_job_execution(execution_id)
            .await?
            .ok_or(BatchError::JobExecutionNotFound(execution_id))?;

        if original.job_name != job.id {
            return Err(BatchError::InvalidState(format!(
                "Execution {execution_id} belongs to job '{}', not '{}'",
                original.job_name, job.id
            )));
        }
        match original.status {
            BatchStatus::Failed | BatchStatus::Stopped => {}
            status => {
                return Err(BatchError::InvalidState(format!(
                    "Execution {execution_id} is {status} and cannot be restarted"
                )))
            }
        }
        if !job.restartable || original.restart_position == Some(RestartPosition::Unrestartable) {
            return Err(BatchError::InvalidState(format!(
                "Job '{}' is not restartable",
                job.id
            )));
        }

        let history = self
            .repository
            .get_job_executions(original.instance_id)
            .await?;
        if history.iter().any(|execution| execution.id > original.id) {
            return Err(BatchError::InvalidState(format!(
                "Execution {execution_id} is not the most recent execution of its instance"
            )));
        }

        let instance = self
            .repository
            .get_job_instance(original.instance_id)
            .await?
            .ok_or_else(|| {
                BatchError::RepositoryError(format!(
                    "Job instance {} of execution {execution_id} is missing",
                    original.instance_id
                ))
            })?;

        let mut merged = original.parameters.clone();
        merged.extend(parameters);
        let mut execution = self.repository.create_job_execution(&instance, merged).await?;
        execution.restart_position = original.restart_position.clone();

        info!(
            job = %job.id,
            original_execution_id = original.id,
            execution_id = execution.id,
            restart_position = ?execution.restart_position,
            "🔁 ENGINE: Restarting job"
        );
        Ok(self.launch(Arc::new(job), execution, Some(original.id)))
    }

    /// Request a stop of `execution_id`.
    ///
    /// Returns `false` when the execution is neither running in this engine
    /// nor marked running in the repository.
    pub async fn stop(&self, execution_id: i64) -> BatchResult<bool> {
        let marked = self.repository.stop_job_execution(execution_id).await?;
        let context = self
            .running
            .get(&execution_id)
            .map(|entry| Arc::clone(entry.value()));
        match context {
            Some(context) => {
                context.request_stop().await;
                Ok(true)
            }
            None => {
                if !marked {
                    warn!(execution_id, "⚠️ ENGINE: Stop requested for an execution that is not running");
                }
                Ok(marked)
            }
        }
    }

    pub async fn status(&self, execution_id: i64) -> BatchResult<BatchStatus> {
        Ok(self.job_execution(execution_id).await?.status)
    }

    pub async fn job_execution(&self, execution_id: i64) -> BatchResult<JobExecution> {
        self.repository
            .get_job_execution(execution_id)
            .await?
            .ok_or(BatchError::JobExecutionNotFound(execution_id))
    }

    pub async fn step_executions(&self, execution_id: i64) -> BatchResult<Vec<StepExecution>> {
        self.repository.get_step_executions(execution_id).await
    }

    fn launch(&self, job: Arc<Job>, execution: JobExecution, original: Option<i64>) -> JobHandle {
        let context = JobContext::new(
            job,
            execution,
            Arc::clone(&self.repository),
            Arc::clone(&self.factory),
            Arc::clone(&self.transactions),
            Arc::clone(&self.config),
            original,
        );
        let execution_id = context.execution_id();
        self.running.insert(execution_id, Arc::clone(&context));

        let running = Arc::clone(&self.running);
        let task_context = Arc::clone(&context);
        let task = tokio::spawn(async move {
            let result = run_job(task_context).await;
            running.remove(&execution_id);
            result
        });

        JobHandle {
            execution_id,
            context,
            task,
        }
    }
}

/// Handle on a launched job execution
pub struct JobHandle {
    execution_id: i64,
    context: Arc<JobContext>,
    task: JoinHandle<BatchResult<JobExecution>>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("execution_id", &self.execution_id)
            .field("status", &self.context.status())
            .finish()
    }
}

impl JobHandle {
    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    /// Live job status, including `Stopping` once a stop was requested
    pub fn status(&self) -> BatchStatus {
        self.context.status()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop this execution in-process; prefer [`BatchEngine::stop`] to also
    /// mark the repository records
    pub async fn stop(&self) {
        self.context.request_stop().await;
    }

    /// Wait for the execution to reach its terminal status
    pub async fn wait(self) -> BatchResult<JobExecution> {
        self.task.await.map_err(|err| {
            BatchError::OrchestrationError(format!(
                "Job execution {} task did not complete: {err}",
                self.execution_id
            ))
        })?
    }
}
