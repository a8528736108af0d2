//! # Execution Context
//!
//! Shared state of one job execution plus the explicit scope stack used to
//! propagate status changes to enclosing flows, splits and the job.
//!
//! ## Scope Stack
//!
//! Every composite level owns a [`StatusCell`]. Element runners receive the
//! ordered [`ScopeStack`] (outermost first) and change enclosing statuses only
//! through [`ScopeStack::propagate`], [`ScopeStack::mark_flows_ended`] and
//! [`ScopeStack::reset_started`].
//!
//! ## Stop Signal
//!
//! A single [`CancellationToken`] per job execution is observed at every poll
//! point. Running batchlets additionally register in the [`StopRegistry`] so a
//! stop request can call their cooperative `stop()` hook; the returned
//! [`StopGuard`] unregisters on drop.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifacts::{ArtifactContext, ArtifactFactory, Batchlet};
use crate::config::EngineConfig;
use crate::constants::properties;
use crate::definition::{Job, Step};
use crate::models::{JobExecution, RestartPosition};
use crate::repository::JobRepository;
use crate::state_machine::BatchStatus;
use crate::transaction::{LocalTransactionManager, TransactionManager};

/// Which composite level a cell belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Job,
    Flow,
    Split,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSnapshot {
    pub status: BatchStatus,
    pub exit_status: Option<String>,
    pub ended: bool,
}

/// Status, exit status and ended flag of one composite scope
#[derive(Debug)]
pub struct StatusCell {
    kind: ScopeKind,
    name: String,
    state: Mutex<ScopeSnapshot>,
}

impl StatusCell {
    pub fn new(kind: ScopeKind, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            name: name.into(),
            state: Mutex::new(ScopeSnapshot {
                status: BatchStatus::Starting,
                exit_status: None,
                ended: false,
            }),
        })
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> BatchStatus {
        self.state.lock().status
    }

    pub fn set_status(&self, status: BatchStatus) {
        self.state.lock().status = status;
    }

    pub fn exit_status(&self) -> Option<String> {
        self.state.lock().exit_status.clone()
    }

    pub fn set_exit_status(&self, exit_status: impl Into<String>) {
        self.state.lock().exit_status = Some(exit_status.into());
    }

    /// Exit status, falling back to the status name
    pub fn effective_exit_status(&self) -> String {
        let state = self.state.lock();
        state
            .exit_status
            .clone()
            .unwrap_or_else(|| state.status.to_string())
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    pub fn mark_ended(&self) {
        self.state.lock().ended = true;
    }

    pub fn snapshot(&self) -> ScopeSnapshot {
        self.state.lock().clone()
    }
}

/// Enclosing scopes of an element, outermost first
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    cells: Vec<Arc<StatusCell>>,
}

impl ScopeStack {
    pub fn root(cell: Arc<StatusCell>) -> Self {
        Self { cells: vec![cell] }
    }

    /// New stack with `cell` as the innermost scope
    pub fn push(&self, cell: Arc<StatusCell>) -> Self {
        let mut cells = self.cells.clone();
        cells.push(cell);
        Self { cells }
    }

    pub fn cells(&self) -> &[Arc<StatusCell>] {
        &self.cells
    }

    pub fn depth(&self) -> usize {
        self.cells.len()
    }

    pub fn innermost(&self) -> Option<&Arc<StatusCell>> {
        self.cells.last()
    }

    /// Set status (and optionally exit status) on every enclosing scope
    pub fn propagate(&self, status: BatchStatus, exit_status: Option<&str>) {
        for cell in &self.cells {
            cell.set_status(status);
            if let Some(exit_status) = exit_status {
                cell.set_exit_status(exit_status);
            }
        }
    }

    pub fn mark_flows_ended(&self) {
        for cell in self.cells.iter().filter(|c| c.kind() == ScopeKind::Flow) {
            cell.mark_ended();
        }
    }

    /// Undo a failure propagation when a failed step transitions onwards
    pub fn reset_started(&self) {
        for cell in &self.cells {
            cell.set_status(BatchStatus::Started);
        }
    }

    /// No further element may run in this stack
    pub fn should_halt(&self) -> bool {
        self.cells.iter().any(|cell| {
            let state = cell.snapshot();
            state.ended || !matches!(state.status, BatchStatus::Starting | BatchStatus::Started)
        })
    }
}

/// Running batchlets that must hear about a stop request
#[derive(Default)]
pub struct StopRegistry {
    targets: Mutex<Vec<(Uuid, Arc<dyn Batchlet>)>>,
}

impl std::fmt::Debug for StopRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopRegistry")
            .field("registered", &self.len())
            .finish()
    }
}

impl StopRegistry {
    pub fn register(self: &Arc<Self>, target: Arc<dyn Batchlet>) -> StopGuard {
        let id = Uuid::new_v4();
        self.targets.lock().push((id, target));
        StopGuard {
            id,
            registry: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unregister(&self, id: Uuid) {
        self.targets.lock().retain(|(target_id, _)| *target_id != id);
    }

    /// Call `stop()` on every registered target
    pub async fn notify_all(&self) {
        let targets: Vec<Arc<dyn Batchlet>> = self
            .targets
            .lock()
            .iter()
            .map(|(_, target)| Arc::clone(target))
            .collect();
        for target in targets {
            if let Err(err) = target.stop().await {
                warn!(error = %err, "⚠️ STOP: Batchlet stop hook failed");
            }
        }
    }
}

/// Removes its registration when dropped
#[derive(Debug)]
pub struct StopGuard {
    id: Uuid,
    registry: Arc<StopRegistry>,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Shared state of one job execution
pub struct JobContext {
    pub job: Arc<Job>,
    pub repository: Arc<dyn JobRepository>,
    pub factory: Arc<dyn ArtifactFactory>,
    pub transactions: Arc<dyn TransactionManager>,
    pub config: Arc<EngineConfig>,
    /// Job-level artifact scope; step runners derive their own from it
    pub artifacts: ArtifactContext,
    pub stop: CancellationToken,
    pub stop_registry: Arc<StopRegistry>,
    /// Previous execution when this run is a restart
    pub original_execution_id: Option<i64>,
    local_transactions: Arc<LocalTransactionManager>,
    job_cell: Arc<StatusCell>,
    execution: Mutex<JobExecution>,
    executed_steps: Mutex<Vec<String>>,
    restart_position: Mutex<Option<RestartPosition>>,
    current_element: Mutex<Option<String>>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job", &self.job.id)
            .field("execution_id", &self.execution_id())
            .field("status", &self.job_cell.status())
            .finish()
    }
}

impl JobContext {
    pub fn new(
        job: Arc<Job>,
        execution: JobExecution,
        repository: Arc<dyn JobRepository>,
        factory: Arc<dyn ArtifactFactory>,
        transactions: Arc<dyn TransactionManager>,
        config: Arc<EngineConfig>,
        original_execution_id: Option<i64>,
    ) -> Arc<Self> {
        let artifacts = ArtifactContext {
            job_name: job.id.clone(),
            job_execution_id: execution.id,
            job_parameters: execution.parameters.clone(),
            job_properties: job.properties.clone(),
            step: None,
        };
        let job_cell = StatusCell::new(ScopeKind::Job, job.id.clone());
        job_cell.set_status(execution.status);

        Arc::new(Self {
            job,
            repository,
            factory,
            transactions,
            config,
            artifacts,
            stop: CancellationToken::new(),
            stop_registry: Arc::new(StopRegistry::default()),
            original_execution_id,
            local_transactions: Arc::new(LocalTransactionManager::new()),
            job_cell,
            execution: Mutex::new(execution),
            executed_steps: Mutex::new(Vec::new()),
            restart_position: Mutex::new(None),
            current_element: Mutex::new(None),
        })
    }

    pub fn execution_id(&self) -> i64 {
        self.execution.lock().id
    }

    pub fn instance_id(&self) -> i64 {
        self.execution.lock().instance_id
    }

    pub fn execution(&self) -> JobExecution {
        self.execution.lock().clone()
    }

    pub(crate) fn update_execution<F: FnOnce(&mut JobExecution)>(&self, update: F) {
        update(&mut self.execution.lock());
    }

    pub fn job_cell(&self) -> &Arc<StatusCell> {
        &self.job_cell
    }

    pub fn status(&self) -> BatchStatus {
        self.job_cell.status()
    }

    pub fn is_restart(&self) -> bool {
        self.original_execution_id.is_some()
    }

    /// Cancel the token, then notify running batchlets
    pub async fn request_stop(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        self.stop.cancel();
        if self.job_cell.status() == BatchStatus::Started {
            self.job_cell.set_status(BatchStatus::Stopping);
        }
        info!(execution_id = self.execution_id(), "🛑 JOB: Stop requested");
        self.stop_registry.notify_all().await;
    }

    pub fn record_executed(&self, step: &str) {
        self.executed_steps.lock().push(step.to_string());
    }

    pub fn was_executed(&self, step: &str) -> bool {
        self.executed_steps.lock().iter().any(|s| s == step)
    }

    pub fn executed_sequence(&self) -> String {
        self.executed_steps.lock().join(" -> ")
    }

    pub fn set_restart_position(&self, element: impl Into<String>) {
        let element = element.into();
        debug!(element = %element, "Restart position recorded");
        *self.restart_position.lock() = Some(RestartPosition::Element(element));
    }

    pub fn restart_position(&self) -> Option<RestartPosition> {
        self.restart_position.lock().clone()
    }

    pub(crate) fn set_current_element(&self, element: &str) {
        *self.current_element.lock() = Some(element.to_string());
    }

    pub fn current_element(&self) -> Option<String> {
        self.current_element.lock().clone()
    }

    /// Job parameter, then step property, then job property
    pub fn property<'a>(&'a self, step: Option<&'a Step>, name: &str) -> Option<&'a str> {
        self.artifacts
            .job_parameters
            .get(name)
            .or_else(|| step.and_then(|s| s.properties.get(name)))
            .or_else(|| self.job.properties.get(name))
            .map(String::as_str)
    }

    /// `local.transaction=true` routes a step onto an in-process manager
    pub fn transactions_for(&self, step: &Step) -> Arc<dyn TransactionManager> {
        let local = self
            .property(Some(step), properties::LOCAL_TRANSACTION)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if local {
            let manager: Arc<dyn TransactionManager> = self.local_transactions.clone();
            manager
        } else {
            Arc::clone(&self.transactions)
        }
    }
}
