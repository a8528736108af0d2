//! # Execution Records
//!
//! Working copies of job, step and partition executions. The repository is the
//! durable owner of record; everything here must be written back explicitly.
//!
//! ## Ownership
//!
//! A [`JobExecution`] owns its step executions (referenced by id), and a
//! [`StepExecution`] owns its [`PartitionExecution`]s. A step execution is
//! either non-partitioned (no partitions) or partitioned (one record per
//! partition), never a mix.
//!
//! ## Status Guard
//!
//! [`StepState::set_status`] refuses to overwrite a terminal status, so once
//! completed, failed, stopped or abandoned is recorded it sticks.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::metrics::StepMetrics;
use crate::definition::Properties;
use crate::state_machine::BatchStatus;

/// Opaque serialized payload crossing the repository boundary.
///
/// Used for reader/writer checkpoint tokens and persistent user data. The
/// runtime never inspects the bytes, it only round-trips them and compares
/// them for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpaqueData(Vec<u8>);

pub type CheckpointToken = OpaqueData;

impl OpaqueData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Convenience for artifacts that keep their position as JSON
    pub fn from_json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_vec(value).map(Self)
    }

    pub fn to_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.0)
    }
}

/// Failure captured on an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: String,
    pub message: String,
}

impl FailureRecord {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Fields shared by step and partition executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    status: BatchStatus,
    pub exit_status: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub metrics: StepMetrics,
    pub reader_checkpoint: Option<CheckpointToken>,
    pub writer_checkpoint: Option<CheckpointToken>,
    pub persistent_user_data: Option<OpaqueData>,
    pub failure: Option<FailureRecord>,
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            status: BatchStatus::Starting,
            exit_status: None,
            start_time: None,
            end_time: None,
            metrics: StepMetrics::default(),
            reader_checkpoint: None,
            writer_checkpoint: None,
            persistent_user_data: None,
            failure: None,
        }
    }
}

impl StepState {
    pub fn status(&self) -> BatchStatus {
        self.status
    }

    /// Record a new status. Returns `false` when a terminal status is already recorded.
    pub fn set_status(&mut self, status: BatchStatus) -> bool {
        if self.status.is_terminal() {
            if self.status != status {
                tracing::debug!(
                    current = %self.status,
                    requested = %status,
                    "Ignoring status change on terminal execution"
                );
            }
            return false;
        }
        self.status = status;
        if status == BatchStatus::Started && self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        if status.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        true
    }

    /// Map a non-terminal status to its end-of-run terminal form:
    /// running work completes, a pending stop becomes stopped.
    pub fn finish(&mut self) {
        match self.status {
            BatchStatus::Starting | BatchStatus::Started => {
                self.set_status(BatchStatus::Completed);
            }
            BatchStatus::Stopping => {
                self.set_status(BatchStatus::Stopped);
            }
            _ => {}
        }
    }

    /// Record a failure, keeping the first one captured
    pub fn fail(&mut self, failure: FailureRecord) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
        self.set_status(BatchStatus::Failed);
    }

    /// Exit status defaults to the batch status name when nothing set it
    pub fn effective_exit_status(&self) -> String {
        self.exit_status
            .clone()
            .unwrap_or_else(|| self.status.to_string())
    }

    /// Carry checkpoint tokens and user data over from a previous attempt
    pub fn resume_from(&mut self, previous: &StepState) {
        self.reader_checkpoint = previous.reader_checkpoint.clone();
        self.writer_checkpoint = previous.writer_checkpoint.clone();
        self.persistent_user_data = previous.persistent_user_data.clone();
    }

    /// Repository-side status override used when an external stop marks the record
    pub(crate) fn force_status(&mut self, status: BatchStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: i64,
    pub job_execution_id: i64,
    pub step_name: String,
    pub state: StepState,
    pub partition_executions: Vec<PartitionExecution>,
}

impl StepExecution {
    pub fn new(job_execution_id: i64, step_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            job_execution_id,
            step_name: step_name.into(),
            state: StepState::default(),
            partition_executions: Vec::new(),
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.state.status()
    }

    pub fn exit_status(&self) -> String {
        self.state.effective_exit_status()
    }

    pub fn metrics(&self) -> &StepMetrics {
        &self.state.metrics
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partition_executions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionExecution {
    pub step_execution_id: i64,
    pub step_name: String,
    pub partition_index: usize,
    pub state: StepState,
}

impl PartitionExecution {
    pub fn new(step_execution_id: i64, step_name: impl Into<String>, partition_index: usize) -> Self {
        Self {
            step_execution_id,
            step_name: step_name.into(),
            partition_index,
            state: StepState::default(),
        }
    }

    /// Stand-in for a partition the previous attempt never reached
    pub fn failed_placeholder(
        step_execution_id: i64,
        step_name: impl Into<String>,
        partition_index: usize,
    ) -> Self {
        let mut placeholder = Self::new(step_execution_id, step_name, partition_index);
        placeholder.state.set_status(BatchStatus::Failed);
        placeholder
    }

    pub fn status(&self) -> BatchStatus {
        self.state.status()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: i64,
    pub job_name: String,
    pub created_at: DateTime<Utc>,
}

/// Where a restarted execution resumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "element")]
pub enum RestartPosition {
    Element(String),
    /// The job was declared non-restartable
    Unrestartable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub instance_id: i64,
    pub job_name: String,
    pub status: BatchStatus,
    pub exit_status: Option<String>,
    pub parameters: Properties,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub restart_position: Option<RestartPosition>,
    pub step_execution_ids: Vec<i64>,
}

impl JobExecution {
    pub fn new(instance: &JobInstance, parameters: Properties) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            instance_id: instance.id,
            job_name: instance.job_name.clone(),
            status: BatchStatus::Starting,
            exit_status: None,
            parameters,
            create_time: now,
            start_time: None,
            end_time: None,
            last_updated: now,
            restart_position: None,
            step_execution_ids: Vec::new(),
        }
    }

    pub fn effective_exit_status(&self) -> String {
        self.exit_status
            .clone()
            .unwrap_or_else(|| self.status.to_string())
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}
