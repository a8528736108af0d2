//! # Batch Runtime Errors
//!
//! Engine-level error taxonomy. Failures raised by user artifacts travel as
//! [`ArtifactError`] and are routed through skip/retry policy before they ever
//! become a [`BatchError`].

use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::config::ConfigurationError;
use crate::models::FailureRecord;

#[derive(Debug, Clone, Error)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Failed to create artifact '{reference}': {reason}")]
    ArtifactCreation { reference: String, reason: String },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("Orchestration error: {0}")]
    OrchestrationError(String),

    #[error("Step '{step}' reached its start limit {limit} (already started {count} times)")]
    StartLimitExceeded { step: String, limit: u32, count: u32 },

    #[error("Step '{step}' would form a loopback in sequence: {sequence}")]
    Loopback { step: String, sequence: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Job execution {0} not found")]
    JobExecutionNotFound(i64),
}

impl BatchError {
    /// Short machine-readable kind used when the error is recorded on an execution
    pub fn kind(&self) -> &str {
        match self {
            Self::ConfigurationError(_) => "configuration_error",
            Self::RepositoryError(_) => "repository_error",
            Self::TransactionError(_) => "transaction_error",
            Self::ArtifactCreation { .. } => "artifact_creation_error",
            Self::Artifact(err) => err.kind(),
            Self::OrchestrationError(_) => "orchestration_error",
            Self::StartLimitExceeded { .. } => "start_limit_exceeded",
            Self::Loopback { .. } => "loopback",
            Self::InvalidState(_) => "invalid_state",
            Self::Timeout(_) => "timeout",
            Self::JobExecutionNotFound(_) => "job_execution_not_found",
        }
    }

    /// Whether this error stems from job definition or engine configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_)
                | Self::StartLimitExceeded { .. }
                | Self::Loopback { .. }
                | Self::ArtifactCreation { .. }
        )
    }

    pub fn to_failure_record(&self) -> FailureRecord {
        match self {
            Self::Artifact(err) => err.to_failure_record(),
            other => FailureRecord::new(other.kind(), other.to_string()),
        }
    }

    pub fn invalid_attribute(attribute: &str, value: &str, step: &str) -> Self {
        Self::ConfigurationError(format!(
            "Invalid value '{value}' for attribute '{attribute}' in step '{step}'"
        ))
    }
}

impl From<ConfigurationError> for BatchError {
    fn from(err: ConfigurationError) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;
