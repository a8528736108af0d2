use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status shared by job, step, partition, flow and split executions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Execution created but not yet running
    #[default]
    Starting,
    /// Execution is running
    Started,
    /// A stop was requested and is being honored
    Stopping,
    /// Execution ended because of a stop request or a stop transition
    Stopped,
    /// Execution ended with an error
    Failed,
    /// Execution ended successfully
    Completed,
    /// Execution was abandoned and will never be restarted
    Abandoned,
}

impl BatchStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Failed | Self::Completed | Self::Abandoned
        )
    }

    /// Check if the execution is still doing work
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }

    /// Severity used when consolidating several outcomes into one:
    /// failed outranks stopped, which outranks everything else.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Failed => 2,
            Self::Stopped => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "started" => Ok(Self::Started),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("Invalid batch status: {s}")),
        }
    }
}

/// Per-item processing state of the chunk loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Normal item processing
    #[default]
    Running,
    /// Skip the remainder of the current iteration
    ToSkip,
    /// Undecided retry, refined into one of the stage specific retry states
    ToRetry,
    /// Re-attempt the read on the next iteration
    ToRetryRead,
    RetryingRead,
    /// Re-attempt processing on the next iteration
    ToRetryProcess,
    RetryingProcess,
    /// Re-attempt writing the pending batch on the next iteration
    ToRetryWrite,
    RetryingWrite,
}

impl ItemState {
    /// States that end the current iteration early
    pub fn stops_iteration(&self) -> bool {
        matches!(
            self,
            Self::ToSkip
                | Self::ToRetry
                | Self::ToRetryRead
                | Self::ToRetryProcess
                | Self::ToRetryWrite
        )
    }

    /// A stage retry is queued for the next iteration
    pub fn is_pending_retry(&self) -> bool {
        matches!(
            self,
            Self::ToRetryRead | Self::ToRetryProcess | Self::ToRetryWrite
        )
    }

    /// A stage is being re-attempted in the current iteration
    pub fn is_retrying(&self) -> bool {
        matches!(
            self,
            Self::RetryingRead | Self::RetryingProcess | Self::RetryingWrite
        )
    }

    /// Promote a queued retry into its active form at the top of an iteration
    pub fn advance(self) -> Self {
        match self {
            Self::ToSkip => Self::Running,
            Self::ToRetryRead => Self::RetryingRead,
            Self::ToRetryProcess => Self::RetryingProcess,
            Self::ToRetryWrite => Self::RetryingWrite,
            other => other,
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::ToSkip => "to_skip",
            Self::ToRetry => "to_retry",
            Self::ToRetryRead => "to_retry_read",
            Self::RetryingRead => "retrying_read",
            Self::ToRetryProcess => "to_retry_process",
            Self::RetryingProcess => "retrying_process",
            Self::ToRetryWrite => "to_retry_write",
            Self::RetryingWrite => "retrying_write",
        };
        f.write_str(label)
    }
}

/// Checkpoint-interval state of the chunk loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Running,
    /// Roll back happened, the interval must be retried
    ToRetry,
    /// Interval is being retried one item per checkpoint
    Retrying,
    /// Retry reached the failure point, the next interval is a normal one
    ToEndRetry,
    /// Current interval is done, start a fresh one
    #[default]
    ToStartNew,
    /// Reader returned no more items
    Depleted,
    /// A stop was requested, checkpoint then exit
    JobStopping,
    JobStopped,
}

impl ChunkState {
    /// States that open a new checkpoint interval at the top of an iteration
    pub fn begins_interval(&self) -> bool {
        matches!(
            self,
            Self::ToStartNew | Self::ToRetry | Self::Retrying | Self::ToEndRetry
        )
    }

    /// States that reset per-interval counters when an interval opens
    pub fn resets_interval(&self) -> bool {
        matches!(self, Self::ToStartNew | Self::ToEndRetry)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retrying | Self::ToEndRetry)
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::ToRetry => "to_retry",
            Self::Retrying => "retrying",
            Self::ToEndRetry => "to_end_retry",
            Self::ToStartNew => "to_start_new",
            Self::Depleted => "depleted",
            Self::JobStopping => "job_stopping",
            Self::JobStopped => "job_stopped",
        };
        f.write_str(label)
    }
}

/// Outcome of routing an item-processing failure through skip/retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDisposition {
    Skip,
    Retry,
    /// Matched neither policy or a limit was exhausted
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_status_terminal_states() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(BatchStatus::Stopped.is_terminal());
        assert!(BatchStatus::Abandoned.is_terminal());
        assert!(!BatchStatus::Stopping.is_terminal());
        assert!(!BatchStatus::Started.is_terminal());
    }

    #[test]
    fn test_batch_status_round_trips_through_strings() {
        for status in [
            BatchStatus::Starting,
            BatchStatus::Started,
            BatchStatus::Stopping,
            BatchStatus::Stopped,
            BatchStatus::Failed,
            BatchStatus::Completed,
            BatchStatus::Abandoned,
        ] {
            assert_eq!(status.to_string().parse::<BatchStatus>(), Ok(status));
        }
        assert!("bogus".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn test_batch_status_serde_snake_case() {
        let json = serde_json::to_string(&BatchStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }

    #[test]
    fn test_item_state_advance() {
        assert_eq!(ItemState::ToSkip.advance(), ItemState::Running);
        assert_eq!(ItemState::ToRetryRead.advance(), ItemState::RetryingRead);
        assert_eq!(ItemState::ToRetryWrite.advance(), ItemState::RetryingWrite);
        assert_eq!(ItemState::RetryingProcess.advance(), ItemState::RetryingProcess);
    }

    #[test]
    fn test_chunk_state_interval_boundaries() {
        assert!(ChunkState::ToStartNew.begins_interval());
        assert!(ChunkState::Retrying.begins_interval());
        assert!(!ChunkState::Running.begins_interval());
        assert!(ChunkState::ToEndRetry.resets_interval());
        assert!(!ChunkState::ToRetry.resets_interval());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(BatchStatus::Failed.severity() > BatchStatus::Stopped.severity());
        assert!(BatchStatus::Stopped.severity() > BatchStatus::Completed.severity());
    }
}
