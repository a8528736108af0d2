//! Chunk attribute parsing and the skip/retry decision.

use std::time::Duration;

use crate::artifacts::ArtifactError;
use crate::config::EngineConfig;
use crate::constants::{checkpoint_policy, properties};
use crate::definition::{Chunk, ExceptionClassFilter, Step};
use crate::error::{BatchError, BatchResult};
use crate::state_machine::FailureDisposition;

/// When an interval is ready to checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPolicy {
    Item {
        item_count: u64,
        time_limit: Option<Duration>,
    },
    /// Delegated to a checkpoint algorithm
    Custom,
}

/// Parsed, validated chunk configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPolicy {
    pub checkpoint: CheckpointPolicy,
    pub transaction_timeout: Duration,
    pub failures: SkipRetryPolicy,
}

impl ChunkPolicy {
    pub fn from_step(step: &Step, chunk: &Chunk, config: &EngineConfig) -> BatchResult<Self> {
        let policy = chunk
            .checkpoint_policy
            .as_deref()
            .map(str::trim)
            .unwrap_or(checkpoint_policy::ITEM);

        let checkpoint = match policy {
            checkpoint_policy::ITEM => {
                let item_count = match chunk.item_count.as_deref() {
                    Some(raw) => parse_number(raw, "item-count", &step.id)?,
                    None => i64::from(config.default_item_count),
                };
                if item_count < 1 {
                    return Err(BatchError::invalid_attribute(
                        "item-count",
                        &item_count.to_string(),
                        &step.id,
                    ));
                }
                let time_limit = match chunk.time_limit.as_deref() {
                    Some(raw) => parse_number(raw, "time-limit", &step.id)?,
                    None => 0,
                };
                CheckpointPolicy::Item {
                    item_count: item_count.unsigned_abs(),
                    time_limit: (time_limit > 0).then(|| Duration::from_secs(time_limit.unsigned_abs())),
                }
            }
            checkpoint_policy::CUSTOM => {
                if chunk.checkpoint_algorithm.is_none() {
                    return Err(BatchError::ConfigurationError(format!(
                        "Step '{}' uses the custom checkpoint policy without a checkpoint algorithm",
                        step.id
                    )));
                }
                CheckpointPolicy::Custom
            }
            other => return Err(BatchError::invalid_attribute("checkpoint-policy", other, &step.id)),
        };

        let transaction_timeout = match step.properties.get(properties::TRANSACTION_TIMEOUT) {
            Some(raw) => {
                let seconds = parse_number(raw, properties::TRANSACTION_TIMEOUT, &step.id)?;
                if seconds < 1 {
                    return Err(BatchError::invalid_attribute(
                        properties::TRANSACTION_TIMEOUT,
                        raw,
                        &step.id,
                    ));
                }
                Duration::from_secs(seconds.unsigned_abs())
            }
            None => config.transaction_timeout(),
        };

        Ok(Self {
            checkpoint,
            transaction_timeout,
            failures: SkipRetryPolicy {
                skippable: chunk.skippable_exception_classes.clone(),
                retryable: chunk.retryable_exception_classes.clone(),
                no_rollback: chunk.no_rollback_exception_classes.clone(),
                skip_limit: parse_limit(chunk.skip_limit.as_deref(), "skip-limit", &step.id)?,
                retry_limit: parse_limit(chunk.retry_limit.as_deref(), "retry-limit", &step.id)?,
            },
        })
    }
}

/// Skip and retry filters with their limits. `None` limits are unbounded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkipRetryPolicy {
    pub skippable: ExceptionClassFilter,
    pub retryable: ExceptionClassFilter,
    pub no_rollback: ExceptionClassFilter,
    pub skip_limit: Option<u64>,
    pub retry_limit: Option<u64>,
}

impl SkipRetryPolicy {
    pub fn can_skip(&self, error: &ArtifactError, skip_count: u64) -> bool {
        self.skippable.matches(error) && self.skip_limit.map_or(true, |limit| skip_count < limit)
    }

    pub fn can_retry(&self, error: &ArtifactError, retry_count: u64) -> bool {
        self.retryable.matches(error) && self.retry_limit.map_or(true, |limit| retry_count < limit)
    }

    pub fn is_no_rollback(&self, error: &ArtifactError) -> bool {
        self.no_rollback.matches(error)
    }

    /// Inside a retry, skip wins over retry; otherwise retry wins over skip
    pub fn decide(
        &self,
        error: &ArtifactError,
        in_retry: bool,
        skip_count: u64,
        retry_count: u64,
    ) -> FailureDisposition {
        let skip = self.can_skip(error, skip_count);
        let retry = self.can_retry(error, retry_count);
        match (in_retry, skip, retry) {
            (true, true, _) | (false, true, false) => FailureDisposition::Skip,
            (false, _, true) | (true, false, true) => FailureDisposition::Retry,
            _ => FailureDisposition::Fatal,
        }
    }
}

fn parse_number(raw: &str, attribute: &str, step: &str) -> BatchResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| BatchError::invalid_attribute(attribute, raw, step))
}

/// Absent or negative is unbounded, 0 allows none
fn parse_limit(raw: Option<&str>, attribute: &str, step: &str) -> BatchResult<Option<u64>> {
    match raw {
        None => Ok(None),
        Some(raw) => {
            let limit = parse_number(raw, attribute, step)?;
            Ok((limit >= 0).then_some(limit.unsigned_abs()))
        }
    }
}
