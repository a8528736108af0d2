//! # Batch Engine Configuration
//!
//! Engine-wide tunables. Values are layered: built-in defaults, then an
//! optional TOML file, then `TASKER_BATCH__*` environment variables.
//!
//! ```rust,no_run
//! use tasker_batch::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let item_count = manager.config().default_item_count;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Checkpoint interval used when a chunk declares no item-count
    pub default_item_count: u32,
    /// Chunk transaction timeout unless `transaction.global.timeout` overrides it
    pub transaction_timeout_seconds: u64,
    /// Upper bound on how long a split waits for its flows
    pub split_timeout_seconds: u64,
    /// Capacity of the bounded channel carrying partition reports
    pub partition_report_capacity: usize,
    /// Hard cap on concurrently running partitions of one step, 0 means no cap
    pub max_partition_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_item_count: crate::constants::DEFAULT_ITEM_COUNT,
            transaction_timeout_seconds: crate::constants::DEFAULT_TRANSACTION_TIMEOUT_SECONDS,
            split_timeout_seconds: crate::constants::DEFAULT_SPLIT_TIMEOUT_SECONDS,
            partition_report_capacity: 256,
            max_partition_threads: 0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_item_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "default_item_count",
                "0",
                "item count must be at least 1",
            ));
        }
        if self.transaction_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "transaction_timeout_seconds",
                "0",
                "transaction timeout must be positive",
            ));
        }
        if self.split_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "split_timeout_seconds",
                "0",
                "split timeout must be positive",
            ));
        }
        if self.partition_report_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "partition_report_capacity",
                "0",
                "channel capacity must be positive",
            ));
        }
        Ok(())
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_seconds)
    }

    pub fn split_timeout(&self) -> Duration {
        Duration::from_secs(self.split_timeout_seconds)
    }

    /// Effective worker count for a partitioned step given its planned thread count
    pub fn partition_threads(&self, planned: usize, partitions: usize) -> usize {
        let planned = if planned == 0 { partitions } else { planned };
        let capped = if self.max_partition_threads > 0 {
            planned.min(self.max_partition_threads)
        } else {
            planned
        };
        capped.max(1)
    }
}
