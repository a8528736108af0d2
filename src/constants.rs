//! # System Constants
//!
//! Property keys recognized by the runtime and engine-wide defaults.

/// Step and job property keys
pub mod properties {
    /// Chunk transaction timeout in seconds (step level)
    pub const TRANSACTION_TIMEOUT: &str = "transaction.global.timeout";
    /// Use the local transaction manager instead of the injected one
    pub const LOCAL_TRANSACTION: &str = "local.transaction";
    /// `false` disables the transaction bracketing partition aggregation
    pub const PARTITION_TRANSACTION: &str = "partition.transaction";
}

/// Checkpoint policy names accepted on a chunk
pub mod checkpoint_policy {
    pub const ITEM: &str = "item";
    pub const CUSTOM: &str = "custom";
}

/// Artifact kinds requested from the factory, used for logging and registry lookups
pub mod artifact_kinds {
    pub const READER: &str = "reader";
    pub const PROCESSOR: &str = "processor";
    pub const WRITER: &str = "writer";
    pub const BATCHLET: &str = "batchlet";
    pub const CHECKPOINT_ALGORITHM: &str = "checkpoint_algorithm";
    pub const LISTENER: &str = "listener";
    pub const MAPPER: &str = "mapper";
    pub const COLLECTOR: &str = "collector";
    pub const ANALYZER: &str = "analyzer";
    pub const REDUCER: &str = "reducer";
    pub const DECIDER: &str = "decider";
}

pub const DEFAULT_ITEM_COUNT: u32 = 10;
pub const DEFAULT_TRANSACTION_TIMEOUT_SECONDS: u64 = 180;
pub const DEFAULT_SPLIT_TIMEOUT_SECONDS: u64 = 300;

/// Token opening a partition plan property reference in artifact properties
pub const PARTITION_PLAN_TOKEN: &str = "#{partitionPlan['";
