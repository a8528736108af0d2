//! Chunk, batchlet, partition and decision capabilities.

use async_trait::async_trait;

use super::ArtifactResult;
use crate::definition::PartitionPlan;
use crate::models::{CheckpointToken, StepExecution};
use crate::state_machine::BatchStatus;

/// Items flowing through a chunk step
pub type Item = serde_json::Value;

#[async_trait]
pub trait ItemReader: Send {
    /// Position at `checkpoint`, or at the beginning when there is none
    async fn open(&mut self, checkpoint: Option<&CheckpointToken>) -> ArtifactResult<()>;

    /// `None` signals that the input is depleted
    async fn read_item(&mut self) -> ArtifactResult<Option<Item>>;

    async fn checkpoint_info(&mut self) -> ArtifactResult<Option<CheckpointToken>>;

    async fn close(&mut self) -> ArtifactResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ItemProcessor: Send {
    /// `None` filters the item out of the write batch
    async fn process_item(&mut self, item: &Item) -> ArtifactResult<Option<Item>>;
}

#[async_trait]
pub trait ItemWriter: Send {
    async fn open(&mut self, checkpoint: Option<&CheckpointToken>) -> ArtifactResult<()>;

    async fn write_items(&mut self, items: &[Item]) -> ArtifactResult<()>;

    async fn checkpoint_info(&mut self) -> ArtifactResult<Option<CheckpointToken>> {
        Ok(None)
    }

    async fn close(&mut self) -> ArtifactResult<()> {
        Ok(())
    }
}

/// Custom checkpoint policy
#[async_trait]
pub trait CheckpointAlgorithm: Send {
    /// Transaction timeout in seconds for the next interval, 0 keeps the step default
    async fn checkpoint_timeout(&mut self) -> ArtifactResult<u64> {
        Ok(0)
    }

    async fn begin_checkpoint(&mut self) -> ArtifactResult<()> {
        Ok(())
    }

    async fn is_ready_to_checkpoint(&mut self) -> ArtifactResult<bool>;

    async fn end_checkpoint(&mut self) -> ArtifactResult<()> {
        Ok(())
    }
}

/// Non-chunked unit of work.
///
/// `stop` is invoked from another task while `process` is running, so both
/// take `&self`.
#[async_trait]
pub trait Batchlet: Send + Sync {
    /// Returns the exit status, `None` keeps the default
    async fn process(&self) -> ArtifactResult<Option<String>>;

    async fn stop(&self) -> ArtifactResult<()>;
}

#[async_trait]
pub trait PartitionMapper: Send {
    async fn map_partitions(&mut self) -> ArtifactResult<PartitionPlan>;
}

/// Runs inside each partition and ships data to the analyzer
#[async_trait]
pub trait PartitionCollector: Send {
    async fn collect_partition_data(&mut self) -> ArtifactResult<Option<Item>>;
}

/// Runs on the orchestrating task and sees every partition report
#[async_trait]
pub trait PartitionAnalyzer: Send {
    async fn analyze_collector_data(&mut self, _data: &Item) -> ArtifactResult<()> {
        Ok(())
    }

    async fn analyze_status(&mut self, _status: BatchStatus, _exit_status: &str) -> ArtifactResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStatus {
    Commit,
    Rollback,
}

#[async_trait]
pub trait PartitionReducer: Send {
    async fn begin_partitioned_step(&mut self) -> ArtifactResult<()> {
        Ok(())
    }

    async fn before_partitioned_step_completion(&mut self) -> ArtifactResult<()> {
        Ok(())
    }

    async fn rollback_partitioned_step(&mut self) -> ArtifactResult<()> {
        Ok(())
    }

    async fn after_partitioned_step_completion(&mut self, _status: PartitionStatus) -> ArtifactResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait Decider: Send {
    /// Receives the terminal executions that fed the decision, returns the new exit status
    async fn decide(&mut self, executions: &[StepExecution]) -> ArtifactResult<String>;
}
