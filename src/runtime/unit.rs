//! The execution record a chunk or batchlet runner works on: either a whole
//! step execution or one partition of it.

use crate::error::BatchResult;
use crate::models::{PartitionExecution, StepExecution, StepState};
use crate::repository::JobRepository;

pub(crate) enum ExecutionUnit<'a> {
    Step(&'a mut StepExecution),
    Partition(&'a mut PartitionExecution),
}

impl ExecutionUnit<'_> {
    pub(crate) fn state(&self) -> &StepState {
        match self {
            Self::Step(step) => &step.state,
            Self::Partition(partition) => &partition.state,
        }
    }

    pub(crate) fn state_mut(&mut self) -> &mut StepState {
        match self {
            Self::Step(step) => &mut step.state,
            Self::Partition(partition) => &mut partition.state,
        }
    }

    pub(crate) fn step_name(&self) -> &str {
        match self {
            Self::Step(step) => &step.step_name,
            Self::Partition(partition) => &partition.step_name,
        }
    }

    pub(crate) fn partition_index(&self) -> Option<usize> {
        match self {
            Self::Step(_) => None,
            Self::Partition(partition) => Some(partition.partition_index),
        }
    }

    /// Checkpoint write; `false` means an external stop marked the record
    pub(crate) async fn save_if_not_stopping(&self, repository: &dyn JobRepository) -> BatchResult<bool> {
        match self {
            Self::Step(step) => repository.save_step_execution_if_not_stopping(step).await,
            Self::Partition(partition) => {
                repository
                    .save_partition_execution_if_not_stopping(partition)
                    .await
            }
        }
    }

    pub(crate) async fn update(&self, repository: &dyn JobRepository) -> BatchResult<()> {
        match self {
            Self::Step(step) => repository.update_step_execution(step).await,
            Self::Partition(partition) => repository.update_partition_execution(partition).await,
        }
    }
}
