//! # Chunk Runner
//!
//! Read-process-write loop for one step or partition, committing in
//! checkpoint intervals.
//!
//! ## Overview
//!
//! The loop is driven by two states. [`ItemState`] tracks the current item
//! (running, queued for skip, queued for a stage retry, retrying a stage) and
//! [`ChunkState`] tracks the checkpoint interval (running, retrying after a
//! rollback, depleted, stopping). The loop ends when the chunk is stopped, or
//! when input is depleted and no stage retry is pending.
//!
//! ## Failure Handling
//!
//! Read, process and write failures go through [`SkipRetryPolicy::decide`]:
//!
//! - **Skip** drops the item (or the whole pending batch for a write) and
//!   continues.
//! - **Retry without rollback** re-invokes the failing stage on the next
//!   iteration. A pending write batch is retried as is; a read simply moves
//!   on to the next item.
//! - **Retry with rollback** discards the pending batch, rolls back the
//!   interval, reopens reader and writer from the last saved checkpoint and
//!   re-processes one item per checkpoint until the recorded failure point is
//!   passed again.
//! - Anything else fails the step.

pub mod policy;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::context::JobContext;
use super::listeners::ListenerSet;
use super::partition::PartitionReport;
use super::unit::ExecutionUnit;
use crate::artifacts::factory::{
    create_checkpoint_algorithm, create_processor, create_reader, create_writer,
};
use crate::artifacts::{
    ArtifactContext, ArtifactError, CheckpointAlgorithm, Item, ItemProcessor, ItemReader,
    ItemWriter, PartitionCollector, StepScope,
};
use crate::constants::artifact_kinds;
use crate::definition::{Chunk, Step};
use crate::error::{BatchError, BatchResult};
use crate::models::{CheckpointToken, MetricType};
use crate::state_machine::{BatchStatus, ChunkState, FailureDisposition, ItemState};
use crate::transaction::{Transaction, TransactionManager};

pub use policy::{CheckpointPolicy, ChunkPolicy, SkipRetryPolicy};

/// Partition collector plus the channel its data is reported on
pub(crate) struct CollectorLink {
    pub(crate) collector: Box<dyn PartitionCollector>,
    pub(crate) reports: mpsc::Sender<PartitionReport>,
}

impl CollectorLink {
    pub(crate) async fn report(&mut self) -> BatchResult<()> {
        if let Some(data) = self.collector.collect_partition_data().await? {
            self.reports
                .send(PartitionReport::CollectorData(data))
                .await
                .map_err(|_| {
                    BatchError::OrchestrationError("partition report channel closed".to_string())
                })?;
        }
        Ok(())
    }
}

/// Run the chunk configured on `step` against `unit`
pub(crate) async fn run_chunk(
    ctx: &JobContext,
    step: &Step,
    chunk: &Chunk,
    unit: ExecutionUnit<'_>,
    scope: Arc<StepScope>,
    listeners: ListenerSet,
    collector: Option<CollectorLink>,
) -> BatchResult<()> {
    let mut created: Vec<(&'static str, String)> = Vec::new();
    let result =
        build_and_run(ctx, step, chunk, unit, scope, listeners, collector, &mut created).await;
    for (kind, reference) in &created {
        ctx.factory.destroy(*kind, reference);
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn build_and_run(
    ctx: &JobContext,
    step: &Step,
    chunk: &Chunk,
    unit: ExecutionUnit<'_>,
    scope: Arc<StepScope>,
    listeners: ListenerSet,
    collector: Option<CollectorLink>,
    created: &mut Vec<(&'static str, String)>,
) -> BatchResult<()> {
    let policy = ChunkPolicy::from_step(step, chunk, &ctx.config)?;
    let context: ArtifactContext = ctx.artifacts.for_step(Arc::clone(&scope));
    let factory = &*ctx.factory;

    let reader = create_reader(factory, &chunk.reader, &context)?;
    created.push((artifact_kinds::READER, chunk.reader.reference.clone()));

    let processor = match &chunk.processor {
        Some(reference) => {
            let processor = create_processor(factory, reference, &context)?;
            created.push((artifact_kinds::PROCESSOR, reference.reference.clone()));
            Some(processor)
        }
        None => None,
    };

    let writer = create_writer(factory, &chunk.writer, &context)?;
    created.push((artifact_kinds::WRITER, chunk.writer.reference.clone()));

    let algorithm = match (&policy.checkpoint, &chunk.checkpoint_algorithm) {
        (CheckpointPolicy::Custom, Some(reference)) => {
            let algorithm = create_checkpoint_algorithm(factory, reference, &context)?;
            created.push((artifact_kinds::CHECKPOINT_ALGORITHM, reference.reference.clone()));
            Some(algorithm)
        }
        _ => None,
    };

    let mut runner = ChunkRunner {
        ctx,
        transactions: ctx.transactions_for(step),
        unit,
        scope,
        listeners,
        policy,
        reader,
        processor,
        writer,
        algorithm,
        collector,
        tx: None,
        item_state: ItemState::Running,
        chunk_state: ChunkState::ToStartNew,
        outputs: Vec::new(),
        last_item: None,
        interval_count: 0,
        deadline: None,
        failure_point: None,
        skip_count: 0,
        retry_count: 0,
        reader_open: false,
        writer_open: false,
    };
    runner.run().await
}

struct ChunkRunner<'a> {
    ctx: &'a JobContext,
    transactions: Arc<dyn TransactionManager>,
    unit: ExecutionUnit<'a>,
    scope: Arc<StepScope>,
    listeners: ListenerSet,
    policy: ChunkPolicy,
    reader: Box<dyn ItemReader>,
    processor: Option<Box<dyn ItemProcessor>>,
    writer: Box<dyn ItemWriter>,
    algorithm: Option<Box<dyn CheckpointAlgorithm>>,
    collector: Option<CollectorLink>,
    tx: Option<Box<dyn Transaction>>,
    item_state: ItemState,
    chunk_state: ChunkState,
    outputs: Vec<Item>,
    /// Last item read, re-processed by a no-rollback process retry
    last_item: Option<Item>,
    /// Items read in the current interval
    interval_count: u64,
    deadline: Option<Instant>,
    /// Reader position where the failure that caused the last rollback happened
    failure_point: Option<Option<CheckpointToken>>,
    skip_count: u64,
    retry_count: u64,
    reader_open: bool,
    writer_open: bool,
}

impl ChunkRunner<'_> {
    async fn run(&mut self) -> BatchResult<()> {
        debug!(
            step = %self.unit.step_name(),
            partition = ?self.unit.partition_index(),
            "🔄 CHUNK: Starting read-process-write loop"
        );

        let result = match self.open().await {
            Ok(()) => self.read_process_write_items().await,
            Err(err) => Err(err),
        };

        let closed = self.close().await;
        if let Err(err) = &closed {
            warn!(step = %self.unit.step_name(), error = %err, "⚠️ CHUNK: Failed to close reader/writer");
        }
        if let Some(link) = self.collector.as_mut() {
            if let Err(err) = link.report().await {
                warn!(step = %self.unit.step_name(), error = %err, "⚠️ CHUNK: Final collector report failed");
            }
        }

        let metrics = self.unit.state().metrics;
        info!(
            step = %self.unit.step_name(),
            partition = ?self.unit.partition_index(),
            read = metrics.read_count,
            written = metrics.write_count,
            commits = metrics.commit_count,
            rollbacks = metrics.rollback_count,
            skipped = metrics.skip_count(),
            "🔄 CHUNK: Loop finished"
        );
        result.and(closed)
    }

    async fn read_process_write_items(&mut self) -> BatchResult<()> {
        while self.chunk_state != ChunkState::JobStopped
            && (self.chunk_state != ChunkState::Depleted || self.item_state.is_pending_retry())
        {
            if let Err(err) = self.iterate().await {
                if let Some(tx) = self.tx.take() {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "⚠️ CHUNK: Rollback after failure also failed");
                    }
                    self.count(MetricType::RollbackCount, 1);
                }
                if let Err(listener_err) = self.listeners.chunk_error(&err).await {
                    warn!(error = %listener_err, "⚠️ CHUNK: Chunk listener on_error failed");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    async fn iterate(&mut self) -> BatchResult<()> {
        self.item_state = self.item_state.advance();

        if self.chunk_state.begins_interval() {
            self.begin_interval().await?;
        }

        let item = match self.item_state {
            ItemState::RetryingProcess => self.last_item.clone(),
            ItemState::RetryingWrite => None,
            _ => self.read_item().await?,
        };
        if let Some(item) = item {
            self.process_item(item).await?;
        }

        if self.item_state.stops_iteration() || self.chunk_state == ChunkState::ToRetry {
            return Ok(());
        }

        if self.is_ready_to_checkpoint().await? {
            self.do_checkpoint().await?;
            if self.chunk_state == ChunkState::ToRetry
                || matches!(self.item_state, ItemState::ToRetryWrite | ItemState::ToSkip)
            {
                return Ok(());
            }
            self.listeners.after_chunk().await?;
            self.commit().await?;
        }
        Ok(())
    }

    async fn begin_interval(&mut self) -> BatchResult<()> {
        if self.chunk_state.resets_interval() {
            self.interval_count = 0;
            self.deadline = None;
            self.item_state = ItemState::Running;
            self.chunk_state = ChunkState::Running;
            self.failure_point = None;
        }

        if self.tx.is_none() {
            let timeout = self.interval_timeout().await?;
            self.tx = Some(self.transactions.begin(timeout).await?);
        }
        self.listeners.before_chunk().await?;

        match self.policy.checkpoint {
            CheckpointPolicy::Item { time_limit, .. } => {
                self.deadline = time_limit.map(|limit| Instant::now() + limit);
            }
            CheckpointPolicy::Custom => {
                if let Some(algorithm) = self.algorithm.as_mut() {
                    algorithm.begin_checkpoint().await?;
                }
            }
        }

        self.chunk_state = match self.chunk_state {
            ChunkState::ToRetry | ChunkState::Retrying => ChunkState::Retrying,
            _ => ChunkState::Running,
        };
        Ok(())
    }

    async fn interval_timeout(&mut self) -> BatchResult<Duration> {
        if let Some(algorithm) = self.algorithm.as_mut() {
            let seconds = algorithm.checkpoint_timeout().await?;
            if seconds > 0 {
                return Ok(Duration::from_secs(seconds));
            }
        }
        Ok(self.policy.transaction_timeout)
    }

    async fn read_item(&mut self) -> BatchResult<Option<Item>> {
        self.listeners.before_read().await?;
        match self.reader.read_item().await {
            Ok(Some(item)) => {
                self.count(MetricType::ReadCount, 1);
                self.interval_count += 1;
                self.listeners.after_read(Some(&item)).await?;
                if self.item_state == ItemState::RetryingRead {
                    self.item_state = ItemState::Running;
                }
                self.last_item = Some(item.clone());
                Ok(Some(item))
            }
            Ok(None) => {
                self.chunk_state = ChunkState::Depleted;
                self.listeners.after_read(None).await?;
                if self.item_state == ItemState::RetryingRead {
                    self.item_state = ItemState::Running;
                }
                Ok(None)
            }
            Err(err) => {
                self.listeners.read_error(&err).await?;
                self.handle_read_failure(err).await?;
                self.check_if_end_retry().await?;
                Ok(None)
            }
        }
    }

    async fn process_item(&mut self, item: Item) -> BatchResult<()> {
        let Some(processor) = self.processor.as_mut() else {
            self.outputs.push(item);
            return self.check_if_end_retry().await;
        };

        self.listeners.before_process(&item).await?;
        match processor.process_item(&item).await {
            Ok(output) => {
                self.listeners.after_process(&item, output.as_ref()).await?;
                match output {
                    Some(output) => self.outputs.push(output),
                    None => self.count(MetricType::FilterCount, 1),
                }
                if self.item_state == ItemState::RetryingProcess {
                    self.item_state = ItemState::Running;
                }
            }
            Err(err) => {
                self.listeners.process_error(&item, &err).await?;
                self.handle_process_failure(&item, err).await?;
            }
        }
        self.check_if_end_retry().await
    }

    async fn is_ready_to_checkpoint(&mut self) -> BatchResult<bool> {
        if self.ctx.stop.is_cancelled() {
            self.chunk_state = ChunkState::JobStopping;
            return Ok(true);
        }
        if matches!(
            self.chunk_state,
            ChunkState::Depleted | ChunkState::Retrying | ChunkState::ToEndRetry
        ) || self.item_state == ItemState::RetryingWrite
        {
            return Ok(true);
        }

        match self.policy.checkpoint {
            CheckpointPolicy::Item { item_count, .. } => Ok(self.interval_count >= item_count
                || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)),
            CheckpointPolicy::Custom => match self.algorithm.as_mut() {
                Some(algorithm) => Ok(algorithm.is_ready_to_checkpoint().await?),
                None => Ok(false),
            },
        }
    }

    async fn do_checkpoint(&mut self) -> BatchResult<()> {
        if !(self.outputs.is_empty() && self.chunk_state == ChunkState::Depleted) {
            self.listeners.before_write(&self.outputs).await?;
            match self.writer.write_items(&self.outputs).await {
                Ok(()) => {
                    self.listeners.after_write(&self.outputs).await?;
                    self.count(MetricType::WriteCount, self.outputs.len() as u64);
                    if self.item_state == ItemState::RetryingWrite {
                        self.item_state = ItemState::Running;
                    }
                }
                Err(err) => {
                    self.listeners.write_error(&self.outputs, &err).await?;
                    return self.handle_write_failure(err).await;
                }
            }
        }
        self.check_if_end_retry().await?;

        let reader_checkpoint = self.reader.checkpoint_info().await?;
        let writer_checkpoint = self.writer.checkpoint_info().await?;
        let persistent_user_data = self.scope.persistent_user_data();
        let stopping = self.chunk_state == ChunkState::JobStopping;
        {
            let state = self.unit.state_mut();
            state.reader_checkpoint = reader_checkpoint;
            state.writer_checkpoint = writer_checkpoint;
            state.persistent_user_data = persistent_user_data;
            if stopping {
                state.set_status(BatchStatus::Stopping);
            }
        }

        let ctx = self.ctx;
        let repository = &*ctx.repository;
        if !self.unit.save_if_not_stopping(repository).await? {
            info!(
                step = %self.unit.step_name(),
                partition = ?self.unit.partition_index(),
                "🛑 CHUNK: Execution marked stopping externally, stopping after this checkpoint"
            );
            self.unit.state_mut().set_status(BatchStatus::Stopping);
            self.unit.update(repository).await?;
            self.chunk_state = ChunkState::JobStopping;
            ctx.request_stop().await;
        }

        debug!(
            step = %self.unit.step_name(),
            partition = ?self.unit.partition_index(),
            items = self.outputs.len(),
            chunk_state = %self.chunk_state,
            "🔄 CHUNK: Checkpoint saved"
        );
        self.outputs.clear();

        if let Some(algorithm) = self.algorithm.as_mut() {
            algorithm.end_checkpoint().await?;
        }

        if self.chunk_state == ChunkState::JobStopping {
            self.chunk_state = ChunkState::JobStopped;
            self.unit.state_mut().set_status(BatchStatus::Stopping);
        } else if !matches!(self.chunk_state, ChunkState::Depleted | ChunkState::Retrying) {
            self.chunk_state = ChunkState::ToStartNew;
        }

        if let Some(link) = self.collector.as_mut() {
            link.report().await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> BatchResult<()> {
        if let Some(tx) = self.tx.take() {
            if let Err(err) = tx.commit().await {
                self.count(MetricType::RollbackCount, 1);
                return Err(err);
            }
            self.count(MetricType::CommitCount, 1);
        }
        Ok(())
    }

    fn in_retry(&self) -> bool {
        self.chunk_state.is_retry() || self.item_state.is_retrying()
    }

    fn decide(&self, err: &ArtifactError) -> FailureDisposition {
        self.policy
            .failures
            .decide(err, self.in_retry(), self.skip_count, self.retry_count)
    }

    async fn handle_read_failure(&mut self, err: ArtifactError) -> BatchResult<()> {
        match self.decide(&err) {
            FailureDisposition::Skip => {
                debug!(step = %self.unit.step_name(), kind = %err.kind(), "⏭️ CHUNK: Skipping read failure");
                self.count(MetricType::ReadSkipCount, 1);
                self.skip_count += 1;
                self.listeners.skip_read(&err).await?;
                self.item_state = ItemState::ToSkip;
            }
            FailureDisposition::Retry => {
                debug!(step = %self.unit.step_name(), kind = %err.kind(), "🔁 CHUNK: Retrying read failure");
                self.retry_count += 1;
                self.listeners.retry_read(&err).await?;
                if self.policy.failures.is_no_rollback(&err) {
                    self.item_state = ItemState::ToRetryRead;
                } else {
                    self.rollback_checkpoint().await?;
                }
            }
            FailureDisposition::Fatal => return Err(err.into()),
        }
        Ok(())
    }

    async fn handle_process_failure(&mut self, item: &Item, err: ArtifactError) -> BatchResult<()> {
        match self.decide(&err) {
            FailureDisposition::Skip => {
                debug!(step = %self.unit.step_name(), kind = %err.kind(), "⏭️ CHUNK: Skipping process failure");
                self.count(MetricType::ProcessSkipCount, 1);
                self.skip_count += 1;
                self.listeners.skip_process(item, &err).await?;
                self.item_state = ItemState::ToSkip;
            }
            FailureDisposition::Retry => {
                debug!(step = %self.unit.step_name(), kind = %err.kind(), "🔁 CHUNK: Retrying process failure");
                self.retry_count += 1;
                self.listeners.retry_process(item, &err).await?;
                if self.policy.failures.is_no_rollback(&err) {
                    self.item_state = ItemState::ToRetryProcess;
                } else {
                    self.rollback_checkpoint().await?;
                }
            }
            FailureDisposition::Fatal => return Err(err.into()),
        }
        Ok(())
    }

    async fn handle_write_failure(&mut self, err: ArtifactError) -> BatchResult<()> {
        match self.decide(&err) {
            FailureDisposition::Skip => {
                debug!(
                    step = %self.unit.step_name(),
                    kind = %err.kind(),
                    items = self.outputs.len(),
                    "⏭️ CHUNK: Skipping write failure, discarding pending batch"
                );
                self.listeners.skip_write(&self.outputs, &err).await?;
                // the limit counts discarded items, the metric counts skipped writes
                let discarded = self.outputs.len() as u64;
                self.outputs.clear();
                if let Some(tx) = self.tx.take() {
                    tx.rollback().await?;
                }
                self.count(MetricType::WriteSkipCount, 1);
                self.skip_count += discarded;
                self.item_state = ItemState::ToSkip;
                if self.chunk_state == ChunkState::JobStopping {
                    self.chunk_state = ChunkState::JobStopped;
                    self.unit.state_mut().set_status(BatchStatus::Stopping);
                } else if self.chunk_state != ChunkState::Retrying {
                    self.chunk_state = ChunkState::ToStartNew;
                }
            }
            FailureDisposition::Retry => {
                debug!(step = %self.unit.step_name(), kind = %err.kind(), "🔁 CHUNK: Retrying write failure");
                self.retry_count += 1;
                self.listeners.retry_write(&self.outputs, &err).await?;
                if self.policy.failures.is_no_rollback(&err) {
                    self.item_state = ItemState::ToRetryWrite;
                } else {
                    self.rollback_checkpoint().await?;
                }
            }
            FailureDisposition::Fatal => return Err(err.into()),
        }
        Ok(())
    }

    /// End the retry interval once the reader is back at the failure point
    async fn check_if_end_retry(&mut self) -> BatchResult<()> {
        if self.chunk_state != ChunkState::Retrying || self.item_state.is_pending_retry() {
            return Ok(());
        }
        if let Some(failure_point) = self.failure_point.clone() {
            if self.reader.checkpoint_info().await? == failure_point {
                debug!(step = %self.unit.step_name(), "🔁 CHUNK: Reached failure point, ending retry");
                self.chunk_state = ChunkState::ToEndRetry;
            }
        }
        Ok(())
    }

    async fn rollback_checkpoint(&mut self) -> BatchResult<()> {
        self.outputs.clear();
        self.failure_point = Some(self.reader.checkpoint_info().await?);
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        self.count(MetricType::RollbackCount, 1);
        info!(
            step = %self.unit.step_name(),
            partition = ?self.unit.partition_index(),
            "↩️ CHUNK: Rolled back interval, reopening from last checkpoint"
        );

        let tx = self.transactions.begin(self.policy.transaction_timeout).await?;
        let reopened = match self.close_artifacts().await {
            Ok(()) => self.open_artifacts().await,
            Err(err) => Err(err),
        };
        finish_transaction(tx, reopened).await?;

        self.chunk_state = ChunkState::ToRetry;
        self.item_state = ItemState::Running;

        if let Some(link) = self.collector.as_mut() {
            link.report().await?;
        }
        Ok(())
    }

    async fn open(&mut self) -> BatchResult<()> {
        let tx = self.transactions.begin(self.policy.transaction_timeout).await?;
        let opened = self.open_artifacts().await;
        finish_transaction(tx, opened).await
    }

    async fn open_artifacts(&mut self) -> BatchResult<()> {
        let reader_checkpoint = self.unit.state().reader_checkpoint.clone();
        let writer_checkpoint = self.unit.state().writer_checkpoint.clone();
        self.reader.open(reader_checkpoint.as_ref()).await?;
        self.reader_open = true;
        self.writer.open(writer_checkpoint.as_ref()).await?;
        self.writer_open = true;
        Ok(())
    }

    async fn close(&mut self) -> BatchResult<()> {
        match self.transactions.begin(self.policy.transaction_timeout).await {
            Ok(tx) => {
                let closed = self.close_artifacts().await;
                finish_transaction(tx, closed).await
            }
            Err(err) => {
                if let Err(close_err) = self.close_artifacts().await {
                    warn!(error = %close_err, "⚠️ CHUNK: Close without transaction failed");
                }
                Err(err)
            }
        }
    }

    /// Each artifact is closed at most once per open
    async fn close_artifacts(&mut self) -> BatchResult<()> {
        let mut result = Ok(());
        if self.reader_open {
            self.reader_open = false;
            if let Err(err) = self.reader.close().await {
                result = Err(err.into());
            }
        }
        if self.writer_open {
            self.writer_open = false;
            if let Err(err) = self.writer.close().await {
                if result.is_ok() {
                    result = Err(err.into());
                }
            }
        }
        result
    }

    fn count(&mut self, metric: MetricType, by: u64) {
        self.unit.state_mut().metrics.increment(metric, by);
    }
}

/// Commit on success, roll back and keep the original error otherwise
async fn finish_transaction(tx: Box<dyn Transaction>, outcome: BatchResult<()>) -> BatchResult<()> {
    match outcome {
        Ok(()) => tx.commit().await,
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "⚠️ CHUNK: Rollback failed");
            }
            Err(err)
        }
    }
}
