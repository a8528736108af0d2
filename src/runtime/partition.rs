//! # Partitioned Steps
//!
//! Runs one step as N partitions in parallel and folds their outcomes back
//! into the owning step execution.
//!
//! ## Flow
//!
//! 1. The plan comes from the mapper or the static plan (exactly one).
//! 2. On restart without `partitions_override`, completed partitions of the
//!    previous attempt are carried over and the rest resume from their saved
//!    checkpoints. With the override, the reducer rolls back first and every
//!    partition starts fresh.
//! 3. Workers run on the tokio runtime, throttled by a semaphore sized from
//!    the plan's thread count. Each worker reports collector data and its
//!    final record over a bounded channel.
//! 4. This task is the only consumer of that channel. It feeds the analyzer,
//!    merges metrics and consolidates statuses. Reports are drained while
//!    waiting for a permit so a full channel never blocks dispatch.
//! 5. The reducer and the optional aggregation transaction commit when every
//!    partition completed, otherwise roll back.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::batchlet::run_batchlet;
use super::chunk::{run_chunk, CollectorLink};
use super::context::JobContext;
use super::listeners::ListenerSet;
use super::unit::ExecutionUnit;
use crate::artifacts::factory::{create_analyzer, create_collector, create_mapper, create_reducer};
use crate::artifacts::{
    ArtifactContext, Item, PartitionAnalyzer, PartitionReducer, PartitionStatus, StepScope,
};
use crate::constants::{artifact_kinds, properties};
use crate::definition::{Partition, PartitionPlan, Step};
use crate::error::{BatchError, BatchResult};
use crate::logging::log_partition_operation;
use crate::models::{FailureRecord, PartitionExecution, StepExecution};
use crate::state_machine::BatchStatus;
use crate::transaction::Transaction;

/// Message from a partition worker to the aggregating task
#[derive(Debug)]
pub enum PartitionReport {
    CollectorData(Item),
    Finished(PartitionExecution),
}

/// Most severe status wins: failed over stopped over completed
pub fn consolidate_status<I>(statuses: I) -> BatchStatus
where
    I: IntoIterator<Item = BatchStatus>,
{
    statuses
        .into_iter()
        .fold(BatchStatus::Completed, |current, status| {
            if status.severity() > current.severity() {
                status
            } else {
                current
            }
        })
}

/// Run `step` as a partitioned step, recording results on `execution`
pub(crate) async fn run_partitioned(
    ctx: &Arc<JobContext>,
    step: &Step,
    partition: &Partition,
    execution: &mut StepExecution,
    original: Option<&StepExecution>,
    scope: Arc<StepScope>,
) -> BatchResult<()> {
    let context = ctx.artifacts.for_step(scope);
    let plan = resolve_plan(ctx, step, partition, &context).await?;

    let mut analyzer = match &partition.analyzer {
        Some(reference) => Some(create_analyzer(&*ctx.factory, reference, &context)?),
        None => None,
    };
    let analyzer_reference = partition.analyzer.as_ref().map(|r| r.reference.as_str());
    let mut reducer = match &partition.reducer {
        Some(reference) => match create_reducer(&*ctx.factory, reference, &context) {
            Ok(reducer) => Some(reducer),
            Err(err) => {
                destroy_optional(ctx, artifact_kinds::ANALYZER, analyzer_reference);
                return Err(err);
            }
        },
        None => None,
    };

    let result = aggregate(
        ctx,
        step,
        &plan,
        execution,
        original,
        &mut analyzer,
        &mut reducer,
    )
    .await;

    destroy_optional(ctx, artifact_kinds::ANALYZER, analyzer_reference);
    destroy_optional(
        ctx,
        artifact_kinds::REDUCER,
        partition.reducer.as_ref().map(|r| r.reference.as_str()),
    );
    result
}

fn destroy_optional(ctx: &JobContext, kind: &'static str, reference: Option<&str>) {
    if let Some(reference) = reference {
        ctx.factory.destroy(kind, reference);
    }
}

async fn resolve_plan(
    ctx: &JobContext,
    step: &Step,
    partition: &Partition,
    context: &ArtifactContext,
) -> BatchResult<PartitionPlan> {
    let plan = match (&partition.mapper, &partition.plan) {
        (Some(reference), None) => {
            let mut mapper = create_mapper(&*ctx.factory, reference, context)?;
            let mapped = mapper.map_partitions().await;
            ctx.factory.destroy(artifact_kinds::MAPPER, &reference.reference);
            mapped?
        }
        (None, Some(plan)) => plan.clone(),
        _ => {
            return Err(BatchError::ConfigurationError(format!(
                "Partitioned step '{}' needs exactly one of a mapper or a static plan",
                step.id
            )))
        }
    };
    if plan.partitions == 0 {
        return Err(BatchError::ConfigurationError(format!(
            "Partition plan of step '{}' has no partitions",
            step.id
        )));
    }
    Ok(plan)
}

/// Partitions to run now, after carrying completed ones over from `original`
async fn plan_partitions(
    ctx: &JobContext,
    step: &Step,
    plan: &PartitionPlan,
    execution: &mut StepExecution,
    original: Option<&StepExecution>,
) -> BatchResult<Vec<PartitionExecution>> {
    let previous = match original {
        Some(original) if !plan.partitions_override => {
            ctx.repository
                .get_partition_executions(original.id, false)
                .await?
        }
        _ => Vec::new(),
    };

    let mut pending = Vec::with_capacity(plan.partitions);
    for index in 0..plan.partitions {
        let mut fresh = PartitionExecution::new(execution.id, &step.id, index);
        match previous.iter().find(|p| p.partition_index == index) {
            Some(done) if done.status() == BatchStatus::Completed => {
                let mut carried = done.clone();
                carried.step_execution_id = execution.id;
                ctx.repository.add_partition_execution(&carried).await?;
                debug!(step = %step.id, partition = index, "⏭️ PARTITION: Completed in previous attempt");
                execution.partition_executions.push(carried);
            }
            Some(unfinished) => {
                fresh.state.resume_from(&unfinished.state);
                pending.push(fresh);
            }
            None => pending.push(fresh),
        }
    }
    Ok(pending)
}

struct Aggregation {
    status: BatchStatus,
    failure: Option<FailureRecord>,
    finished: BTreeSet<usize>,
}

impl Aggregation {
    fn new() -> Self {
        Self {
            status: BatchStatus::Completed,
            failure: None,
            finished: BTreeSet::new(),
        }
    }

    fn fail(&mut self, failure: FailureRecord) {
        self.status = BatchStatus::Failed;
        self.failure.get_or_insert(failure);
    }

    async fn accept(
        &mut self,
        ctx: &JobContext,
        report: PartitionReport,
        execution: &mut StepExecution,
        analyzer: &mut Option<Box<dyn PartitionAnalyzer>>,
    ) {
        match report {
            PartitionReport::CollectorData(data) => {
                if let Some(analyzer) = analyzer.as_deref_mut() {
                    if let Err(err) = analyzer.analyze_collector_data(&data).await {
                        warn!(step = %execution.step_name, error = %err, "⚠️ PARTITION: Analyzer rejected collector data");
                        self.fail(err.to_failure_record());
                    }
                }
            }
            PartitionReport::Finished(partition) => {
                let status = partition.status();
                execution.state.metrics.add(&partition.state.metrics);
                if let Err(err) = ctx.repository.update_partition_execution(&partition).await {
                    self.fail(err.to_failure_record());
                }
                self.status = consolidate_status([self.status, status]);
                if status == BatchStatus::Failed {
                    let failure = partition.state.failure.clone().unwrap_or_else(|| {
                        FailureRecord::new("PartitionFailed", format!("partition {} failed", partition.partition_index))
                    });
                    self.failure.get_or_insert(failure);
                }
                if let Some(analyzer) = analyzer.as_deref_mut() {
                    let exit_status = partition.state.effective_exit_status();
                    if let Err(err) = analyzer.analyze_status(status, &exit_status).await {
                        warn!(step = %execution.step_name, error = %err, "⚠️ PARTITION: Analyzer rejected partition status");
                        self.fail(err.to_failure_record());
                    }
                }
                log_partition_operation(
                    "finished",
                    &partition.step_name,
                    partition.partition_index,
                    &status.to_string(),
                    partition.state.exit_status.as_deref(),
                );
                self.finished.insert(partition.partition_index);
                execution.partition_executions.push(partition);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn aggregate(
    ctx: &Arc<JobContext>,
    step: &Step,
    plan: &PartitionPlan,
    execution: &mut StepExecution,
    original: Option<&StepExecution>,
    analyzer: &mut Option<Box<dyn PartitionAnalyzer>>,
    reducer: &mut Option<Box<dyn PartitionReducer>>,
) -> BatchResult<()> {
    if original.is_some() && plan.partitions_override {
        if let Some(reducer) = reducer.as_deref_mut() {
            reducer.rollback_partitioned_step().await?;
        }
    }
    let pending = plan_partitions(ctx, step, plan, execution, original).await?;

    if let Some(reducer) = reducer.as_deref_mut() {
        reducer.begin_partitioned_step().await?;
    }

    let transactional = ctx
        .property(Some(step), properties::PARTITION_TRANSACTION)
        .map(|v| !v.trim().eq_ignore_ascii_case("false"))
        .unwrap_or(true);
    let mut transaction: Option<Box<dyn Transaction>> = if transactional {
        Some(
            ctx.transactions_for(step)
                .begin(ctx.config.transaction_timeout())
                .await?,
        )
    } else {
        None
    };

    let threads = ctx.config.partition_threads(plan.threads, plan.partitions);
    info!(
        step = %step.id,
        partitions = plan.partitions,
        pending = pending.len(),
        threads = threads,
        "🔀 PARTITION: Dispatching partitions"
    );

    let expected: Vec<usize> = pending.iter().map(|p| p.partition_index).collect();
    let semaphore = Arc::new(Semaphore::new(threads));
    let (reports, mut inbox) = mpsc::channel(ctx.config.partition_report_capacity.max(1));
    let mut workers = JoinSet::new();
    let mut aggregation = Aggregation::new();

    for partition in pending {
        let permit = loop {
            tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    break permit.map_err(|_| {
                        BatchError::OrchestrationError("partition semaphore closed".to_string())
                    })?;
                }
                Some(report) = inbox.recv() => {
                    aggregation.accept(ctx, report, execution, analyzer).await;
                }
            }
        };
        let properties = plan
            .properties_for(partition.partition_index)
            .cloned()
            .unwrap_or_default();
        workers.spawn(run_partition(
            Arc::clone(ctx),
            step.resolve_for_partition(&properties),
            partition,
            reports.clone(),
            permit,
        ));
    }
    drop(reports);

    while let Some(report) = inbox.recv().await {
        aggregation.accept(ctx, report, execution, analyzer).await;
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            warn!(step = %step.id, error = %err, "⚠️ PARTITION: Worker task did not complete");
        }
    }

    for index in expected {
        if !aggregation.finished.contains(&index) {
            let placeholder = PartitionExecution::failed_placeholder(execution.id, &step.id, index);
            if let Err(err) = ctx.repository.update_partition_execution(&placeholder).await {
                warn!(step = %step.id, partition = index, error = %err, "⚠️ PARTITION: Could not record missing partition");
            }
            aggregation.fail(FailureRecord::new(
                "PartitionLost",
                format!("partition {index} of step '{}' reported no result", step.id),
            ));
            execution.partition_executions.push(placeholder);
        }
    }
    execution
        .partition_executions
        .sort_by_key(|p| p.partition_index);

    let mut commit = aggregation.status == BatchStatus::Completed;
    if commit {
        if let Some(reducer) = reducer.as_deref_mut() {
            if let Err(err) = reducer.before_partitioned_step_completion().await {
                aggregation.fail(err.to_failure_record());
                commit = false;
            }
        }
    }
    if commit {
        if let Some(tx) = transaction.take() {
            if let Err(err) = tx.commit().await {
                aggregation.fail(err.to_failure_record());
                commit = false;
            }
        }
    }

    if commit {
        if let Some(reducer) = reducer.as_deref_mut() {
            if let Err(err) = reducer
                .after_partitioned_step_completion(PartitionStatus::Commit)
                .await
            {
                aggregation.fail(err.to_failure_record());
            }
        }
    } else {
        if let Some(tx) = transaction.take() {
            if let Err(err) = tx.rollback().await {
                warn!(step = %step.id, error = %err, "⚠️ PARTITION: Aggregation rollback failed");
            }
        }
        if let Some(reducer) = reducer.as_deref_mut() {
            if let Err(err) = reducer.rollback_partitioned_step().await {
                aggregation.fail(err.to_failure_record());
            }
            if let Err(err) = reducer
                .after_partitioned_step_completion(PartitionStatus::Rollback)
                .await
            {
                aggregation.fail(err.to_failure_record());
            }
        }
    }

    match aggregation.status {
        BatchStatus::Failed => {
            let failure = aggregation.failure.unwrap_or_else(|| {
                FailureRecord::new("PartitionFailed", "one or more partitions failed")
            });
            execution.state.fail(failure);
        }
        BatchStatus::Stopped => {
            execution.state.set_status(BatchStatus::Stopping);
        }
        _ => {}
    }
    Ok(())
}

async fn run_partition(
    ctx: Arc<JobContext>,
    step: Step,
    mut partition: PartitionExecution,
    reports: mpsc::Sender<PartitionReport>,
    _permit: OwnedSemaphorePermit,
) {
    let index = partition.partition_index;
    partition.state.set_status(BatchStatus::Started);
    log_partition_operation("start", &step.id, index, "STARTED", None);

    if let Err(err) = execute_partition(&ctx, &step, &mut partition, &reports).await {
        warn!(step = %step.id, partition = index, error = %err, "⚠️ PARTITION: Partition failed");
        partition.state.fail(err.to_failure_record());
    }
    partition.state.finish();

    if reports.send(PartitionReport::Finished(partition)).await.is_err() {
        warn!(step = %step.id, partition = index, "⚠️ PARTITION: Aggregator gone, result dropped");
    }
}

async fn execute_partition(
    ctx: &Arc<JobContext>,
    step: &Step,
    partition: &mut PartitionExecution,
    reports: &mpsc::Sender<PartitionReport>,
) -> BatchResult<()> {
    ctx.repository.add_partition_execution(partition).await?;

    let scope = StepScope::new(
        step.id.clone(),
        Some(partition.partition_index),
        step.properties.clone(),
        partition.state.persistent_user_data.clone(),
    );
    let context = ctx.artifacts.for_step(Arc::clone(&scope));
    // built per partition from the resolved step
    let listeners = ListenerSet::create(&*ctx.factory, &step.listeners, &context)?;
    let collector_reference = step.partition.as_ref().and_then(|p| p.collector.as_ref());
    let mut collector = match collector_reference {
        Some(reference) => match create_collector(&*ctx.factory, reference, &context) {
            Ok(collector) => Some(CollectorLink {
                collector,
                reports: reports.clone(),
            }),
            Err(err) => {
                listeners.destroy(&*ctx.factory);
                return Err(err);
            }
        },
        None => None,
    };

    let result = match (&step.chunk, &step.batchlet) {
        (Some(chunk), None) => {
            run_chunk(
                ctx,
                step,
                chunk,
                ExecutionUnit::Partition(partition),
                Arc::clone(&scope),
                listeners.chunk_related(),
                collector.take(),
            )
            .await
        }
        (None, Some(batchlet)) => {
            let ran = run_batchlet(ctx, batchlet, ExecutionUnit::Partition(partition), Arc::clone(&scope)).await;
            match (ran, collector.as_mut()) {
                (Ok(()), Some(link)) => link.report().await,
                (ran, _) => ran,
            }
        }
        _ => Err(BatchError::ConfigurationError(format!(
            "Step '{}' must declare exactly one of chunk or batchlet",
            step.id
        ))),
    };

    if let Some(reference) = collector_reference {
        ctx.factory.destroy(artifact_kinds::COLLECTOR, &reference.reference);
    }
    listeners.destroy(&*ctx.factory);
    if let Some(exit_status) = scope.exit_status() {
        partition.state.exit_status = Some(exit_status);
    }
    partition.state.persistent_user_data = scope.persistent_user_data();
    result
}
