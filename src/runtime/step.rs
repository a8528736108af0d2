//! Step runner: restart bookkeeping, start limits, listeners and dispatch to
//! the chunk, batchlet or partition runner.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::batchlet::run_batchlet;
use super::chunk::run_chunk;
use super::context::{JobContext, ScopeStack};
use super::listeners::ListenerSet;
use super::partition::run_partitioned;
use super::unit::ExecutionUnit;
use crate::artifacts::StepScope;
use crate::definition::Step;
use crate::error::{BatchError, BatchResult};
use crate::logging::{log_error, log_step_operation};
use crate::models::{FailureRecord, StepExecution};
use crate::state_machine::BatchStatus;

/// Execute `step` and return its final record.
///
/// Loopback and start-limit violations are returned as errors before any
/// execution record is created. Everything that goes wrong after the step
/// started is captured on the returned record instead.
#[instrument(skip(ctx, step, scopes), fields(step = %step.id, execution_id = ctx.execution_id()))]
pub(crate) async fn run_step(
    ctx: &Arc<JobContext>,
    step: &Step,
    scopes: &ScopeStack,
) -> BatchResult<StepExecution> {
    let original = if ctx.is_restart() {
        ctx.repository
            .find_original_step_execution_for_restart(&step.id, ctx.instance_id(), ctx.execution_id())
            .await?
    } else {
        None
    };

    if let Some(original) = &original {
        if original.status() == BatchStatus::Completed && !step.allow_start_if_complete {
            info!(
                step = %step.id,
                original_step_execution = original.id,
                "⏭️ STEP: Completed in a previous execution, skipping"
            );
            return Ok(original.clone());
        }
    }

    if ctx.was_executed(&step.id) && !step.allow_loopback {
        return Err(BatchError::Loopback {
            step: step.id.clone(),
            sequence: ctx.executed_sequence(),
        });
    }

    if step.start_limit > 0 {
        let count = ctx
            .repository
            .count_step_start_times(&step.id, ctx.instance_id())
            .await?;
        if count >= step.start_limit {
            return Err(BatchError::StartLimitExceeded {
                step: step.id.clone(),
                limit: step.start_limit,
                count,
            });
        }
    }

    let mut execution = StepExecution::new(ctx.execution_id(), &step.id);
    execution.state.set_status(BatchStatus::Started);
    let resumable = original
        .as_ref()
        .filter(|o| o.status() != BatchStatus::Completed && !step.is_partitioned());
    if let Some(resumable) = resumable {
        execution.state.resume_from(&resumable.state);
    }
    let mut execution = ctx.repository.add_step_execution(&execution).await?;
    let step_execution_id = execution.id;
    ctx.update_execution(|job| job.step_execution_ids.push(step_execution_id));
    ctx.record_executed(&step.id);
    log_step_operation(
        "start",
        Some(ctx.execution_id()),
        Some(execution.id),
        &step.id,
        "STARTED",
        original.as_ref().map(|_| "restart"),
    );

    if step.chunk.is_some() == step.batchlet.is_some() {
        let failure = FailureRecord::new(
            "configuration_error",
            format!("Step '{}' must declare exactly one of chunk or batchlet", step.id),
        );
        execution.state.failure = Some(failure);
        execution.state.set_status(BatchStatus::Abandoned);
        scopes.propagate(BatchStatus::Failed, None);
        ctx.repository.update_step_execution(&execution).await?;
        log_step_operation(
            "finish",
            Some(ctx.execution_id()),
            Some(execution.id),
            &step.id,
            "ABANDONED",
            Some("invalid step definition"),
        );
        return Ok(execution);
    }

    let scope = StepScope::new(
        step.id.clone(),
        None,
        step.properties.clone(),
        execution.state.persistent_user_data.clone(),
    );
    let context = ctx.artifacts.for_step(Arc::clone(&scope));
    let listeners = match ListenerSet::create(&*ctx.factory, &step.listeners, &context) {
        Ok(listeners) => listeners,
        Err(err) => {
            record_failure(ctx, &mut execution, &err);
            ListenerSet::default()
        }
    };

    if execution.status() == BatchStatus::Started {
        if let Err(err) = run_body(ctx, step, &mut execution, original.as_ref(), &scope, &listeners).await {
            record_failure(ctx, &mut execution, &err);
        }
        if let Err(err) = listeners.after_step().await {
            record_failure(ctx, &mut execution, &BatchError::from(err));
        }
    }

    if let Some(exit_status) = scope.exit_status() {
        execution.state.exit_status = Some(exit_status);
    }
    execution.state.persistent_user_data = scope.persistent_user_data();
    execution.state.finish();

    if matches!(execution.status(), BatchStatus::Failed | BatchStatus::Abandoned) {
        scopes.propagate(BatchStatus::Failed, None);
    }

    ctx.repository.update_step_execution(&execution).await?;
    listeners.destroy(&*ctx.factory);

    log_step_operation(
        "finish",
        Some(ctx.execution_id()),
        Some(execution.id),
        &step.id,
        &execution.status().to_string(),
        execution.state.exit_status.as_deref(),
    );
    Ok(execution)
}

async fn run_body(
    ctx: &Arc<JobContext>,
    step: &Step,
    execution: &mut StepExecution,
    original: Option<&StepExecution>,
    scope: &Arc<StepScope>,
    listeners: &ListenerSet,
) -> BatchResult<()> {
    listeners.before_step().await?;

    if let Some(partition) = &step.partition {
        return run_partitioned(ctx, step, partition, execution, original, Arc::clone(scope))
            .await;
    }

    match (&step.chunk, &step.batchlet) {
        (Some(chunk), None) => {
            run_chunk(
                ctx,
                step,
                chunk,
                ExecutionUnit::Step(execution),
                Arc::clone(scope),
                listeners.chunk_related(),
                None,
            )
            .await
        }
        (None, Some(batchlet)) => {
            run_batchlet(ctx, batchlet, ExecutionUnit::Step(execution), Arc::clone(scope)).await
        }
        _ => Err(BatchError::ConfigurationError(format!(
            "Step '{}' must declare exactly one of chunk or batchlet",
            step.id
        ))),
    }
}

fn record_failure(ctx: &JobContext, execution: &mut StepExecution, err: &BatchError) {
    warn!(step = %execution.step_name, error = %err, "❌ STEP: Step failed");
    log_error(
        "step",
        &execution.step_name,
        &err.to_string(),
        Some(&format!("execution_id={}", ctx.execution_id())),
    );
    execution.state.fail(err.to_failure_record());
}
