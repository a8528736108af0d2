//! Job runner: job listeners, the top-level element walk and the final
//! status, exit status and restart position of the execution.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

use super::composite::run_elements;
use super::context::{JobContext, ScopeStack};
use super::listeners::ListenerSet;
use crate::error::BatchResult;
use crate::logging::{log_error, log_job_operation};
use crate::models::{JobExecution, RestartPosition};
use crate::repository::JobExecutionUpdate;
use crate::state_machine::BatchStatus;

/// Drive one job execution to a terminal status.
///
/// The final record is always persisted. Orchestration errors (an unknown
/// element id, a repository failure) are returned after the execution has
/// been recorded as failed.
#[instrument(skip(ctx), fields(job = %ctx.job.id, execution_id = ctx.execution_id()))]
pub async fn run_job(ctx: Arc<JobContext>) -> BatchResult<JobExecution> {
    let job = Arc::clone(&ctx.job);
    let cell = Arc::clone(ctx.job_cell());
    if cell.status() != BatchStatus::Stopping {
        cell.set_status(BatchStatus::Started);
    }

    let start = ctx.execution().restart_position.and_then(|position| match position {
        RestartPosition::Element(element) => Some(element),
        RestartPosition::Unrestartable => None,
    });
    ctx.update_execution(|execution| {
        execution.status = cell.status();
        execution.start_time = Some(Utc::now());
        execution.restart_position = None;
        execution.touch();
    });
    ctx.repository
        .update_job_execution(&ctx.execution(), JobExecutionUpdate::Partial)
        .await?;
    log_job_operation(
        "start",
        &job.id,
        Some(ctx.execution_id()),
        &cell.status().to_string(),
        start.as_deref(),
    );

    let listeners = match ListenerSet::create(&*ctx.factory, &job.listeners, &ctx.artifacts) {
        Ok(listeners) => listeners,
        Err(err) => {
            fail_job(&ctx, "create_listeners", &err.to_string());
            ListenerSet::default()
        }
    };

    let mut orchestration_error = None;
    if cell.status() == BatchStatus::Started {
        if let Err(err) = listeners.before_job().await {
            fail_job(&ctx, "before_job", &err.to_string());
        }
    }
    if cell.status() == BatchStatus::Started {
        let scopes = ScopeStack::root(Arc::clone(&cell));
        if let Err(err) = run_elements(&ctx, &job.elements, start.as_deref(), &scopes, Vec::new()).await {
            fail_job(&ctx, "run_elements", &err.to_string());
            orchestration_error = Some(err);
        }
    }
    if let Err(err) = listeners.after_job().await {
        fail_job(&ctx, "after_job", &err.to_string());
    }

    let status = match cell.status() {
        BatchStatus::Starting | BatchStatus::Started if ctx.stop.is_cancelled() => BatchStatus::Stopped,
        BatchStatus::Starting | BatchStatus::Started => BatchStatus::Completed,
        BatchStatus::Stopping => BatchStatus::Stopped,
        other => other,
    };
    cell.set_status(status);

    let restart_position = if !job.restartable {
        Some(RestartPosition::Unrestartable)
    } else if status == BatchStatus::Stopped {
        ctx.restart_position()
            .or_else(|| ctx.current_element().map(RestartPosition::Element))
    } else {
        None
    };
    if let Some(RestartPosition::Element(element)) = &restart_position {
        info!(element = %element, "🛑 JOB: Restart position recorded");
    }

    let exit_status = cell.effective_exit_status();
    ctx.update_execution(|execution| {
        execution.status = status;
        execution.exit_status = Some(exit_status.clone());
        execution.end_time = Some(Utc::now());
        execution.restart_position = restart_position;
        execution.touch();
    });
    let execution = ctx.execution();
    ctx.repository
        .update_job_execution(&execution, JobExecutionUpdate::Full)
        .await?;
    listeners.destroy(&*ctx.factory);

    log_job_operation(
        "finish",
        &job.id,
        Some(execution.id),
        &status.to_string(),
        Some(&exit_status),
    );

    match orchestration_error {
        Some(err) => Err(err),
        None => Ok(execution),
    }
}

fn fail_job(ctx: &JobContext, operation: &str, error: &str) {
    log_error(
        "job",
        operation,
        error,
        Some(&format!("job={} execution_id={}", ctx.job.id, ctx.execution_id())),
    );
    ctx.job_cell().set_status(BatchStatus::Failed);
}
