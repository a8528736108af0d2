//! Batchlet runner: a single task-oriented invocation with stop support.

use std::sync::Arc;
use tracing::{debug, info};

use super::context::JobContext;
use super::unit::ExecutionUnit;
use crate::artifacts::factory::create_batchlet;
use crate::artifacts::StepScope;
use crate::constants::artifact_kinds;
use crate::definition::RefArtifact;
use crate::error::BatchResult;
use crate::state_machine::BatchStatus;

/// Invoke the batchlet referenced by `reference` for `unit`.
///
/// The batchlet is registered with the job's stop registry for the duration
/// of the call so a stop request reaches it. A stop that arrived before the
/// call skips the invocation entirely.
pub(crate) async fn run_batchlet(
    ctx: &JobContext,
    reference: &RefArtifact,
    mut unit: ExecutionUnit<'_>,
    scope: Arc<StepScope>,
) -> BatchResult<()> {
    let context = ctx.artifacts.for_step(Arc::clone(&scope));
    let batchlet = create_batchlet(&*ctx.factory, reference, &context)?;

    let result = {
        let _guard = ctx.stop_registry.register(Arc::clone(&batchlet));
        if ctx.stop.is_cancelled() {
            info!(
                step = %unit.step_name(),
                partition = ?unit.partition_index(),
                "🛑 BATCHLET: Stop already requested, not invoking"
            );
            unit.state_mut().set_status(BatchStatus::Stopping);
            Ok(())
        } else {
            debug!(
                step = %unit.step_name(),
                partition = ?unit.partition_index(),
                batchlet = %reference.reference,
                "⚙️ BATCHLET: Processing"
            );
            match batchlet.process().await {
                Ok(exit_status) => {
                    if let Some(exit_status) = exit_status {
                        scope.set_exit_status(exit_status);
                    }
                    if ctx.stop.is_cancelled() && unit.state().status() == BatchStatus::Started {
                        unit.state_mut().set_status(BatchStatus::Stopping);
                    }
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }
    };

    ctx.factory
        .destroy(artifact_kinds::BATCHLET, &reference.reference);
    result
}
