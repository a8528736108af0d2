//! # Composite Orchestration
//!
//! Walks the elements of a job or flow in sequence and the flows of a split
//! in parallel, applying transitions between elements.
//!
//! ## Status Scopes
//!
//! Every element runs against a [`ScopeStack`]: the status cells of the job
//! and of each enclosing flow. Terminating transitions (`end`, `fail`,
//! `stop`) write every cell in the stack, and the walk halts as soon as any
//! cell leaves the running states or is marked ended. Flows of a split get a
//! detached root cell so that concurrent flows cannot overwrite each other;
//! the split folds their outcomes back into its own stack once all of them
//! finished.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{info, warn};

use super::context::{JobContext, ScopeKind, ScopeSnapshot, ScopeStack, StatusCell};
use super::step::run_step;
use super::transition::{resolve_transition, Resolution};
use crate::artifacts::factory::create_decider;
use crate::artifacts::StepScope;
use crate::constants::artifact_kinds;
use crate::definition::{find_element, Decision, Flow, JobElement, Split, Step, Transition};
use crate::error::{BatchError, BatchResult};
use crate::logging::log_error;
use crate::models::StepExecution;
use crate::state_machine::BatchStatus;

/// Run `elements` from `start`, or from the first non-abstract element.
///
/// Returns the step executions that finished last, which feed a decision
/// placed after this composite.
pub(crate) fn run_elements<'a>(
    ctx: &'a Arc<JobContext>,
    elements: &'a [JobElement],
    start: Option<&'a str>,
    scopes: &'a ScopeStack,
    prior: Vec<StepExecution>,
) -> BoxFuture<'a, BatchResult<Vec<StepExecution>>> {
    async move {
        let mut last = prior;
        let mut current = match start {
            Some(id) => Some(lookup(elements, id)?),
            None => {
                let head = elements.iter().find(|element| !element.is_abstract());
                if let Some(JobElement::Decision(decision)) = head {
                    warn!(decision = %decision.id, "❌ COMPOSITE: A decision cannot be the first element");
                    scopes.propagate(BatchStatus::Failed, None);
                    return Ok(last);
                }
                head
            }
        };

        while let Some(element) = current.take() {
            if ctx.stop.is_cancelled() {
                info!(element = %element.id(), "🛑 COMPOSITE: Stop requested, not starting element");
                break;
            }
            if scopes.depth() == 1 {
                ctx.set_current_element(element.id());
            }

            let next = match element {
                JobElement::Step(step) => match run_step(ctx, step, scopes).await {
                    Ok(execution) => {
                        let next = step_transition(ctx, step, &execution, scopes);
                        last = vec![execution];
                        next
                    }
                    Err(err) if err.is_configuration() => {
                        log_error(
                            "composite",
                            &step.id,
                            &err.to_string(),
                            Some(&format!("execution_id={}", ctx.execution_id())),
                        );
                        scopes.propagate(BatchStatus::Failed, None);
                        break;
                    }
                    Err(err) => return Err(err),
                },
                JobElement::Flow(flow) => {
                    let outcome = run_flow(ctx, flow, scopes).await;
                    if !outcome.last.is_empty() {
                        last = outcome.last;
                    }
                    outcome.next
                }
                JobElement::Split(split) => {
                    let (next, flows_last) = run_split(ctx, split, scopes).await;
                    last = flows_last;
                    next
                }
                JobElement::Decision(decision) => run_decision(ctx, decision, scopes, &last).await,
            };

            if scopes.should_halt() {
                break;
            }
            current = match next {
                Some(id) => Some(lookup(elements, &id)?),
                None => None,
            };
        }
        Ok(last)
    }
    .boxed()
}

fn lookup<'a>(elements: &'a [JobElement], id: &str) -> BatchResult<&'a JobElement> {
    find_element(elements, id).ok_or_else(|| {
        BatchError::OrchestrationError(format!("Unknown job element '{id}' in this scope"))
    })
}

/// Where to go after a step; a failed step may only move on through a
/// `next` transition to a step that has not run yet
fn step_transition(
    ctx: &JobContext,
    step: &Step,
    execution: &StepExecution,
    scopes: &ScopeStack,
) -> Option<String> {
    let exit_status = execution.exit_status();
    match execution.status() {
        BatchStatus::Completed => apply_transition(
            ctx,
            resolve_transition(&step.transitions, &exit_status, step.next.as_deref()),
            scopes,
            None,
        ),
        BatchStatus::Failed => match resolve_transition(&step.transitions, &exit_status, None) {
            Resolution::Matched(Transition::Next { to, .. }) => {
                if ctx.was_executed(to) {
                    None
                } else {
                    info!(step = %step.id, next = %to, "↪️ COMPOSITE: Continuing after failed step");
                    scopes.reset_started();
                    Some(to.clone())
                }
            }
            resolution => apply_transition(ctx, resolution, scopes, None),
        },
        _ => None,
    }
}

/// Apply a resolved transition to `scopes` and return the next element id.
///
/// `decided` is the decider's exit status; for decisions it stands in for a
/// missing transition exit status.
fn apply_transition(
    ctx: &JobContext,
    resolution: Resolution<'_>,
    scopes: &ScopeStack,
    decided: Option<&str>,
) -> Option<String> {
    match resolution {
        Resolution::Default(next) => next.map(str::to_string),
        Resolution::Matched(Transition::Next { to, .. }) => Some(to.clone()),
        Resolution::Matched(Transition::End { exit_status, .. }) => {
            scopes.propagate(BatchStatus::Completed, exit_status.as_deref().or(decided));
            scopes.mark_flows_ended();
            None
        }
        Resolution::Matched(Transition::Fail { exit_status, .. }) => {
            scopes.propagate(BatchStatus::Failed, exit_status.as_deref().or(decided));
            None
        }
        Resolution::Matched(Transition::Stop {
            exit_status,
            restart,
            ..
        }) => {
            scopes.propagate(BatchStatus::Stopped, exit_status.as_deref().or(decided));
            if let Some(restart) = restart {
                ctx.set_restart_position(restart.clone());
            }
            None
        }
    }
}

struct FlowOutcome {
    next: Option<String>,
    snapshot: ScopeSnapshot,
    last: Vec<StepExecution>,
}

async fn run_flow(ctx: &Arc<JobContext>, flow: &Flow, scopes: &ScopeStack) -> FlowOutcome {
    let cell = StatusCell::new(ScopeKind::Flow, flow.id.clone());
    cell.set_status(BatchStatus::Started);
    let inner = scopes.push(Arc::clone(&cell));
    info!(flow = %flow.id, "🧭 FLOW: Starting");

    let last = match run_elements(ctx, &flow.elements, None, &inner, Vec::new()).await {
        Ok(last) => last,
        Err(err) => {
            log_error(
                "flow",
                &flow.id,
                &err.to_string(),
                Some(&format!("execution_id={}", ctx.execution_id())),
            );
            inner.propagate(BatchStatus::Failed, None);
            Vec::new()
        }
    };

    if cell.status() == BatchStatus::Started {
        cell.set_status(if ctx.stop.is_cancelled() {
            BatchStatus::Stopped
        } else {
            BatchStatus::Completed
        });
    }
    let snapshot = cell.snapshot();
    info!(flow = %flow.id, status = %snapshot.status, ended = snapshot.ended, "🧭 FLOW: Finished");

    let next = if snapshot.status == BatchStatus::Completed && !snapshot.ended {
        let exit_status = cell.effective_exit_status();
        apply_transition(
            ctx,
            resolve_transition(&flow.transitions, &exit_status, flow.next.as_deref()),
            scopes,
            None,
        )
    } else {
        None
    };

    FlowOutcome {
        next,
        snapshot,
        last,
    }
}

/// Run the flows of `split` concurrently and consolidate their outcomes:
/// failed over stopped over completed-and-ended, first flow in definition
/// order winning within a category.
async fn run_split(
    ctx: &Arc<JobContext>,
    split: &Split,
    scopes: &ScopeStack,
) -> (Option<String>, Vec<StepExecution>) {
    info!(split = %split.id, flows = split.flows.len(), "🔀 SPLIT: Launching flows");

    let mut handles = Vec::with_capacity(split.flows.len());
    for flow in &split.flows {
        let ctx = Arc::clone(ctx);
        let flow = flow.clone();
        let root = StatusCell::new(ScopeKind::Split, split.id.clone());
        root.set_status(BatchStatus::Started);
        handles.push(tokio::spawn(async move {
            let scopes = ScopeStack::root(root);
            run_flow(&ctx, &flow, &scopes).await
        }));
    }

    let joined = tokio::time::timeout(ctx.config.split_timeout(), async {
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles.iter_mut() {
            outcomes.push(handle.await);
        }
        outcomes
    })
    .await;

    let outcomes: Vec<FlowOutcome> = match joined {
        Ok(results) => results
            .into_iter()
            .zip(&split.flows)
            .map(|(result, flow)| match result {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(split = %split.id, flow = %flow.id, error = %err, "❌ SPLIT: Flow task did not complete");
                    FlowOutcome {
                        next: None,
                        snapshot: ScopeSnapshot {
                            status: BatchStatus::Failed,
                            exit_status: None,
                            ended: false,
                        },
                        last: Vec::new(),
                    }
                }
            })
            .collect(),
        Err(_) => {
            for handle in &handles {
                handle.abort();
            }
            log_error(
                "split",
                &split.id,
                &BatchError::Timeout(format!(
                    "flows did not finish within {}s",
                    ctx.config.split_timeout_seconds
                ))
                .to_string(),
                Some(&format!("execution_id={}", ctx.execution_id())),
            );
            scopes.propagate(BatchStatus::Failed, None);
            return (None, Vec::new());
        }
    };

    let winner = outcomes
        .iter()
        .find(|o| o.snapshot.status == BatchStatus::Failed)
        .or_else(|| outcomes.iter().find(|o| o.snapshot.status == BatchStatus::Stopped))
        .or_else(|| {
            outcomes
                .iter()
                .find(|o| o.snapshot.status == BatchStatus::Completed && o.snapshot.ended)
        });

    if let Some(winner) = winner {
        let exit_status = winner.snapshot.exit_status.as_deref();
        info!(split = %split.id, status = %winner.snapshot.status, "🔀 SPLIT: Consolidated");
        scopes.propagate(winner.snapshot.status, exit_status);
        if winner.snapshot.ended {
            scopes.mark_flows_ended();
        }
        return (None, Vec::new());
    }

    info!(split = %split.id, "🔀 SPLIT: All flows completed");
    let last = outcomes.into_iter().flat_map(|o| o.last).collect();
    (split.next.clone(), last)
}

async fn run_decision(
    ctx: &Arc<JobContext>,
    decision: &Decision,
    scopes: &ScopeStack,
    last: &[StepExecution],
) -> Option<String> {
    let scope = StepScope::new(decision.id.clone(), None, decision.properties.clone(), None);
    let context = ctx.artifacts.for_step(scope);

    let decided = match create_decider(&*ctx.factory, &decision.decider, &context) {
        Ok(mut decider) => {
            let decided = decider.decide(last).await.map_err(BatchError::from);
            ctx.factory
                .destroy(artifact_kinds::DECIDER, &decision.decider.reference);
            decided
        }
        Err(err) => Err(err),
    };

    match decided {
        Ok(exit_status) => {
            info!(decision = %decision.id, exit_status = %exit_status, "🧭 DECISION: Decided");
            if let Some(cell) = scopes.innermost() {
                cell.set_exit_status(exit_status.as_str());
            }
            apply_transition(
                ctx,
                resolve_transition(&decision.transitions, &exit_status, None),
                scopes,
                Some(&exit_status),
            )
        }
        Err(err) => {
            log_error(
                "decision",
                &decision.id,
                &err.to_string(),
                Some(&format!("execution_id={}", ctx.execution_id())),
            );
            scopes.propagate(BatchStatus::Failed, None);
            None
        }
    }
}
