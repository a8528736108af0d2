//! Element graph execution: sequencing, transitions, decisions, flows and splits.

mod common;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::artifacts::*;
use common::*;
use tasker_batch::definition::{Decision, Flow, JobElement, RefArtifact, Split, Transition};
use tasker_batch::models::RestartPosition;
use tasker_batch::{ArtifactRegistry, BatchError, BatchStatus, Job};

/// Registry with batchlets `ok` (no exit status), `fails`, and one per listed exit status
fn registry(exit_statuses: &[&str]) -> ArtifactRegistry {
    let registry = ArtifactRegistry::new();
    registry.register_batchlet("ok", |_| Ok(ExitBatchlet::new(None)));
    registry.register_batchlet("fails", |_| {
        Ok(ExitBatchlet::new(None).with_fault(Fault::always(&[0], "batchlet_failed"), 0))
    });
    for exit in exit_statuses {
        let exit = exit.to_string();
        registry.register_batchlet(exit.clone(), move |_| Ok(ExitBatchlet::new(Some(&exit))));
    }
    registry
}

fn step(id: &str, batchlet: &str) -> JobElement {
    JobElement::Step(batchlet_step(id, batchlet))
}

#[tokio::test]
async fn test_steps_run_in_next_order() {
    let engine = engine(registry(&["SAID_HELLO"]));
    let job = Job::new("sequence")
        .with_element(JobElement::Step(batchlet_step("a", "ok").with_next("c")))
        .with_element(step("b", "ok"))
        .with_element(JobElement::Step(batchlet_step("c", "SAID_HELLO")));

    let execution = run(&engine, job).await;
    let steps = steps_of(&engine, &execution).await;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.exit_status.as_deref(), Some("completed"));
    assert_eq!(step_names(&steps), vec!["a", "c"]);
    assert_eq!(steps[0].exit_status(), "completed");
    assert_eq!(steps[1].exit_status(), "SAID_HELLO");
}

#[tokio::test]
async fn test_next_transition_on_exit_status() {
    let engine = engine(registry(&["SKIP_B"]));
    let job = Job::new("transitions")
        .with_element(JobElement::Step(
            batchlet_step("a", "SKIP_B")
                .with_next("b")
                .with_transition(Transition::next("SKIP_*", "c")),
        ))
        .with_element(JobElement::Step(batchlet_step("b", "ok").with_next("c")))
        .with_element(step("c", "ok"));

    let execution = run(&engine, job).await;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(step_names(&steps_of(&engine, &execution).await), vec!["a", "c"]);
}

#[tokio::test]
async fn test_end_transition_completes_the_job_early() {
    let engine = engine(registry(&[]));
    let job = Job::new("end-early")
        .with_element(JobElement::Step(
            batchlet_step("a", "ok")
                .with_next("b")
                .with_transition(Transition::end("*", Some("DONE_EARLY"))),
        ))
        .with_element(step("b", "ok"));

    let execution = run(&engine, job).await;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.exit_status.as_deref(), Some("DONE_EARLY"));
    assert_eq!(step_names(&steps_of(&engine, &execution).await), vec!["a"]);
}

#[tokio::test]
async fn test_fail_transition_fails_the_job() {
    let engine = engine(registry(&["BAD_DATA"]));
    let job = Job::new("fail")
        .with_element(JobElement::Step(
            batchlet_step("a", "BAD_DATA")
                .with_next("b")
                .with_transition(Transition::fail("BAD_*", Some("REJECTED"))),
        ))
        .with_element(step("b", "ok"));

    let execution = run(&engine, job).await;

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(execution.exit_status.as_deref(), Some("REJECTED"));
    assert_eq!(step_names(&steps_of(&engine, &execution).await), vec!["a"]);
}

#[tokio::test]
async fn test_stop_transition_records_restart_position() {
    let engine = engine(registry(&["PAUSE"]));
    let job = Job::new("pause")
        .with_element(JobElement::Step(
            batchlet_step("a", "PAUSE")
                .with_next("b")
                .with_transition(Transition::stop("PAUSE", None, Some("b"))),
        ))
        .with_element(JobElement::Step(batchlet_step("b", "ok").with_next("c")))
        .with_element(step("c", "ok"));

    let first = run(&engine, job.clone()).await;
    assert_eq!(first.status, BatchStatus::Stopped);
    assert_eq!(first.exit_status.as_deref(), Some("stopped"));
    assert_eq!(first.restart_position, Some(RestartPosition::Element("b".to_string())));

    let second = rerun(&engine, job, first.id).await;
    assert_eq!(second.status, BatchStatus::Completed);
    assert_eq!(second.restart_position, None);
    assert_eq!(step_names(&steps_of(&engine, &second).await), vec!["b", "c"]);
}

#[tokio::test]
async fn test_failed_step_without_transition_fails_the_job() {
    let engine = engine(registry(&[]));
    let job = Job::new("failing")
        .with_element(JobElement::Step(batchlet_step("a", "fails").with_next("b")))
        .with_element(step("b", "ok"));

    let execution = run(&engine, job).await;
    let steps = steps_of(&engine, &execution).await;

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(step_names(&steps), vec!["a"]);
    assert_eq!(
        steps[0].state.failure.as_ref().map(|f| f.kind.as_str()),
        Some("batchlet_failed")
    );
}

#[tokio::test]
async fn test_failed_step_can_continue_through_next_transition() {
    let engine = engine(registry(&[]));
    let job = Job::new("recovering")
        .with_element(JobElement::Step(
            batchlet_step("a", "fails").with_transition(Transition::next("failed", "cleanup")),
        ))
        .with_element(step("cleanup", "ok"));

    let execution = run(&engine, job).await;
    let steps = steps_of(&engine, &execution).await;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(step_names(&steps), vec!["a", "cleanup"]);
    assert_eq!(steps[0].status(), BatchStatus::Failed);
}

#[tokio::test]
async fn test_step_with_both_chunk_and_batchlet_is_abandoned() {
    let engine = engine(registry(&[]));
    let invalid = batchlet_step("invalid", "ok").with_chunk(chunk(10));
    let job = Job::new("invalid").with_element(JobElement::Step(invalid));

    let execution = run(&engine, job).await;
    let steps = steps_of(&engine, &execution).await;

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(steps[0].status(), BatchStatus::Abandoned);
}

#[tokio::test]
async fn test_unknown_artifact_fails_the_step() {
    let engine = engine(registry(&[]));
    let job = Job::new("missing").with_element(step("a", "not-registered"));

    let execution = run(&engine, job).await;
    let steps = steps_of(&engine, &execution).await;

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(
        steps[0].state.failure.as_ref().map(|f| f.kind.as_str()),
        Some("artifact_creation_error")
    );
}

#[tokio::test]
async fn test_decision_routes_on_decider_exit_status() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(&[]);
    let decided = Arc::clone(&seen);
    registry.register_decider("router", move |_| {
        Ok(RecordingDecider::new("GO_C", Arc::clone(&decided)))
    });
    let engine = engine(registry);

    let job = Job::new("decision")
        .with_element(JobElement::Step(batchlet_step("a", "ok").with_next("route")))
        .with_element(JobElement::Decision(
            Decision::new("route", RefArtifact::new("router"))
                .with_transition(Transition::next("GO_C", "c"))
                .with_transition(Transition::next("*", "b")),
        ))
        .with_element(step("b", "ok"))
        .with_element(step("c", "ok"));

    let execution = run(&engine, job).await;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(step_names(&steps_of(&engine, &execution).await), vec!["a", "c"]);
    assert_eq!(*seen.lock(), vec!["a".to_string()]);
}

#[tokio::test]
async fn test_decision_exit_status_stands_in_for_end_transition() {
    let registry = registry(&[]);
    registry.register_decider("finisher", |_| {
        Ok(RecordingDecider::new("FINISHED", Arc::new(Mutex::new(Vec::new()))))
    });
    let engine = engine(registry);

    let job = Job::new("decided-end")
        .with_element(JobElement::Step(batchlet_step("a", "ok").with_next("decide")))
        .with_element(JobElement::Decision(
            Decision::new("decide", RefArtifact::new("finisher"))
                .with_transition(Transition::end("FINISH*", None)),
        ));

    let execution = run(&engine, job).await;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.exit_status.as_deref(), Some("FINISHED"));
}

#[tokio::test]
async fn test_decision_cannot_be_the_first_element() {
    let registry = registry(&[]);
    registry.register_decider("router", |_| {
        Ok(RecordingDecider::new("ANY", Arc::new(Mutex::new(Vec::new()))))
    });
    let engine = engine(registry);
    let job = Job::new("decision-first")
        .with_element(JobElement::Decision(Decision::new("route", RefArtifact::new("router"))))
        .with_element(step("a", "ok"));

    let execution = run(&engine, job).await;

    assert_eq!(execution.status, BatchStatus::Failed);
    assert!(steps_of(&engine, &execution).await.is_empty());
}

#[tokio::test]
async fn test_flow_runs_its_steps_then_moves_on() {
    let engine = engine(registry(&[]));
    let flow = Flow::new("prepare")
        .with_element(JobElement::Step(batchlet_step("fetch", "ok").with_next("unpack")))
        .with_element(step("unpack", "ok"))
        .with_next("load");
    let job = Job::new("flows")
        .with_element(JobElement::Flow(flow))
        .with_element(step("load", "ok"));

    let execution = run(&engine, job).await;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(
        step_names(&steps_of(&engine, &execution).await),
        vec!["fetch", "unpack", "load"]
    );
}

#[tokio::test]
async fn test_end_inside_a_flow_ends_the_job() {
    let engine = engine(registry(&[]));
    let flow = Flow::new("inner")
        .with_element(JobElement::Step(
            batchlet_step("only", "ok").with_transition(Transition::end("*", Some("FLOW_ENDED"))),
        ))
        .with_next("after");
    let job = Job::new("flow-end")
        .with_element(JobElement::Flow(flow))
        .with_element(step("after", "ok"));

    let execution = run(&engine, job).await;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.exit_status.as_deref(), Some("FLOW_ENDED"));
    assert_eq!(step_names(&steps_of(&engine, &execution).await), vec!["only"]);
}

fn split(flows: &[(&str, &str)]) -> Split {
    flows
        .iter()
        .fold(Split::new("parallel").with_next("after"), |split, (flow, batchlet)| {
            split.with_flow(
                Flow::new(*flow).with_element(step(&format!("{flow}-step"), batchlet)),
            )
        })
}

#[tokio::test]
async fn test_split_runs_all_flows_then_next() {
    let engine = engine(registry(&[]));
    let job = Job::new("split")
        .with_element(JobElement::Split(split(&[("left", "ok"), ("right", "ok")])))
        .with_element(step("after", "ok"));

    let execution = run(&engine, job).await;
    let mut names: Vec<String> = steps_of(&engine, &execution)
        .await
        .into_iter()
        .map(|s| s.step_name)
        .collect();
    names.sort();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(names, vec!["after", "left-step", "right-step"]);
}

#[tokio::test]
async fn test_failed_flow_fails_the_split() {
    let engine = engine(registry(&[]));
    let job = Job::new("split-failure")
        .with_element(JobElement::Split(split(&[("left", "ok"), ("right", "fails")])))
        .with_element(step("after", "ok"));

    let execution = run(&engine, job).await;
    let names: Vec<String> = steps_of(&engine, &execution)
        .await
        .into_iter()
        .map(|s| s.step_name)
        .collect();

    assert_eq!(execution.status, BatchStatus::Failed);
    assert!(!names.contains(&"after".to_string()));
}

#[tokio::test]
async fn test_failed_flow_outranks_stopped_and_completed_flows() {
    let engine = engine(registry(&["PAUSE"]));
    let halted = Flow::new("halted").with_element(JobElement::Step(
        batchlet_step("halted-step", "PAUSE").with_transition(Transition::stop("PAUSE", None, None)),
    ));
    let parallel = split(&[("done", "ok"), ("broken", "fails")]).with_flow(halted);
    let job = Job::new("three-flows")
        .with_element(JobElement::Split(parallel))
        .with_element(step("after", "ok"));

    let execution = run(&engine, job).await;
    let mut names: Vec<String> = steps_of(&engine, &execution)
        .await
        .into_iter()
        .map(|s| s.step_name)
        .collect();
    names.sort();

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(names, vec!["broken-step", "done-step", "halted-step"]);
}

#[tokio::test]
async fn test_decision_after_split_sees_every_flow() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(&[]);
    let decided = Arc::clone(&seen);
    registry.register_decider("router", move |_| {
        Ok(RecordingDecider::new("DONE", Arc::clone(&decided)))
    });
    let engine = engine(registry);

    let mut parallel = split(&[("left", "ok"), ("right", "ok")]);
    parallel.next = Some("route".to_string());
    let job = Job::new("split-decision")
        .with_element(JobElement::Split(parallel))
        .with_element(JobElement::Decision(Decision::new("route", RefArtifact::new("router"))));

    let execution = run(&engine, job).await;
    let mut fed = seen.lock().clone();
    fed.sort();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(fed, vec!["left-step".to_string(), "right-step".to_string()]);
}

#[tokio::test]
async fn test_loopback_is_rejected() {
    let engine = engine(registry(&[]));
    let job = Job::new("loop")
        .with_element(JobElement::Step(batchlet_step("a", "ok").with_next("b")))
        .with_element(JobElement::Step(
            batchlet_step("b", "ok").with_transition(Transition::next("*", "a")),
        ));

    let execution = run(&engine, job).await;

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(step_names(&steps_of(&engine, &execution).await), vec!["a", "b"]);
}

#[tokio::test]
async fn test_start_limit_blocks_further_restarts() {
    let engine = engine(registry(&[]));
    let job = Job::new("limited")
        .with_element(JobElement::Step(batchlet_step("a", "fails").with_start_limit(1)));

    let first = run(&engine, job.clone()).await;
    assert_eq!(first.status, BatchStatus::Failed);

    let second = rerun(&engine, job, first.id).await;
    assert_eq!(second.status, BatchStatus::Failed);
    assert!(steps_of(&engine, &second).await.is_empty());
}

#[tokio::test]
async fn test_completed_steps_are_skipped_on_restart() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fault = Fault::always(&[0], "flaky");
    let registry = registry(&[]);
    let counted = Arc::clone(&calls);
    registry.register_batchlet("counted", move |_| {
        Ok(ExitBatchlet::new(None).counting(Arc::clone(&counted)))
    });
    let flaky = fault.clone();
    registry.register_batchlet("flaky", move |_| {
        Ok(ExitBatchlet::new(None).with_fault(flaky.clone(), 0))
    });
    let engine = engine(registry);

    let job = Job::new("resume")
        .with_element(JobElement::Step(batchlet_step("a", "counted").with_next("b")))
        .with_element(JobElement::Step(batchlet_step("b", "flaky").with_next("again")))
        .with_element(JobElement::Step(
            batchlet_step("again", "counted").allow_start_if_complete(true),
        ));

    let first = run(&engine, job.clone()).await;
    assert_eq!(first.status, BatchStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    fault.disarm();
    let second = rerun(&engine, job, first.id).await;

    assert_eq!(second.status, BatchStatus::Completed);
    assert_eq!(step_names(&steps_of(&engine, &second).await), vec!["b", "again"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_job_and_step_listeners_are_invoked() {
    let registry = registry(&[]);
    let listener = Arc::new(CountingListener::default());
    registry.register_shared_listener("counting", listener.clone());
    let engine = engine(registry);

    let job = Job::new("listened")
        .with_listener(RefArtifact::new("counting"))
        .with_element(JobElement::Step(
            batchlet_step("a", "ok")
                .with_next("b")
                .with_listener(RefArtifact::new("counting")),
        ))
        .with_element(JobElement::Step(
            batchlet_step("b", "ok").with_listener(RefArtifact::new("counting")),
        ));

    let execution = run(&engine, job).await;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(CountingListener::count(&listener.before_job), 1);
    assert_eq!(CountingListener::count(&listener.after_job), 1);
    assert_eq!(CountingListener::count(&listener.before_step), 2);
    assert_eq!(CountingListener::count(&listener.after_step), 2);
}

#[tokio::test]
async fn test_restart_rejects_completed_execution() {
    let engine = engine(registry(&[]));
    let job = Job::new("done").with_element(step("a", "ok"));

    let execution = run(&engine, job.clone()).await;
    let err = engine
        .restart(job, execution.id, Default::default())
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::InvalidState(_)));
}

#[tokio::test]
async fn test_restart_rejects_unrestartable_job() {
    let engine = engine(registry(&[]));
    let job = Job::new("once").restartable(false).with_element(step("a", "fails"));

    let execution = run(&engine, job.clone()).await;
    assert_eq!(execution.restart_position, Some(RestartPosition::Unrestartable));

    let err = engine
        .restart(job, execution.id, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::InvalidState(_)));
}

#[tokio::test]
async fn test_only_the_latest_execution_can_restart() {
    let engine = engine(registry(&[]));
    let job = Job::new("retry-twice").with_element(step("a", "fails"));

    let first = run(&engine, job.clone()).await;
    let second = rerun(&engine, job.clone(), first.id).await;
    assert_eq!(second.status, BatchStatus::Failed);
    assert_eq!(second.instance_id, first.instance_id);

    let err = engine
        .restart(job, first.id, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::InvalidState(_)));
}
