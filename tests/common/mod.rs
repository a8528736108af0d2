//! Shared helpers for integration tests.
//!
//! Each test module pulls these in with `mod common;`. Not every module uses
//! every helper.
#![allow(dead_code)]

pub mod artifacts;
pub mod strategies;

use std::sync::Arc;

use tasker_batch::definition::{Chunk, Job, JobElement, Properties, RefArtifact, Step};
use tasker_batch::{ArtifactRegistry, BatchEngine, InMemoryJobRepository, JobExecution, StepExecution};

pub fn engine(registry: ArtifactRegistry) -> BatchEngine {
    BatchEngine::new(Arc::new(InMemoryJobRepository::new()), Arc::new(registry))
}

/// Start `job` and wait for its terminal record
pub async fn run(engine: &BatchEngine, job: Job) -> JobExecution {
    engine
        .start(job, Properties::new())
        .await
        .expect("job should start")
        .wait()
        .await
        .expect("job should finish")
}

/// Restart `execution_id` and wait for the new execution's terminal record
pub async fn rerun(engine: &BatchEngine, job: Job, execution_id: i64) -> JobExecution {
    engine
        .restart(job, execution_id, Properties::new())
        .await
        .expect("job should restart")
        .wait()
        .await
        .expect("restarted job should finish")
}

pub async fn steps_of(engine: &BatchEngine, execution: &JobExecution) -> Vec<StepExecution> {
    engine
        .step_executions(execution.id)
        .await
        .expect("step executions should load")
}

pub fn step_names(steps: &[StepExecution]) -> Vec<&str> {
    steps.iter().map(|s| s.step_name.as_str()).collect()
}

pub fn batchlet_step(id: &str, batchlet: &str) -> Step {
    Step::new(id).with_batchlet(RefArtifact::new(batchlet))
}

/// Single chunk step job reading with `reader` and writing with `writer`
pub fn chunk_job(id: &str, chunk: Chunk) -> Job {
    Job::new(id).with_element(JobElement::Step(Step::new("chunk-step").with_chunk(chunk)))
}

pub fn chunk(item_count: u32) -> Chunk {
    Chunk::new(RefArtifact::new("reader"), RefArtifact::new("writer")).item_count(item_count)
}

/// Inclusive range of item values, for readable group assertions
pub fn span(from: i64, to: i64) -> Vec<i64> {
    (from..=to).collect()
}

/// Inclusive range with `gap` left out
pub fn span_without(from: i64, to: i64, gap: i64) -> Vec<i64> {
    (from..=to).filter(|v| *v != gap).collect()
}

/// One single-item group per value
pub fn singles(values: impl IntoIterator<Item = i64>) -> Vec<Vec<i64>> {
    values.into_iter().map(|v| vec![v]).collect()
}
