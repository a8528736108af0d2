//! Test doubles for every artifact kind.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use tasker_batch::artifacts::{
    ArtifactError, ArtifactResult, Batchlet, ChunkListener, CheckpointAlgorithm, Decider, Item,
    ItemProcessor, ItemReader, ItemWriter, JobListener, Listener, PartitionAnalyzer,
    PartitionCollector, PartitionMapper, PartitionReducer, PartitionStatus, SkipProcessListener,
    SkipReadListener, StepListener,
};
use tasker_batch::definition::{PartitionPlan, Properties};
use tasker_batch::models::{CheckpointToken, OpaqueData, StepExecution};
use tasker_batch::BatchStatus;

/// Failure injected at given item values.
///
/// Clones share the armed flag, so a test can disarm a fault that an
/// artifact built by the registry holds.
#[derive(Debug, Clone)]
pub struct Fault {
    at: Vec<i64>,
    kind: String,
    once: bool,
    armed: Arc<AtomicBool>,
}

impl Fault {
    /// Fails every time one of `at` is seen, until disarmed
    pub fn always(at: &[i64], kind: &str) -> Self {
        Self {
            at: at.to_vec(),
            kind: kind.to_string(),
            once: false,
            armed: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Fails the first time one of `at` is seen
    pub fn once(at: &[i64], kind: &str) -> Self {
        Self {
            once: true,
            ..Self::always(at, kind)
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn check(&self, value: i64) -> ArtifactResult<()> {
        if self.at.contains(&value) && self.armed.load(Ordering::SeqCst) {
            if self.once {
                self.disarm();
            }
            return Err(ArtifactError::new(self.kind.clone(), format!("injected failure at {value}")));
        }
        Ok(())
    }
}

fn value_of(item: &Item) -> i64 {
    item.as_i64().unwrap_or(-1)
}

fn token(position: i64) -> ArtifactResult<CheckpointToken> {
    OpaqueData::from_json(&position).map_err(|err| ArtifactError::from_error("serde", err))
}

/// Reads the integers `start..end`.
///
/// The checkpoint is the last value handed out (or attempted), so a failed
/// read consumes its value.
pub struct RangeReader {
    start: i64,
    end: i64,
    next: i64,
    fault: Option<Fault>,
    delay: Option<Duration>,
}

impl RangeReader {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            next: start,
            fault: None,
            delay: None,
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ItemReader for RangeReader {
    async fn open(&mut self, checkpoint: Option<&CheckpointToken>) -> ArtifactResult<()> {
        self.next = match checkpoint {
            Some(token) => {
                let last: i64 = token
                    .to_json()
                    .map_err(|err| ArtifactError::from_error("serde", err))?;
                last + 1
            }
            None => self.start,
        };
        Ok(())
    }

    async fn read_item(&mut self) -> ArtifactResult<Option<Item>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.next >= self.end {
            return Ok(None);
        }
        let value = self.next;
        self.next += 1;
        if let Some(fault) = &self.fault {
            fault.check(value)?;
        }
        Ok(Some(json!(value)))
    }

    async fn checkpoint_info(&mut self) -> ArtifactResult<Option<CheckpointToken>> {
        token(self.next - 1).map(Some)
    }
}

pub type Groups = Arc<Mutex<Vec<Vec<i64>>>>;

/// Records every successfully written batch
pub struct RecordingWriter {
    groups: Groups,
    fault: Option<Fault>,
    written: Option<Arc<Notify>>,
}

impl RecordingWriter {
    pub fn new(groups: Groups) -> Self {
        Self {
            groups,
            fault: None,
            written: None,
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn notifying(mut self, written: Arc<Notify>) -> Self {
        self.written = Some(written);
        self
    }
}

#[async_trait]
impl ItemWriter for RecordingWriter {
    async fn open(&mut self, _checkpoint: Option<&CheckpointToken>) -> ArtifactResult<()> {
        Ok(())
    }

    async fn write_items(&mut self, items: &[Item]) -> ArtifactResult<()> {
        let values: Vec<i64> = items.iter().map(value_of).collect();
        if let Some(fault) = &self.fault {
            for value in &values {
                fault.check(*value)?;
            }
        }
        self.groups.lock().push(values);
        if let Some(written) = &self.written {
            written.notify_one();
        }
        Ok(())
    }
}

/// Passes items through, failing at the fault's values
pub struct FaultyProcessor {
    fault: Fault,
}

impl FaultyProcessor {
    pub fn new(fault: Fault) -> Self {
        Self { fault }
    }
}

#[async_trait]
impl ItemProcessor for FaultyProcessor {
    async fn process_item(&mut self, item: &Item) -> ArtifactResult<Option<Item>> {
        self.fault.check(value_of(item))?;
        Ok(Some(item.clone()))
    }
}

/// Drops odd values
pub struct EvenFilter;

#[async_trait]
impl ItemProcessor for EvenFilter {
    async fn process_item(&mut self, item: &Item) -> ArtifactResult<Option<Item>> {
        Ok((value_of(item) % 2 == 0).then(|| item.clone()))
    }
}

/// Ready after every `every` items
pub struct EveryNth {
    every: usize,
    seen: usize,
}

impl EveryNth {
    pub fn new(every: usize) -> Self {
        Self { every, seen: 0 }
    }
}

#[async_trait]
impl CheckpointAlgorithm for EveryNth {
    async fn begin_checkpoint(&mut self) -> ArtifactResult<()> {
        self.seen = 0;
        Ok(())
    }

    async fn is_ready_to_checkpoint(&mut self) -> ArtifactResult<bool> {
        self.seen += 1;
        Ok(self.seen >= self.every)
    }
}

/// Returns a fixed exit status, counting invocations
pub struct ExitBatchlet {
    exit_status: Option<String>,
    calls: Arc<AtomicUsize>,
    fault: Option<Fault>,
    index: i64,
}

impl ExitBatchlet {
    pub fn new(exit_status: Option<&str>) -> Self {
        Self {
            exit_status: exit_status.map(str::to_string),
            calls: Arc::new(AtomicUsize::new(0)),
            fault: None,
            index: 0,
        }
    }

    pub fn counting(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = calls;
        self
    }

    /// Fails while `fault` is armed for `index`
    pub fn with_fault(mut self, fault: Fault, index: i64) -> Self {
        self.fault = Some(fault);
        self.index = index;
        self
    }
}

#[async_trait]
impl Batchlet for ExitBatchlet {
    async fn process(&self) -> ArtifactResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = &self.fault {
            fault.check(self.index)?;
        }
        Ok(self.exit_status.clone())
    }

    async fn stop(&self) -> ArtifactResult<()> {
        Ok(())
    }
}

/// Blocks until stopped
#[derive(Default)]
pub struct StoppableBatchlet {
    pub started: Arc<Notify>,
    release: Notify,
    pub stop_calls: AtomicUsize,
}

#[async_trait]
impl Batchlet for StoppableBatchlet {
    async fn process(&self) -> ArtifactResult<Option<String>> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(None)
    }

    async fn stop(&self) -> ArtifactResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.release.notify_one();
        Ok(())
    }
}

/// Hands the engine a batchlet the test keeps a handle on
pub struct SharedBatchlet(pub Arc<StoppableBatchlet>);

#[async_trait]
impl Batchlet for SharedBatchlet {
    async fn process(&self) -> ArtifactResult<Option<String>> {
        self.0.process().await
    }

    async fn stop(&self) -> ArtifactResult<()> {
        self.0.stop().await
    }
}

/// Tracks how many instances run at once
pub struct ConcurrencyTracker {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyTracker {
    pub fn new(current: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Self {
        Self { current, peak }
    }
}

#[async_trait]
impl Batchlet for ConcurrencyTracker {
    async fn process(&self) -> ArtifactResult<Option<String>> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn stop(&self) -> ArtifactResult<()> {
        Ok(())
    }
}

/// Listener counting job, step, chunk and skip callbacks
#[derive(Debug, Default)]
pub struct CountingListener {
    pub before_job: AtomicUsize,
    pub after_job: AtomicUsize,
    pub before_step: AtomicUsize,
    pub after_step: AtomicUsize,
    pub before_chunk: AtomicUsize,
    pub after_chunk: AtomicUsize,
    pub skipped_reads: AtomicUsize,
    pub skipped_processes: AtomicUsize,
}

impl CountingListener {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobListener for CountingListener {
    async fn before_job(&self) -> ArtifactResult<()> {
        self.before_job.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn after_job(&self) -> ArtifactResult<()> {
        self.after_job.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl StepListener for CountingListener {
    async fn before_step(&self) -> ArtifactResult<()> {
        self.before_step.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn after_step(&self) -> ArtifactResult<()> {
        self.after_step.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ChunkListener for CountingListener {
    async fn before_chunk(&self) -> ArtifactResult<()> {
        self.before_chunk.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn after_chunk(&self) -> ArtifactResult<()> {
        self.after_chunk.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SkipReadListener for CountingListener {
    async fn on_skip_read_item(&self, _error: &ArtifactError) -> ArtifactResult<()> {
        self.skipped_reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SkipProcessListener for CountingListener {
    async fn on_skip_process_item(&self, _item: &Item, _error: &ArtifactError) -> ArtifactResult<()> {
        self.skipped_processes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Listener for CountingListener {
    fn as_job_listener(&self) -> Option<&dyn JobListener> {
        Some(self)
    }
    fn as_step_listener(&self) -> Option<&dyn StepListener> {
        Some(self)
    }
    fn as_chunk_listener(&self) -> Option<&dyn ChunkListener> {
        Some(self)
    }
    fn as_skip_read_listener(&self) -> Option<&dyn SkipReadListener> {
        Some(self)
    }
    fn as_skip_process_listener(&self) -> Option<&dyn SkipProcessListener> {
        Some(self)
    }
}

/// Returns a fixed decision and records which steps fed it
pub struct RecordingDecider {
    decision: String,
    seen: Arc<Mutex<Vec<String>>>,
}

impl RecordingDecider {
    pub fn new(decision: &str, seen: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            decision: decision.to_string(),
            seen,
        }
    }
}

#[async_trait]
impl Decider for RecordingDecider {
    async fn decide(&mut self, executions: &[StepExecution]) -> ArtifactResult<String> {
        self.seen
            .lock()
            .extend(executions.iter().map(|e| e.step_name.clone()));
        Ok(self.decision.clone())
    }
}

/// Splits `0..total` into `partitions` contiguous ranges
pub struct RangeMapper {
    partitions: usize,
    total: i64,
}

impl RangeMapper {
    pub fn new(partitions: usize, total: i64) -> Self {
        Self { partitions, total }
    }
}

#[async_trait]
impl PartitionMapper for RangeMapper {
    async fn map_partitions(&mut self) -> ArtifactResult<PartitionPlan> {
        Ok(range_plan(self.partitions, self.total))
    }
}

/// Plan with `start`/`end`/`index` properties per partition
pub fn range_plan(partitions: usize, total: i64) -> PartitionPlan {
    let size = total / partitions as i64;
    let mut plan = PartitionPlan::new(partitions);
    for index in 0..partitions {
        let start = index as i64 * size;
        let end = if index + 1 == partitions { total } else { start + size };
        let mut properties = Properties::new();
        properties.insert("start".to_string(), start.to_string());
        properties.insert("end".to_string(), end.to_string());
        properties.insert("index".to_string(), index.to_string());
        plan = plan.with_partition_properties(properties);
    }
    plan
}

/// Reports the partition's label once per call
pub struct LabelCollector {
    label: String,
}

impl LabelCollector {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

#[async_trait]
impl PartitionCollector for LabelCollector {
    async fn collect_partition_data(&mut self) -> ArtifactResult<Option<Item>> {
        Ok(Some(json!(self.label)))
    }
}

#[derive(Debug, Default)]
pub struct AnalyzerLog {
    pub data: Vec<Item>,
    pub statuses: Vec<BatchStatus>,
}

pub struct RecordingAnalyzer {
    log: Arc<Mutex<AnalyzerLog>>,
}

impl RecordingAnalyzer {
    pub fn new(log: Arc<Mutex<AnalyzerLog>>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl PartitionAnalyzer for RecordingAnalyzer {
    async fn analyze_collector_data(&mut self, data: &Item) -> ArtifactResult<()> {
        self.log.lock().data.push(data.clone());
        Ok(())
    }

    async fn analyze_status(&mut self, status: BatchStatus, _exit_status: &str) -> ArtifactResult<()> {
        self.log.lock().statuses.push(status);
        Ok(())
    }
}

pub struct RecordingReducer {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingReducer {
    pub fn new(calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self { calls }
    }
}

#[async_trait]
impl PartitionReducer for RecordingReducer {
    async fn begin_partitioned_step(&mut self) -> ArtifactResult<()> {
        self.calls.lock().push("begin".to_string());
        Ok(())
    }

    async fn before_partitioned_step_completion(&mut self) -> ArtifactResult<()> {
        self.calls.lock().push("before_completion".to_string());
        Ok(())
    }

    async fn rollback_partitioned_step(&mut self) -> ArtifactResult<()> {
        self.calls.lock().push("rollback".to_string());
        Ok(())
    }

    async fn after_partitioned_step_completion(&mut self, status: PartitionStatus) -> ArtifactResult<()> {
        self.calls.lock().push(format!("after:{status:?}"));
        Ok(())
    }
}
