//! Step, chunk and partition definitions.
//!
//! Chunk attributes stay textual, exactly as declared. They are parsed and
//! validated when a chunk runner is built so that a malformed number surfaces
//! as a configuration failure of that step rather than of the whole job.

use serde::{Deserialize, Serialize};

use super::{ExceptionClassFilter, Properties, RefArtifact, Transition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub next: Option<String>,
    /// Maximum number of starts within one job instance, 0 means unlimited
    pub start_limit: u32,
    pub allow_start_if_complete: bool,
    /// Permit re-entering this step within the same job run
    pub allow_loopback: bool,
    pub is_abstract: bool,
    pub properties: Properties,
    pub listeners: Vec<RefArtifact>,
    pub chunk: Option<Chunk>,
    pub batchlet: Option<RefArtifact>,
    pub partition: Option<Partition>,
    pub transitions: Vec<Transition>,
}

impl Step {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            next: None,
            start_limit: 0,
            allow_start_if_complete: false,
            allow_loopback: false,
            is_abstract: false,
            properties: Properties::new(),
            listeners: Vec::new(),
            chunk: None,
            batchlet: None,
            partition: None,
            transitions: Vec::new(),
        }
    }

    pub fn with_chunk(mut self, chunk: Chunk) -> Self {
        self.chunk = Some(chunk);
        self
    }

    pub fn with_batchlet(mut self, batchlet: RefArtifact) -> Self {
        self.batchlet = Some(batchlet);
        self
    }

    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn with_listener(mut self, listener: RefArtifact) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_start_limit(mut self, start_limit: u32) -> Self {
        self.start_limit = start_limit;
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn allow_loopback(mut self, allow: bool) -> Self {
        self.allow_loopback = allow;
        self
    }

    pub fn as_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn is_partitioned(&self) -> bool {
        self.partition.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub reader: RefArtifact,
    pub processor: Option<RefArtifact>,
    pub writer: RefArtifact,
    /// `item` (default) or `custom`
    pub checkpoint_policy: Option<String>,
    pub item_count: Option<String>,
    /// Seconds, 0 disables the time limit
    pub time_limit: Option<String>,
    /// Absent or negative means unbounded
    pub skip_limit: Option<String>,
    pub retry_limit: Option<String>,
    pub checkpoint_algorithm: Option<RefArtifact>,
    pub skippable_exception_classes: ExceptionClassFilter,
    pub retryable_exception_classes: ExceptionClassFilter,
    pub no_rollback_exception_classes: ExceptionClassFilter,
}

impl Chunk {
    pub fn new(reader: RefArtifact, writer: RefArtifact) -> Self {
        Self {
            reader,
            processor: None,
            writer,
            checkpoint_policy: None,
            item_count: None,
            time_limit: None,
            skip_limit: None,
            retry_limit: None,
            checkpoint_algorithm: None,
            skippable_exception_classes: ExceptionClassFilter::default(),
            retryable_exception_classes: ExceptionClassFilter::default(),
            no_rollback_exception_classes: ExceptionClassFilter::default(),
        }
    }

    pub fn with_processor(mut self, processor: RefArtifact) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn item_count(mut self, item_count: impl ToString) -> Self {
        self.item_count = Some(item_count.to_string());
        self
    }

    pub fn time_limit(mut self, seconds: impl ToString) -> Self {
        self.time_limit = Some(seconds.to_string());
        self
    }

    pub fn skip_limit(mut self, limit: impl ToString) -> Self {
        self.skip_limit = Some(limit.to_string());
        self
    }

    pub fn retry_limit(mut self, limit: impl ToString) -> Self {
        self.retry_limit = Some(limit.to_string());
        self
    }

    pub fn custom_checkpoint(mut self, algorithm: RefArtifact) -> Self {
        self.checkpoint_policy = Some(crate::constants::checkpoint_policy::CUSTOM.to_string());
        self.checkpoint_algorithm = Some(algorithm);
        self
    }

    pub fn checkpoint_policy(mut self, policy: impl Into<String>) -> Self {
        self.checkpoint_policy = Some(policy.into());
        self
    }

    pub fn skippable(mut self, filter: ExceptionClassFilter) -> Self {
        self.skippable_exception_classes = filter;
        self
    }

    pub fn retryable(mut self, filter: ExceptionClassFilter) -> Self {
        self.retryable_exception_classes = filter;
        self
    }

    pub fn no_rollback(mut self, filter: ExceptionClassFilter) -> Self {
        self.no_rollback_exception_classes = filter;
        self
    }

    /// Every artifact reference the chunk declares
    pub(crate) fn artifacts_mut(&mut self) -> impl Iterator<Item = &mut RefArtifact> {
        [Some(&mut self.reader), Some(&mut self.writer)]
            .into_iter()
            .chain([self.processor.as_mut(), self.checkpoint_algorithm.as_mut()])
            .flatten()
    }
}

/// Partition configuration: either a static plan or a mapper, never both
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Partition {
    pub mapper: Option<RefArtifact>,
    pub plan: Option<PartitionPlan>,
    pub collector: Option<RefArtifact>,
    pub analyzer: Option<RefArtifact>,
    pub reducer: Option<RefArtifact>,
}

impl Partition {
    pub fn with_plan(plan: PartitionPlan) -> Self {
        Self {
            plan: Some(plan),
            ..Self::default()
        }
    }

    pub fn with_mapper(mapper: RefArtifact) -> Self {
        Self {
            mapper: Some(mapper),
            ..Self::default()
        }
    }

    pub fn collector(mut self, collector: RefArtifact) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn analyzer(mut self, analyzer: RefArtifact) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn reducer(mut self, reducer: RefArtifact) -> Self {
        self.reducer = Some(reducer);
        self
    }
}

/// Number of partitions, worker threads and per-partition properties.
///
/// Also the value a partition mapper returns. `partitions_override` is only
/// meaningful for mapper-produced plans: on restart it discards the previous
/// attempt's partitions instead of recovering them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub partitions: usize,
    /// 0 means one thread per partition
    pub threads: usize,
    pub partitions_override: bool,
    /// Indexed by partition; partitions beyond the list get no properties
    pub properties: Vec<Properties>,
}

impl PartitionPlan {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions,
            ..Self::default()
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn partitions_override(mut self, partitions_override: bool) -> Self {
        self.partitions_override = partitions_override;
        self
    }

    pub fn with_partition_properties(mut self, properties: Properties) -> Self {
        self.properties.push(properties);
        self
    }

    pub fn properties_for(&self, index: usize) -> Option<&Properties> {
        self.properties.get(index)
    }
}
