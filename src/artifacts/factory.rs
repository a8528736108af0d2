//! Artifact factory seam.
//!
//! The runtime asks the factory for an artifact by reference name, declared
//! properties, the kind of capability it needs and the scope it runs in. It
//! calls [`ArtifactFactory::destroy`] once it is done with the instance.

use std::fmt;
use std::sync::Arc;

use super::listeners::Listener;
use super::scope::ArtifactContext;
use super::traits::{
    Batchlet, CheckpointAlgorithm, Decider, ItemProcessor, ItemReader, ItemWriter,
    PartitionAnalyzer, PartitionCollector, PartitionMapper, PartitionReducer,
};
use crate::constants::artifact_kinds;
use crate::definition::{Properties, RefArtifact};
use crate::error::{BatchError, BatchResult};

/// An instantiated artifact, tagged with its capability
pub enum Artifact {
    Reader(Box<dyn ItemReader>),
    Processor(Box<dyn ItemProcessor>),
    Writer(Box<dyn ItemWriter>),
    CheckpointAlgorithm(Box<dyn CheckpointAlgorithm>),
    Batchlet(Arc<dyn Batchlet>),
    Listener(Arc<dyn Listener>),
    Mapper(Box<dyn PartitionMapper>),
    Collector(Box<dyn PartitionCollector>),
    Analyzer(Box<dyn PartitionAnalyzer>),
    Reducer(Box<dyn PartitionReducer>),
    Decider(Box<dyn Decider>),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reader(_) => artifact_kinds::READER,
            Self::Processor(_) => artifact_kinds::PROCESSOR,
            Self::Writer(_) => artifact_kinds::WRITER,
            Self::CheckpointAlgorithm(_) => artifact_kinds::CHECKPOINT_ALGORITHM,
            Self::Batchlet(_) => artifact_kinds::BATCHLET,
            Self::Listener(_) => artifact_kinds::LISTENER,
            Self::Mapper(_) => artifact_kinds::MAPPER,
            Self::Collector(_) => artifact_kinds::COLLECTOR,
            Self::Analyzer(_) => artifact_kinds::ANALYZER,
            Self::Reducer(_) => artifact_kinds::REDUCER,
            Self::Decider(_) => artifact_kinds::DECIDER,
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Artifact").field(&self.kind()).finish()
    }
}

/// Everything a factory needs to build one artifact
#[derive(Debug, Clone, Copy)]
pub struct ArtifactRequest<'a> {
    pub kind: &'static str,
    pub reference: &'a str,
    pub properties: &'a Properties,
    pub context: &'a ArtifactContext,
}

impl ArtifactRequest<'_> {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

pub trait ArtifactFactory: Send + Sync {
    fn create(&self, request: &ArtifactRequest<'_>) -> BatchResult<Artifact>;

    /// Release an instance obtained from `create`
    fn destroy(&self, _kind: &'static str, _reference: &str) {}
}

macro_rules! typed_create {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $kind:expr, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(
            factory: &dyn ArtifactFactory,
            artifact: &RefArtifact,
            context: &ArtifactContext,
        ) -> BatchResult<$ty> {
            let request = ArtifactRequest {
                kind: $kind,
                reference: &artifact.reference,
                properties: &artifact.properties,
                context,
            };
            match factory.create(&request)? {
                Artifact::$variant(inner) => Ok(inner),
                other => Err(BatchError::ArtifactCreation {
                    reference: artifact.reference.clone(),
                    reason: format!("expected a {} but the factory produced a {}", $kind, other.kind()),
                }),
            }
        }
    };
}

typed_create!(create_reader, Reader, artifact_kinds::READER, Box<dyn ItemReader>);
typed_create!(create_processor, Processor, artifact_kinds::PROCESSOR, Box<dyn ItemProcessor>);
typed_create!(create_writer, Writer, artifact_kinds::WRITER, Box<dyn ItemWriter>);
typed_create!(
    create_checkpoint_algorithm,
    CheckpointAlgorithm,
    artifact_kinds::CHECKPOINT_ALGORITHM,
    Box<dyn CheckpointAlgorithm>
);
typed_create!(create_batchlet, Batchlet, artifact_kinds::BATCHLET, Arc<dyn Batchlet>);
typed_create!(
    /// Listeners are shared, one object may serve several categories
    create_listener,
    Listener,
    artifact_kinds::LISTENER,
    Arc<dyn Listener>
);
typed_create!(create_mapper, Mapper, artifact_kinds::MAPPER, Box<dyn PartitionMapper>);
typed_create!(create_collector, Collector, artifact_kinds::COLLECTOR, Box<dyn PartitionCollector>);
typed_create!(create_analyzer, Analyzer, artifact_kinds::ANALYZER, Box<dyn PartitionAnalyzer>);
typed_create!(create_reducer, Reducer, artifact_kinds::REDUCER, Box<dyn PartitionReducer>);
typed_create!(create_decider, Decider, artifact_kinds::DECIDER, Box<dyn Decider>);
