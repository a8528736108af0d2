//! # Artifact Registry
//!
//! Closure-based [`ArtifactFactory`] with thread-safe registration.
//!
//! ## Overview
//!
//! Each reference name maps to a builder closure that receives the full
//! [`ArtifactRequest`] (declared properties plus scope) and returns a fresh
//! artifact. Builders report failures through `anyhow`, which the registry
//! turns into [`BatchError::ArtifactCreation`].
//!
//! ## Usage
//!
//! ```rust
//! use tasker_batch::artifacts::{ArtifactRegistry, Batchlet, ArtifactResult};
//! use async_trait::async_trait;
//!
//! struct Noop;
//!
//! #[async_trait]
//! impl Batchlet for Noop {
//!     async fn process(&self) -> ArtifactResult<Option<String>> {
//!         Ok(Some("DONE".to_string()))
//!     }
//!     async fn stop(&self) -> ArtifactResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! let registry = ArtifactRegistry::new();
//! registry.register_batchlet("noop", |_request| Ok(Noop));
//! assert!(registry.is_registered("noop"));
//! ```

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::factory::{Artifact, ArtifactFactory, ArtifactRequest};
use super::listeners::Listener;
use super::traits::{
    Batchlet, CheckpointAlgorithm, Decider, ItemProcessor, ItemReader, ItemWriter,
    PartitionAnalyzer, PartitionCollector, PartitionMapper, PartitionReducer,
};
use crate::error::{BatchError, BatchResult};

type ArtifactBuilder = Arc<dyn Fn(&ArtifactRequest<'_>) -> anyhow::Result<Artifact> + Send + Sync>;

pub struct ArtifactRegistry {
    builders: DashMap<String, ArtifactBuilder>,
    created: AtomicU64,
    destroyed: AtomicU64,
}

macro_rules! typed_register {
    ($name:ident, $bound:ident, $variant:ident, $wrap:path) => {
        pub fn $name<F, A>(&self, reference: impl Into<String>, builder: F)
        where
            F: Fn(&ArtifactRequest<'_>) -> anyhow::Result<A> + Send + Sync + 'static,
            A: $bound + 'static,
        {
            self.register(reference, move |request| {
                builder(request).map(|artifact| Artifact::$variant($wrap(artifact)))
            });
        }
    };
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self {
            builders: DashMap::new(),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        }
    }

    /// Register a builder for any artifact kind, replacing a previous one
    pub fn register<F>(&self, reference: impl Into<String>, builder: F)
    where
        F: Fn(&ArtifactRequest<'_>) -> anyhow::Result<Artifact> + Send + Sync + 'static,
    {
        let reference = reference.into();
        debug!(reference = %reference, "📚 REGISTRY: Registering artifact builder");
        self.builders.insert(reference, Arc::new(builder));
    }

    typed_register!(register_reader, ItemReader, Reader, Box::new);
    typed_register!(register_processor, ItemProcessor, Processor, Box::new);
    typed_register!(register_writer, ItemWriter, Writer, Box::new);
    typed_register!(register_checkpoint_algorithm, CheckpointAlgorithm, CheckpointAlgorithm, Box::new);
    typed_register!(register_batchlet, Batchlet, Batchlet, Arc::new);
    typed_register!(register_listener, Listener, Listener, Arc::new);
    typed_register!(register_mapper, PartitionMapper, Mapper, Box::new);
    typed_register!(register_collector, PartitionCollector, Collector, Box::new);
    typed_register!(register_analyzer, PartitionAnalyzer, Analyzer, Box::new);
    typed_register!(register_reducer, PartitionReducer, Reducer, Box::new);
    typed_register!(register_decider, Decider, Decider, Box::new);

    /// Hand out the same listener instance for every request
    pub fn register_shared_listener(&self, reference: impl Into<String>, listener: Arc<dyn Listener>) {
        self.register(reference, move |_| Ok(Artifact::Listener(Arc::clone(&listener))));
    }

    pub fn is_registered(&self, reference: &str) -> bool {
        self.builders.contains_key(reference)
    }

    pub fn references(&self) -> Vec<String> {
        let mut references: Vec<String> = self.builders.iter().map(|e| e.key().clone()).collect();
        references.sort();
        references
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.builders.len(),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
        }
    }
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactFactory for ArtifactRegistry {
    fn create(&self, request: &ArtifactRequest<'_>) -> BatchResult<Artifact> {
        // clone the builder out so the map shard is not held while user code runs
        let builder = self
            .builders
            .get(request.reference)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BatchError::ArtifactCreation {
                reference: request.reference.to_string(),
                reason: "no artifact registered under this reference".to_string(),
            })?;

        let artifact = builder(request).map_err(|err| BatchError::ArtifactCreation {
            reference: request.reference.to_string(),
            reason: format!("{err:#}"),
        })?;
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(
            reference = %request.reference,
            kind = request.kind,
            "📚 REGISTRY: Created artifact"
        );
        Ok(artifact)
    }

    fn destroy(&self, kind: &'static str, reference: &str) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        debug!(reference = %reference, kind = kind, "📚 REGISTRY: Destroyed artifact");
    }
}

/// Registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub registered: usize,
    pub created: u64,
    pub destroyed: u64,
}
