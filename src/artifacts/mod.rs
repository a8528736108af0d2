//! # Batch Artifacts
//!
//! Capability traits implemented by user code (readers, processors, writers,
//! batchlets, listeners, partition hooks, deciders) and the factory the
//! runtime uses to obtain them.
//!
//! ## Key Features
//!
//! - **Capability traits** rather than a class hierarchy. One listener object
//!   may expose several listener capabilities through [`Listener`].
//! - **Typed failures**: every artifact reports [`ArtifactError`], whose kind
//!   and ancestor kinds drive skip/retry/no-rollback filters.
//! - **Factory seam**: [`ArtifactFactory`] builds artifacts from a reference
//!   name, its configured properties and the scope it runs in.
//!   [`ArtifactRegistry`] is the closure-based implementation.

pub mod factory;
pub mod listeners;
pub mod registry;
pub mod scope;
pub mod traits;

use thiserror::Error;

use crate::models::FailureRecord;

pub use factory::{Artifact, ArtifactFactory, ArtifactRequest};
pub use listeners::{
    ChunkListener, ItemProcessListener, ItemReadListener, ItemWriteListener, JobListener, Listener,
    RetryProcessListener, RetryReadListener, RetryWriteListener, SkipProcessListener,
    SkipReadListener, SkipWriteListener, StepListener,
};
pub use registry::ArtifactRegistry;
pub use scope::{ArtifactContext, StepScope};
pub use traits::{
    Batchlet, CheckpointAlgorithm, Decider, Item, ItemProcessor, ItemReader, ItemWriter,
    PartitionAnalyzer, PartitionCollector, PartitionMapper, PartitionReducer, PartitionStatus,
};

/// Failure raised by a user artifact.
///
/// `kind` identifies the failure, `ancestors` lists broader kinds it belongs
/// to, nearest first. Exception class filters match against both.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ArtifactError {
    kind: String,
    ancestors: Vec<String>,
    message: String,
}

impl ArtifactError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ancestors: Vec::new(),
            message: message.into(),
        }
    }

    pub fn with_ancestors<I, S>(mut self, ancestors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ancestors.extend(ancestors.into_iter().map(Into::into));
        self
    }

    /// Wrap any displayable error under the given kind
    pub fn from_error<E: std::fmt::Display>(kind: impl Into<String>, error: E) -> Self {
        Self::new(kind, error.to_string())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Kind itself or any ancestor equals `kind`
    pub fn is_a(&self, kind: &str) -> bool {
        self.kind == kind || self.ancestors.iter().any(|a| a == kind)
    }

    pub fn to_failure_record(&self) -> FailureRecord {
        FailureRecord::new(self.kind.clone(), self.message.clone())
    }
}

impl From<anyhow::Error> for ArtifactError {
    fn from(err: anyhow::Error) -> Self {
        Self::new("unclassified", format!("{err:#}"))
    }
}

pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_a_checks_ancestors() {
        let err = ArtifactError::new("csv_parse", "bad row").with_ancestors(["parse", "data"]);
        assert!(err.is_a("csv_parse"));
        assert!(err.is_a("data"));
        assert!(!err.is_a("io"));
        assert_eq!(err.to_string(), "bad row");
    }

    #[test]
    fn test_anyhow_conversion_keeps_context() {
        let err: ArtifactError = anyhow::anyhow!("inner").context("outer").into();
        assert_eq!(err.kind(), "unclassified");
        assert_eq!(err.message(), "outer: inner");
    }
}
