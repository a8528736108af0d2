//! Listener fan-out.
//!
//! A [`ListenerSet`] holds the listener objects configured on a job or step
//! and invokes every one that exposes the requested capability, in
//! declaration order, stopping at the first failure.

use std::sync::Arc;

use crate::artifacts::factory::create_listener;
use crate::artifacts::{ArtifactContext, ArtifactError, ArtifactFactory, ArtifactResult, Item, Listener};
use crate::constants::artifact_kinds;
use crate::definition::RefArtifact;
use crate::error::{BatchError, BatchResult};

#[derive(Clone, Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<Arc<dyn Listener>>,
    references: Vec<String>,
}

macro_rules! dispatch {
    ($name:ident, $accessor:ident, $method:ident $(, $arg:ident : $ty:ty)*) => {
        pub(crate) async fn $name(&self $(, $arg: $ty)*) -> ArtifactResult<()> {
            for listener in &self.listeners {
                if let Some(target) = listener.$accessor() {
                    target.$method($($arg),*).await?;
                }
            }
            Ok(())
        }
    };
}

impl ListenerSet {
    /// Instantiate every referenced listener in `context`
    pub(crate) fn create(
        factory: &dyn ArtifactFactory,
        references: &[RefArtifact],
        context: &ArtifactContext,
    ) -> BatchResult<Self> {
        let mut set = Self::default();
        for reference in references {
            set.listeners.push(create_listener(factory, reference, context)?);
            set.references.push(reference.reference.clone());
        }
        Ok(set)
    }

    /// Only the listeners with a chunk-scoped capability
    pub(crate) fn chunk_related(&self) -> Self {
        let mut set = Self::default();
        for (listener, reference) in self.listeners.iter().zip(&self.references) {
            if listener.is_chunk_related() {
                set.listeners.push(Arc::clone(listener));
                set.references.push(reference.clone());
            }
        }
        set
    }

    pub(crate) fn destroy(&self, factory: &dyn ArtifactFactory) {
        for reference in &self.references {
            factory.destroy(artifact_kinds::LISTENER, reference);
        }
    }

    dispatch!(before_job, as_job_listener, before_job);
    dispatch!(after_job, as_job_listener, after_job);
    dispatch!(before_step, as_step_listener, before_step);
    dispatch!(after_step, as_step_listener, after_step);
    dispatch!(before_chunk, as_chunk_listener, before_chunk);
    dispatch!(after_chunk, as_chunk_listener, after_chunk);
    dispatch!(chunk_error, as_chunk_listener, on_error, error: &BatchError);
    dispatch!(before_read, as_item_read_listener, before_read);
    dispatch!(after_read, as_item_read_listener, after_read, item: Option<&Item>);
    dispatch!(read_error, as_item_read_listener, on_read_error, error: &ArtifactError);
    dispatch!(before_process, as_item_process_listener, before_process, item: &Item);
    dispatch!(after_process, as_item_process_listener, after_process, item: &Item, result: Option<&Item>);
    dispatch!(process_error, as_item_process_listener, on_process_error, item: &Item, error: &ArtifactError);
    dispatch!(before_write, as_item_write_listener, before_write, items: &[Item]);
    dispatch!(after_write, as_item_write_listener, after_write, items: &[Item]);
    dispatch!(write_error, as_item_write_listener, on_write_error, items: &[Item], error: &ArtifactError);
    dispatch!(skip_read, as_skip_read_listener, on_skip_read_item, error: &ArtifactError);
    dispatch!(skip_process, as_skip_process_listener, on_skip_process_item, item: &Item, error: &ArtifactError);
    dispatch!(skip_write, as_skip_write_listener, on_skip_write_item, items: &[Item], error: &ArtifactError);
    dispatch!(retry_read, as_retry_read_listener, on_retry_read_exception, error: &ArtifactError);
    dispatch!(retry_process, as_retry_process_listener, on_retry_process_exception, item: &Item, error: &ArtifactError);
    dispatch!(retry_write, as_retry_write_listener, on_retry_write_exception, items: &[Item], error: &ArtifactError);
}
