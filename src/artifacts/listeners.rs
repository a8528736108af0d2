//! Listener capabilities.
//!
//! A configured listener is a single object that may implement any subset of
//! the listener traits. [`Listener`] exposes each capability explicitly so
//! the runtime can sort one object into every category it supports:
//!
//! ```rust
//! use async_trait::async_trait;
//! use tasker_batch::artifacts::{ArtifactResult, ChunkListener, Listener, StepListener};
//!
//! struct Audit;
//!
//! #[async_trait]
//! impl StepListener for Audit {}
//!
//! #[async_trait]
//! impl ChunkListener for Audit {
//!     async fn after_chunk(&self) -> ArtifactResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! impl Listener for Audit {
//!     fn as_step_listener(&self) -> Option<&dyn StepListener> {
//!         Some(self)
//!     }
//!     fn as_chunk_listener(&self) -> Option<&dyn ChunkListener> {
//!         Some(self)
//!     }
//! }
//! ```

use async_trait::async_trait;

use super::{ArtifactError, ArtifactResult, Item};
use crate::error::BatchError;

pub trait Listener: Send + Sync {
    fn as_job_listener(&self) -> Option<&dyn JobListener> {
        None
    }
    fn as_step_listener(&self) -> Option<&dyn StepListener> {
        None
    }
    fn as_chunk_listener(&self) -> Option<&dyn ChunkListener> {
        None
    }
    fn as_item_read_listener(&self) -> Option<&dyn ItemReadListener> {
        None
    }
    fn as_item_process_listener(&self) -> Option<&dyn ItemProcessListener> {
        None
    }
    fn as_item_write_listener(&self) -> Option<&dyn ItemWriteListener> {
        None
    }
    fn as_skip_read_listener(&self) -> Option<&dyn SkipReadListener> {
        None
    }
    fn as_skip_process_listener(&self) -> Option<&dyn SkipProcessListener> {
        None
    }
    fn as_skip_write_listener(&self) -> Option<&dyn SkipWriteListener> {
        None
    }
    fn as_retry_read_listener(&self) -> Option<&dyn RetryReadListener> {
        None
    }
    fn as_retry_process_listener(&self) -> Option<&dyn RetryProcessListener> {
        None
    }
    fn as_retry_write_listener(&self) -> Option<&dyn RetryWriteListener> {
        None
    }

    /// Whether any chunk-scoped capability is present
    fn is_chunk_related(&self) -> bool {
        self.as_chunk_listener().is_some()
            || self.as_item_read_listener().is_some()
            || self.as_item_process_listener().is_some()
            || self.as_item_write_listener().is_some()
            || self.as_skip_read_listener().is_some()
            || self.as_skip_process_listener().is_some()
            || self.as_skip_write_listener().is_some()
            || self.as_retry_read_listener().is_some()
            || self.as_retry_process_listener().is_some()
            || self.as_retry_write_listener().is_some()
    }
}

#[async_trait]
pub trait JobListener: Send + Sync {
    async fn before_job(&self) -> ArtifactResult<()> {
        Ok(())
    }
    async fn after_job(&self) -> ArtifactResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait StepListener: Send + Sync {
    async fn before_step(&self) -> ArtifactResult<()> {
        Ok(())
    }
    async fn after_step(&self) -> ArtifactResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ChunkListener: Send + Sync {
    async fn before_chunk(&self) -> ArtifactResult<()> {
        Ok(())
    }
    async fn after_chunk(&self) -> ArtifactResult<()> {
        Ok(())
    }
    async fn on_error(&self, _error: &BatchError) -> ArtifactResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ItemReadListener: Send + Sync {
    async fn before_read(&self) -> ArtifactResult<()> {
        Ok(())
    }
    async fn after_read(&self, _item: Option<&Item>) -> ArtifactResult<()> {
        Ok(())
    }
    async fn on_read_error(&self, _error: &ArtifactError) -> ArtifactResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ItemProcessListener: Send + Sync {
    async fn before_process(&self, _item: &Item) -> ArtifactResult<()> {
        Ok(())
    }
    async fn after_process(&self, _item: &Item, _result: Option<&Item>) -> ArtifactResult<()> {
        Ok(())
    }
    async fn on_process_error(&self, _item: &Item, _error: &ArtifactError) -> ArtifactResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ItemWriteListener: Send + Sync {
    async fn before_write(&self, _items: &[Item]) -> ArtifactResult<()> {
        Ok(())
    }
    async fn after_write(&self, _items: &[Item]) -> ArtifactResult<()> {
        Ok(())
    }
    async fn on_write_error(&self, _items: &[Item], _error: &ArtifactError) -> ArtifactResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait SkipReadListener: Send + Sync {
    async fn on_skip_read_item(&self, error: &ArtifactError) -> ArtifactResult<()>;
}

#[async_trait]
pub trait SkipProcessListener: Send + Sync {
    async fn on_skip_process_item(&self, item: &Item, error: &ArtifactError) -> ArtifactResult<()>;
}

#[async_trait]
pub trait SkipWriteListener: Send + Sync {
    async fn on_skip_write_item(&self, items: &[Item], error: &ArtifactError) -> ArtifactResult<()>;
}

#[async_trait]
pub trait RetryReadListener: Send + Sync {
    async fn on_retry_read_exception(&self, error: &ArtifactError) -> ArtifactResult<()>;
}

#[async_trait]
pub trait RetryProcessListener: Send + Sync {
    async fn on_retry_process_exception(&self, item: &Item, error: &ArtifactError) -> ArtifactResult<()>;
}

#[async_trait]
pub trait RetryWriteListener: Send + Sync {
    async fn on_retry_write_exception(&self, items: &[Item], error: &ArtifactError) -> ArtifactResult<()>;
}
