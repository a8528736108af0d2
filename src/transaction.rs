//! # Transactions
//!
//! Transaction seam used by the chunk loop and by partition aggregation. A
//! transaction is a move-only handle: commit or rollback consumes it, so an
//! interval can never be finished twice.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{BatchError, BatchResult};

#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self, timeout: Duration) -> BatchResult<Box<dyn Transaction>>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> BatchResult<()>;

    async fn rollback(self: Box<Self>) -> BatchResult<()>;
}

/// In-process transaction manager.
///
/// Tracks begin/commit/rollback counts and enforces the timeout at commit
/// time: committing after the deadline fails and counts as a rollback.
#[derive(Debug, Default)]
pub struct LocalTransactionManager {
    stats: Arc<TransactionCounters>,
}

#[derive(Debug, Default)]
struct TransactionCounters {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

impl TransactionStats {
    pub fn active(&self) -> u64 {
        self.begun.saturating_sub(self.committed + self.rolled_back)
    }
}

impl LocalTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            begun: self.stats.begun.load(Ordering::Relaxed),
            committed: self.stats.committed.load(Ordering::Relaxed),
            rolled_back: self.stats.rolled_back.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl TransactionManager for LocalTransactionManager {
    async fn begin(&self, timeout: Duration) -> BatchResult<Box<dyn Transaction>> {
        let id = self.stats.begun.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(transaction_id = id, timeout_secs = timeout.as_secs(), "Transaction begun");
        Ok(Box::new(LocalTransaction {
            id,
            deadline: Instant::now() + timeout,
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct LocalTransaction {
    id: u64,
    deadline: Instant,
    stats: Arc<TransactionCounters>,
}

#[async_trait]
impl Transaction for LocalTransaction {
    async fn commit(self: Box<Self>) -> BatchResult<()> {
        if Instant::now() > self.deadline {
            self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
            warn!(transaction_id = self.id, "Transaction timed out before commit");
            return Err(BatchError::TransactionError(format!(
                "transaction {} exceeded its timeout",
                self.id
            )));
        }
        self.stats.committed.fetch_add(1, Ordering::Relaxed);
        debug!(transaction_id = self.id, "Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BatchResult<()> {
        self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
        debug!(transaction_id = self.id, "Transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_commits_and_rollbacks() {
        let manager = LocalTransactionManager::new();
        let tx = manager.begin(Duration::from_secs(5)).await.unwrap();
        tx.commit().await.unwrap();
        let tx = manager.begin(Duration::from_secs(5)).await.unwrap();
        tx.rollback().await.unwrap();
        let _open = manager.begin(Duration::from_secs(5)).await.unwrap();

        let stats = manager.stats();
        assert_eq!(stats.begun, 3);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.rolled_back, 1);
        assert_eq!(stats.active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_after_deadline_fails() {
        let manager = LocalTransactionManager::new();
        let tx = manager.begin(Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(tx.commit().await, Err(BatchError::TransactionError(_))));
        assert_eq!(manager.stats().rolled_back, 1);
    }
}
