//! Row Lock Manager
//!
//! Exclusive, row-scoped locks keyed by [`NodeId`]. SQLite only offers a
//! database-wide write lock, so subtree mutations serialize on these instead:
//! two moves on disjoint subtrees never wait on each other here, while
//! overlapping ones queue and re-validate once they own their rows.
//!
//! # Lock Order
//!
//! Every operation acquires rows in the same order:
//!
//! 1. the operation's target
//! 2. the new parent (moves only)
//! 3. the target's descendants, ascending depth
//!
//! Crossing moves (`a` under `b` while `b` moves under `a`) can still wait on
//! each other; the per-row wait is bounded by the configured timeout, which
//! surfaces as [`DatabaseError::LockTimeout`] and rolls the loser back.
//!
//! Locks live in a [`LockSet`] that is owned by the store transaction and
//! released when it is dropped, so a lock never outlives its transaction.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};
use tracing::debug;

use crate::cancel::{CancelToken, Cancelled};
use crate::db::error::DatabaseError;
use crate::models::NodeId;

/// Default wait for a single row lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Registry of per-row async mutexes
#[derive(Debug)]
pub struct RowLockManager {
    rows: Mutex<HashMap<NodeId, Arc<RowMutex<()>>>>,
    lock_timeout: Duration,
}

impl RowLockManager {
    pub fn new(lock_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(HashMap::new()),
            lock_timeout,
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Empty lock set bound to this manager
    pub fn lock_set(self: &Arc<Self>) -> LockSet {
        LockSet {
            manager: Arc::clone(self),
            held: Vec::new(),
        }
    }

    /// Number of rows with a live mutex (held or awaited)
    pub fn tracked_rows(&self) -> usize {
        self.rows.lock().len()
    }

    fn row(&self, id: NodeId) -> Arc<RowMutex<()>> {
        let mut rows = self.rows.lock();
        Arc::clone(rows.entry(id).or_insert_with(|| Arc::new(RowMutex::new(()))))
    }

    /// Drop registry entries nobody holds or waits on
    fn prune(&self, ids: impl IntoIterator<Item = NodeId>) {
        let mut rows = self.rows.lock();
        for id in ids {
            if rows.get(&id).is_some_and(|row| Arc::strong_count(row) == 1) {
                rows.remove(&id);
            }
        }
    }
}

/// Row locks held by one transaction, released on drop
#[derive(Debug)]
pub struct LockSet {
    manager: Arc<RowLockManager>,
    held: Vec<(NodeId, OwnedMutexGuard<()>)>,
}

impl LockSet {
    pub fn contains(&self, id: NodeId) -> bool {
        self.held.iter().any(|(held, _)| *held == id)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Acquire the row lock for `id`
    ///
    /// No-op if this set already holds it. Waits at most the manager's
    /// timeout and gives up as soon as `cancel` fires.
    pub async fn acquire(&mut self, id: NodeId, cancel: &CancelToken) -> Result<(), DatabaseError> {
        if self.contains(id) {
            return Ok(());
        }

        let row = self.manager.row(id);
        let lock_timeout = self.manager.lock_timeout;
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DatabaseError::from(Cancelled)),
            res = tokio::time::timeout(lock_timeout, row.lock_owned()) => {
                res.map_err(|_| DatabaseError::LockTimeout {
                    row_id: id.to_string(),
                    waited_ms: lock_timeout.as_millis() as u64,
                })
            }
        };

        match outcome {
            Ok(guard) => {
                debug!(
                    "Acquired row lock {} after {:?} ({} held)",
                    id,
                    started.elapsed(),
                    self.held.len() + 1
                );
                self.held.push((id, guard));
                Ok(())
            }
            Err(e) => {
                self.manager.prune([id]);
                Err(e)
            }
        }
    }

    /// Acquire several rows in the given order
    pub async fn acquire_all(
        &mut self,
        ids: impl IntoIterator<Item = NodeId>,
        cancel: &CancelToken,
    ) -> Result<(), DatabaseError> {
        for id in ids {
            self.acquire(id, cancel).await?;
        }
        Ok(())
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        let ids: Vec<NodeId> = self.held.drain(..).map(|(id, _guard)| id).collect();
        if !ids.is_empty() {
            debug!("Released {} row locks", ids.len());
        }
        self.manager.prune(ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_is_reentrant_within_a_set() {
        let manager = RowLockManager::new(DEFAULT_LOCK_TIMEOUT);
        let cancel = CancelToken::new();
        let id = NodeId::new();

        let mut locks = manager.lock_set();
        locks.acquire(id, &cancel).await.unwrap();
        locks.acquire(id, &cancel).await.unwrap();
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_second_set_times_out_while_row_is_held() {
        let manager = RowLockManager::new(Duration::from_millis(50));
        let cancel = CancelToken::new();
        let id = NodeId::new();

        let mut first = manager.lock_set();
        first.acquire(id, &cancel).await.unwrap();

        let mut second = manager.lock_set();
        let err = second.acquire(id, &cancel).await.unwrap_err();
        assert!(matches!(err, DatabaseError::LockTimeout { .. }));

        drop(first);
        second.acquire(id, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_rows_do_not_block() {
        let manager = RowLockManager::new(Duration::from_millis(50));
        let cancel = CancelToken::new();

        let mut first = manager.lock_set();
        first.acquire(NodeId::new(), &cancel).await.unwrap();
        let mut second = manager.lock_set();
        second.acquire(NodeId::new(), &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let manager = RowLockManager::new(Duration::from_secs(30));
        let cancel = CancelToken::new();
        let id = NodeId::new();

        let mut holder = manager.lock_set();
        holder.acquire(id, &CancelToken::new()).await.unwrap();

        cancel.cancel();
        let mut waiter = manager.lock_set();
        let err = waiter.acquire(id, &cancel).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_drop_prunes_registry() {
        let manager = RowLockManager::new(DEFAULT_LOCK_TIMEOUT);
        let cancel = CancelToken::new();

        let mut locks = manager.lock_set();
        locks
            .acquire_all([NodeId::new(), NodeId::new()], &cancel)
            .await
            .unwrap();
        assert_eq!(manager.tracked_rows(), 2);

        drop(locks);
        assert_eq!(manager.tracked_rows(), 0);
    }
}
