//! Store Transaction
//!
//! One `BEGIN IMMEDIATE` transaction on a dedicated connection, bundled with
//! the row locks taken for it. Consuming the transaction through
//! [`StoreTransaction::commit`] or [`StoreTransaction::rollback`] closes the
//! connection first and releases the row locks second. Dropping it without
//! either closes the connection, which rolls the transaction back.

use chrono::{DateTime, Utc};
use libsql::Connection;
use tracing::warn;

use crate::cancel::CancelToken;
use crate::db::database::DatabaseService;
use crate::db::error::DatabaseError;
use crate::db::locks::LockSet;
use crate::db::node_store;
use crate::models::{Identifier, Node, NodeId, NodePath};

/// Write transaction that owns its row locks
pub struct StoreTransaction {
    // Field order matters: the connection drops before the locks
    conn: Connection,
    locks: LockSet,
}

impl StoreTransaction {
    pub(crate) async fn begin(db: &DatabaseService, locks: LockSet) -> Result<Self, DatabaseError> {
        let conn = db.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e))
        })?;
        Ok(Self { conn, locks })
    }

    /// True when this transaction holds the row lock for `id`
    pub fn holds(&self, id: NodeId) -> bool {
        self.locks.contains(id)
    }

    pub fn locks(&self) -> &LockSet {
        &self.locks
    }

    pub async fn get_node(&self, id: NodeId) -> Result<Option<Node>, DatabaseError> {
        node_store::fetch_node(&self.conn, id).await
    }

    pub async fn find_active_by_identifier(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<Node>, DatabaseError> {
        node_store::fetch_active_by_identifier(&self.conn, identifier).await
    }

    /// Strict descendants of `node`, ascending depth
    pub async fn descendants(&self, node: &Node) -> Result<Vec<Node>, DatabaseError> {
        node_store::fetch_descendants(&self.conn, node).await
    }

    pub async fn insert_node(&self, node: &Node) -> Result<(), DatabaseError> {
        node_store::insert_node(&self.conn, node).await
    }

    /// See [`node_store::rewrite_subtree_paths`]
    pub async fn rewrite_subtree(
        &self,
        ids: &[NodeId],
        old_prefix: &NodePath,
        new_prefix: Option<&NodePath>,
        depth_delta: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        node_store::rewrite_subtree_paths(&self.conn, ids, old_prefix, new_prefix, depth_delta, now)
            .await
    }

    pub async fn set_parent(
        &self,
        id: NodeId,
        parent_id: Option<NodeId>,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        node_store::update_parent(&self.conn, id, parent_id, now).await
    }

    pub async fn set_activation(
        &self,
        id: NodeId,
        identifier: &Identifier,
        active: bool,
        deactivated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        node_store::update_activation(&self.conn, id, identifier, active, deactivated_at, now).await
    }

    pub async fn reparent_children(
        &self,
        from: NodeId,
        to: Option<NodeId>,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        node_store::reparent_children(&self.conn, from, to, now).await
    }

    pub async fn delete_node(&self, id: NodeId) -> Result<u64, DatabaseError> {
        node_store::delete_node(&self.conn, id).await
    }

    /// Commit unless `cancel` has fired; then release the row locks
    ///
    /// Cancellation is checked once, right before COMMIT. A cancelled
    /// transaction is rolled back and reported as cancelled.
    pub async fn commit(self, cancel: &CancelToken) -> Result<(), DatabaseError> {
        if let Err(cancelled) = cancel.check() {
            self.rollback().await?;
            return Err(cancelled.into());
        }

        let Self { conn, locks } = self;
        if let Err(e) = conn.execute("COMMIT", ()).await {
            if let Err(rollback_err) = conn.execute("ROLLBACK", ()).await {
                warn!("Rollback after failed commit also failed: {}", rollback_err);
            }
            return Err(DatabaseError::sql_execution(format!(
                "Failed to commit transaction: {}",
                e
            )));
        }

        drop(conn);
        drop(locks);
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), DatabaseError> {
        self.rollback_keep_locks().await.map(drop)
    }

    /// Roll back but hand the row locks back to the caller
    ///
    /// Used when the descendant set grew between the lock pass and the
    /// transaction: the caller extends the lock set and begins again.
    pub async fn rollback_keep_locks(self) -> Result<LockSet, DatabaseError> {
        let Self { conn, locks } = self;
        conn.execute("ROLLBACK", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to roll back transaction: {}", e))
        })?;
        drop(conn);
        Ok(locks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::locks::{RowLockManager, DEFAULT_LOCK_TIMEOUT};
    use crate::db::node_store::NodeStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_test_store() -> (NodeStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            DatabaseService::new(temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        (
            NodeStore::new(db, RowLockManager::new(DEFAULT_LOCK_TIMEOUT)),
            temp_dir,
        )
    }

    fn root(slug: &str) -> Node {
        Node::new_root(format!("Dept {slug}"), Identifier::parse(slug).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_rollback_discards_writes_and_releases_locks() {
        let (store, _temp) = create_test_store().await;
        let node = root("main");
        let cancel = CancelToken::new();

        let mut locks = store.lock_set();
        locks.acquire(node.id, &cancel).await.unwrap();
        let tx = store.begin(locks).await.unwrap();
        tx.insert_node(&node).await.unwrap();
        assert!(tx.holds(node.id));
        tx.rollback().await.unwrap();

        assert!(store.get_node(node.id).await.unwrap().is_none());
        assert_eq!(store.lock_manager().tracked_rows(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_commit_rolls_back() {
        let (store, _temp) = create_test_store().await;
        let node = root("main");
        let cancel = CancelToken::new();

        let tx = store.begin(store.lock_set()).await.unwrap();
        tx.insert_node(&node).await.unwrap();
        cancel.cancel();
        let err = tx.commit(&cancel).await.unwrap_err();

        assert!(matches!(err, DatabaseError::Cancelled(_)));
        assert!(store.get_node(node.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rollback_keep_locks_returns_held_rows() {
        let (store, _temp) = create_test_store().await;
        let id = NodeId::new();
        let cancel = CancelToken::new();

        let mut locks = store.lock_set();
        locks.acquire(id, &cancel).await.unwrap();
        let tx = store.begin(locks).await.unwrap();
        let locks = tx.rollback_keep_locks().await.unwrap();
        assert!(locks.contains(id));
    }
}
