//! Node Store - persisted department rows
//!
//! SQL primitives over the `departments` table. The free functions in this
//! module take a `libsql::Connection` so the same statements serve both
//! autocommit reads ([`NodeStore`]) and locked writes
//! ([`crate::db::StoreTransaction`]).
//!
//! # Subtree Lookups
//!
//! Descendants are found with an index range scan on `path` (see
//! [`NodePath::descendant_range`]). Inactive siblings may share a path
//! (`deleted-sales` twice), so scan results are filtered through the
//! `parent_id` chain before being returned.
//!
//! # Timestamps
//!
//! Written as RFC 3339 with microseconds and a `Z` suffix so lexical order
//! equals chronological order in `ORDER BY` and range comparisons.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::{Connection, Row};
use std::collections::HashSet;
use std::sync::Arc;

use crate::db::database::DatabaseService;
use crate::db::error::DatabaseError;
use crate::db::locks::{LockSet, RowLockManager};
use crate::db::transaction::StoreTransaction;
use crate::models::{Identifier, Node, NodeId, NodePath, NodeSummary, NodeWithChildren};

const NODE_COLUMNS: &str = "id, parent_id, name, identifier, path, depth, is_active, \
                            created_at, updated_at, deactivated_at";

const SUMMARY_COLUMNS: &str = "d.id, d.parent_id, d.name, d.identifier, d.path, d.depth, \
                               d.is_active, d.created_at";

/// Format a timestamp the way every row stores it
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp - RFC 3339 first, bare SQLite format as fallback
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }

    Err(DatabaseError::corrupt_row(format!(
        "Unable to parse timestamp '{}' as RFC3339 or SQLite format",
        s
    )))
}

fn parse_node_id(raw: &str) -> Result<NodeId, DatabaseError> {
    raw.parse()
        .map_err(|e| DatabaseError::corrupt_row(format!("Invalid department id '{}': {}", raw, e)))
}

fn text(row: &Row, idx: i32, name: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::corrupt_row(format!("Failed to get {}: {}", name, e)))
}

fn optional_text(row: &Row, idx: i32, name: &str) -> Result<Option<String>, DatabaseError> {
    row.get::<Option<String>>(idx)
        .map_err(|e| DatabaseError::corrupt_row(format!("Failed to get {}: {}", name, e)))
}

fn integer(row: &Row, idx: i32, name: &str) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::corrupt_row(format!("Failed to get {}: {}", name, e)))
}

/// Convert a row selected with [`NODE_COLUMNS`] into a [`Node`]
fn row_to_node(row: &Row) -> Result<Node, DatabaseError> {
    let id = text(row, 0, "id")?;
    let parent_id = optional_text(row, 1, "parent_id")?;
    let name = text(row, 2, "name")?;
    let identifier = text(row, 3, "identifier")?;
    let path = text(row, 4, "path")?;
    let depth = integer(row, 5, "depth")?;
    let is_active = integer(row, 6, "is_active")?;
    let created_at = text(row, 7, "created_at")?;
    let updated_at = text(row, 8, "updated_at")?;
    let deactivated_at = optional_text(row, 9, "deactivated_at")?;

    Ok(Node {
        id: parse_node_id(&id)?,
        name,
        identifier: Identifier::from_db(identifier),
        parent_id: parent_id.as_deref().map(parse_node_id).transpose()?,
        path: NodePath::from_db(path),
        depth,
        active: is_active != 0,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        deactivated_at: deactivated_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

/// Convert a row selected with [`SUMMARY_COLUMNS`] + `has_more_children`
fn row_to_summary(row: &Row) -> Result<NodeSummary, DatabaseError> {
    let id = text(row, 0, "id")?;
    let parent_id = optional_text(row, 1, "parent_id")?;
    let is_active = integer(row, 6, "is_active")?;
    let created_at = text(row, 7, "created_at")?;
    let has_more_children = integer(row, 8, "has_more_children")?;

    Ok(NodeSummary {
        id: parse_node_id(&id)?,
        parent_id: parent_id.as_deref().map(parse_node_id).transpose()?,
        name: text(row, 2, "name")?,
        identifier: text(row, 3, "identifier")?,
        path: text(row, 4, "path")?,
        depth: integer(row, 5, "depth")?,
        active: is_active != 0,
        created_at: parse_timestamp(&created_at)?,
        has_more_children: has_more_children != 0,
    })
}

fn ids_json(ids: &[NodeId]) -> Result<String, DatabaseError> {
    let raw: Vec<String> = ids.iter().map(NodeId::to_string).collect();
    serde_json::to_string(&raw)
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to encode id list: {}", e)))
}

pub(crate) async fn fetch_node(conn: &Connection, id: NodeId) -> Result<Option<Node>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {} FROM departments WHERE id = ?", NODE_COLUMNS),
            [id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to get department: {}", e)))?;

    match rows.next().await? {
        Some(row) => Ok(Some(row_to_node(&row)?)),
        None => Ok(None),
    }
}

pub(crate) async fn fetch_active_by_identifier(
    conn: &Connection,
    identifier: &Identifier,
) -> Result<Option<Node>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM departments WHERE identifier = ? AND is_active = 1",
                NODE_COLUMNS
            ),
            [identifier.as_str()],
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to look up identifier: {}", e))
        })?;

    match rows.next().await? {
        Some(row) => Ok(Some(row_to_node(&row)?)),
        None => Ok(None),
    }
}

/// Strict descendants of `root`, ascending depth
pub(crate) async fn fetch_descendants(
    conn: &Connection,
    root: &Node,
) -> Result<Vec<Node>, DatabaseError> {
    let (lower, upper) = root.path.descendant_range();
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM departments
                 WHERE path >= ?1 AND path < ?2
                 ORDER BY depth ASC, created_at ASC, id ASC",
                NODE_COLUMNS
            ),
            (lower, upper),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to scan descendants: {}", e))
        })?;

    let mut members: HashSet<NodeId> = HashSet::from([root.id]);
    let mut descendants = Vec::new();
    while let Some(row) = rows.next().await? {
        let node = row_to_node(&row)?;
        if node.parent_id.is_some_and(|parent| members.contains(&parent)) {
            members.insert(node.id);
            descendants.push(node);
        }
    }

    Ok(descendants)
}

pub(crate) async fn insert_node(conn: &Connection, node: &Node) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO departments (id, parent_id, name, identifier, path, depth, is_active,
                                  created_at, updated_at, deactivated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            node.id.to_string(),
            node.parent_id.map(|p| p.to_string()),
            node.name.as_str(),
            node.identifier.as_str(),
            node.path.as_str(),
            node.depth,
            i64::from(node.active),
            format_timestamp(node.created_at),
            format_timestamp(node.updated_at),
            node.deactivated_at.map(format_timestamp),
        ),
    )
    .await
    .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert department: {}", e)))?;

    Ok(())
}

/// Replace the `old_prefix` part of every listed path and shift depths
///
/// Rows whose path equals `old_prefix` become `new_prefix`; deeper rows keep
/// their suffix. `new_prefix = None` strips the prefix and its separator, so
/// the row at `old_prefix` itself must not be listed in that case.
pub(crate) async fn rewrite_subtree_paths(
    conn: &Connection,
    ids: &[NodeId],
    old_prefix: &NodePath,
    new_prefix: Option<&NodePath>,
    depth_delta: i64,
    now: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let old_len = old_prefix.as_str().len() as i64;
    let (head, suffix_start) = match new_prefix {
        Some(prefix) => (prefix.as_str().to_string(), old_len + 1),
        None => (String::new(), old_len + 2),
    };

    conn.execute(
        "UPDATE departments
         SET path = ?1 || substr(path, ?2),
             depth = depth + ?3,
             updated_at = ?4
         WHERE id IN (SELECT value FROM json_each(?5))",
        (
            head,
            suffix_start,
            depth_delta,
            format_timestamp(now),
            ids_json(ids)?,
        ),
    )
    .await
    .map_err(|e| DatabaseError::sql_execution(format!("Failed to rewrite subtree paths: {}", e)))
}

pub(crate) async fn update_parent(
    conn: &Connection,
    id: NodeId,
    parent_id: Option<NodeId>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE departments SET parent_id = ?, updated_at = ? WHERE id = ?",
        (
            parent_id.map(|p| p.to_string()),
            format_timestamp(now),
            id.to_string(),
        ),
    )
    .await
    .map_err(|e| DatabaseError::sql_execution(format!("Failed to update parent: {}", e)))?;

    Ok(())
}

pub(crate) async fn update_activation(
    conn: &Connection,
    id: NodeId,
    identifier: &Identifier,
    active: bool,
    deactivated_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE departments
         SET identifier = ?, is_active = ?, deactivated_at = ?, updated_at = ?
         WHERE id = ?",
        (
            identifier.as_str(),
            i64::from(active),
            deactivated_at.map(format_timestamp),
            format_timestamp(now),
            id.to_string(),
        ),
    )
    .await
    .map_err(|e| DatabaseError::sql_execution(format!("Failed to update activation: {}", e)))?;

    Ok(())
}

pub(crate) async fn reparent_children(
    conn: &Connection,
    from: NodeId,
    to: Option<NodeId>,
    now: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    conn.execute(
        "UPDATE departments SET parent_id = ?, updated_at = ? WHERE parent_id = ?",
        (to.map(|p| p.to_string()), format_timestamp(now), from.to_string()),
    )
    .await
    .map_err(|e| DatabaseError::sql_execution(format!("Failed to reparent children: {}", e)))
}

pub(crate) async fn delete_node(conn: &Connection, id: NodeId) -> Result<u64, DatabaseError> {
    conn.execute("DELETE FROM departments WHERE id = ?", [id.to_string()])
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to delete department: {}", e)))
}

/// Store facade: autocommit reads plus the entry point for write transactions
#[derive(Debug, Clone)]
pub struct NodeStore {
    db: Arc<DatabaseService>,
    locks: Arc<RowLockManager>,
}

impl NodeStore {
    pub fn new(db: Arc<DatabaseService>, locks: Arc<RowLockManager>) -> Self {
        Self { db, locks }
    }

    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    pub fn lock_manager(&self) -> &Arc<RowLockManager> {
        &self.locks
    }

    /// Empty lock set to be filled before [`NodeStore::begin`]
    pub fn lock_set(&self) -> LockSet {
        self.locks.lock_set()
    }

    /// Open a write transaction owning `locks`
    pub async fn begin(&self, locks: LockSet) -> Result<StoreTransaction, DatabaseError> {
        StoreTransaction::begin(&self.db, locks).await
    }

    pub async fn get_node(&self, id: NodeId) -> Result<Option<Node>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        fetch_node(&conn, id).await
    }

    /// Unlocked snapshot of the ids below `id`, ascending depth
    ///
    /// Used to pre-collect locks; the set is checked again inside the
    /// transaction.
    pub async fn descendant_ids(&self, id: NodeId) -> Result<Vec<NodeId>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        match fetch_node(&conn, id).await? {
            Some(node) => Ok(fetch_descendants(&conn, &node)
                .await?
                .into_iter()
                .map(|n| n.id)
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    /// The node followed by all its descendants, ascending depth
    pub async fn get_subtree(&self, id: NodeId) -> Result<Vec<Node>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let Some(root) = fetch_node(&conn, id).await? else {
            return Ok(Vec::new());
        };
        let mut subtree = fetch_descendants(&conn, &root).await?;
        subtree.insert(0, root);
        Ok(subtree)
    }

    /// One page of a parent's children, oldest first
    pub async fn list_children(
        &self,
        parent_id: NodeId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<NodeSummary>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        Self::children_page(&conn, parent_id, i64::from(limit), i64::from(offset)).await
    }

    async fn children_page(
        conn: &Connection,
        parent_id: NodeId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NodeSummary>, DatabaseError> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {},
                            EXISTS(SELECT 1 FROM departments c WHERE c.parent_id = d.id)
                     FROM departments d
                     WHERE d.parent_id = ?1
                     ORDER BY d.created_at ASC, d.id ASC
                     LIMIT ?2 OFFSET ?3",
                    SUMMARY_COLUMNS
                ),
                (parent_id.to_string(), limit, offset),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to list children: {}", e)))?;

        let mut children = Vec::new();
        while let Some(row) = rows.next().await? {
            children.push(row_to_summary(&row)?);
        }
        Ok(children)
    }

    /// One page of roots, each with up to `prefetch` children
    ///
    /// A root's `has_more_children` is true when it has more children than
    /// were prefetched; a child's is true when it has any children at all.
    pub async fn list_roots(
        &self,
        limit: u32,
        offset: u32,
        prefetch: u32,
    ) -> Result<Vec<NodeWithChildren>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {},
                            EXISTS(SELECT 1 FROM departments c WHERE c.parent_id = d.id
                                   LIMIT 1 OFFSET ?3)
                     FROM departments d
                     WHERE d.parent_id IS NULL
                     ORDER BY d.created_at ASC, d.id ASC
                     LIMIT ?1 OFFSET ?2",
                    SUMMARY_COLUMNS
                ),
                (i64::from(limit), i64::from(offset), i64::from(prefetch)),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to list roots: {}", e)))?;

        let mut roots = Vec::new();
        while let Some(row) = rows.next().await? {
            roots.push(row_to_summary(&row)?);
        }

        let mut result = Vec::with_capacity(roots.len());
        for root in roots {
            let children = if prefetch == 0 {
                Vec::new()
            } else {
                Self::children_page(&conn, root.id, i64::from(prefetch), 0).await?
            };
            result.push(NodeWithChildren {
                node: root,
                children,
            });
        }

        Ok(result)
    }

    /// Ids of inactive nodes deactivated before `cutoff`, shallowest first
    pub async fn compaction_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<NodeId>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT id FROM departments
                 WHERE is_active = 0 AND deactivated_at IS NOT NULL AND deactivated_at < ?1
                 ORDER BY depth ASC, deactivated_at ASC",
                [format_timestamp(cutoff)],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to select compaction candidates: {}", e))
            })?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            let id = text(&row, 0, "id")?;
            ids.push(parse_node_id(&id)?);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::db::locks::DEFAULT_LOCK_TIMEOUT;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn create_test_store() -> (NodeStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(DatabaseService::new(db_path).await.unwrap());
        let store = NodeStore::new(db, RowLockManager::new(DEFAULT_LOCK_TIMEOUT));
        (store, temp_dir)
    }

    fn ident(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    async fn insert(store: &NodeStore, node: &Node) {
        let tx = store.begin(store.lock_set()).await.unwrap();
        tx.insert_node(node).await.unwrap();
        tx.commit(&CancelToken::new()).await.unwrap();
    }

    #[test]
    fn test_timestamp_roundtrip_preserves_order() {
        let early = Utc::now();
        let late = early + Duration::microseconds(1);
        let (a, b) = (format_timestamp(early), format_timestamp(late));
        assert!(a < b);
        assert_eq!(
            parse_timestamp(&a).unwrap().timestamp_micros(),
            early.timestamp_micros()
        );
        assert!(parse_timestamp("2025-01-02 03:04:05").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_insert_and_get_node() {
        let (store, _temp) = create_test_store().await;
        let main = Node::new_root("Head office".into(), ident("main")).unwrap();
        insert(&store, &main).await;

        let loaded = store.get_node(main.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, main.id);
        assert_eq!(loaded.path.as_str(), "main");
        assert_eq!(loaded.depth, 1);
        assert!(loaded.active);
        assert!(store.get_node(NodeId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_descendants_exclude_prefix_siblings() {
        let (store, _temp) = create_test_store().await;
        let main = Node::new_root("Main".into(), ident("main")).unwrap();
        let mainframe = Node::new_root("Mainframe".into(), ident("mainframe")).unwrap();
        let sales = Node::new_child("Sales".into(), ident("sales"), &main).unwrap();
        let shops = Node::new_child("Shops".into(), ident("shops"), &sales).unwrap();
        let racks = Node::new_child("Racks".into(), ident("racks"), &mainframe).unwrap();
        for node in [&main, &mainframe, &sales, &shops, &racks] {
            insert(&store, node).await;
        }

        let ids = store.descendant_ids(main.id).await.unwrap();
        assert_eq!(ids, vec![sales.id, shops.id]);

        let subtree = store.get_subtree(main.id).await.unwrap();
        assert_eq!(subtree.len(), 3);
        assert_eq!(subtree[0].id, main.id);
    }

    #[tokio::test]
    async fn test_unique_active_identifier_is_enforced() {
        let (store, _temp) = create_test_store().await;
        insert(&store, &Node::new_root("Main".into(), ident("main")).unwrap()).await;

        let tx = store.begin(store.lock_set()).await.unwrap();
        let err = tx
            .insert_node(&Node::new_root("Main again".into(), ident("main")).unwrap())
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_roots_prefetches_children() {
        let (store, _temp) = create_test_store().await;
        let main = Node::new_root("Main".into(), ident("main")).unwrap();
        insert(&store, &main).await;
        for slug in ["aaa", "bbb", "ccc"] {
            insert(&store, &Node::new_child(slug.into(), ident(slug), &main).unwrap()).await;
        }

        let roots = store.list_roots(20, 0, 2).await.unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].children.len(), 2);
        assert!(roots[0].node.has_more_children);
        assert!(!roots[0].children[0].has_more_children);

        let roots = store.list_roots(20, 0, 3).await.unwrap();
        assert!(!roots[0].node.has_more_children);

        let children = store.list_children(main.id, 2, 2).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].identifier, "ccc");
    }
}
