//! Department Node Data Structures
//!
//! This module defines the `Node` row that represents one department in the
//! directory forest, plus the read-side summaries returned by listing queries.
//!
//! # Architecture
//!
//! - **Arena + index**: nodes reference each other only by [`NodeId`]; parent
//!   and children are resolved against the store, never held as live objects
//! - **Materialized path**: `path` encodes the full ancestor chain so subtree
//!   queries are range scans (see [`crate::models::path`])
//! - **Soft deactivation**: inactive nodes stay in the tree until compaction
//!
//! # Examples
//!
//! ```rust
//! use directory_core::models::{Identifier, Node};
//!
//! let main = Node::new_root("Head office".to_string(), Identifier::parse("main").unwrap()).unwrap();
//! let moscow = Node::new_child(
//!     "Moscow branch".to_string(),
//!     Identifier::parse("moscow").unwrap(),
//!     &main,
//! )
//! .unwrap();
//!
//! assert_eq!(moscow.path.as_str(), "main.moscow");
//! assert_eq!(moscow.depth, 2);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::identifier::Identifier;
use crate::models::path::{compute_depth, NodePath, PathFormatError};

/// Opaque department identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a node, used in error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeState {
    Active,
    Inactive,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Active => f.write_str("active"),
            NodeState::Inactive => f.write_str("inactive"),
        }
    }
}

/// One department row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub identifier: Identifier,
    pub parent_id: Option<NodeId>,
    pub path: NodePath,
    pub depth: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Node {
    fn build(
        name: String,
        identifier: Identifier,
        parent: Option<&Node>,
        now: DateTime<Utc>,
    ) -> Result<Self, PathFormatError> {
        let path = NodePath::compute(parent.map(|p| &p.path), &identifier)?;
        let depth = compute_depth(parent.map(|p| p.depth));

        Ok(Self {
            id: NodeId::new(),
            name: name.trim().to_string(),
            identifier,
            parent_id: parent.map(|p| p.id),
            path,
            depth,
            active: true,
            created_at: now,
            updated_at: now,
            deactivated_at: None,
        })
    }

    /// New active root node
    pub fn new_root(name: String, identifier: Identifier) -> Result<Self, PathFormatError> {
        Self::build(name, identifier, None, Utc::now())
    }

    /// New active node under `parent`
    pub fn new_child(
        name: String,
        identifier: Identifier,
        parent: &Node,
    ) -> Result<Self, PathFormatError> {
        Self::build(name, identifier, Some(parent), Utc::now())
    }

    /// New active node stamped with an explicit creation time
    pub fn new_at(
        name: String,
        identifier: Identifier,
        parent: Option<&Node>,
        now: DateTime<Utc>,
    ) -> Result<Self, PathFormatError> {
        Self::build(name, identifier, parent, now)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn state(&self) -> NodeState {
        if self.active {
            NodeState::Active
        } else {
            NodeState::Inactive
        }
    }
}

/// Read-side projection returned by children listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub identifier: String,
    pub path: String,
    pub depth: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub has_more_children: bool,
}

/// Root summary with its prefetched first children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeWithChildren {
    #[serde(flatten)]
    pub node: NodeSummary,
    pub children: Vec<NodeSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_root_defaults() {
        let node = Node::new_root("  Head office ".into(), Identifier::parse("main").unwrap())
            .unwrap();
        assert_eq!(node.name, "Head office");
        assert_eq!(node.path.as_str(), "main");
        assert_eq!(node.depth, 1);
        assert!(node.active);
        assert!(node.is_root());
        assert!(node.deactivated_at.is_none());
        assert_eq!(node.created_at, node.updated_at);
    }

    #[test]
    fn test_new_child_derives_path_and_depth() {
        let main = Node::new_root("Main".into(), Identifier::parse("main").unwrap()).unwrap();
        let moscow =
            Node::new_child("Moscow".into(), Identifier::parse("moscow").unwrap(), &main).unwrap();
        assert_eq!(moscow.parent_id, Some(main.id));
        assert_eq!(moscow.path.as_str(), "main.moscow");
        assert_eq!(moscow.depth, main.depth + 1);
    }

    #[test]
    fn test_node_id_parse_roundtrip() {
        let id = NodeId::new();
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
