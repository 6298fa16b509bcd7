//! Materialized Path Codec
//!
//! A department's path is the identifiers of its ancestors, root first,
//! followed by its own identifier, joined by [`PATH_SEPARATOR`]:
//!
//! ```text
//! main                  depth 1
//! main.moscow           depth 2
//! main.moscow.marketing depth 3
//! ```
//!
//! Every function here is pure. The store relies on the fact that all
//! descendants of `p` sort inside the half-open range `[p + ".", p + "/")`
//! (`/` is the byte right after `.`), which turns subtree lookups into index
//! range scans.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::identifier::Identifier;
use crate::models::validation::FieldError;

pub const PATH_SEPARATOR: char = '.';

/// Byte immediately following [`PATH_SEPARATOR`], upper bound of a subtree range
const RANGE_END: char = '/';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid path '{path}': segments must be Latin letters and hyphens separated by '.'")]
pub struct PathFormatError {
    pub path: String,
}

impl From<PathFormatError> for FieldError {
    fn from(_: PathFormatError) -> Self {
        FieldError::bad_format("path", "Latin letters, dots, hyphen")
    }
}

/// Validated, lowercase materialized path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(String);

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.chars().all(|c| c.is_ascii_lowercase() || c == '-')
        && segment.chars().any(|c| c.is_ascii_lowercase())
}

impl NodePath {
    /// Parse and normalize a path string
    pub fn parse(raw: &str) -> Result<Self, PathFormatError> {
        let lowered = raw.to_ascii_lowercase();
        if lowered.split(PATH_SEPARATOR).all(is_valid_segment) {
            Ok(Self(lowered))
        } else {
            Err(PathFormatError {
                path: raw.to_string(),
            })
        }
    }

    /// Path of a node with the given parent path and identifier
    pub fn compute(
        parent: Option<&NodePath>,
        identifier: &Identifier,
    ) -> Result<Self, PathFormatError> {
        match parent {
            None => Self::parse(identifier.as_str()),
            Some(parent) => Self::parse(&format!(
                "{}{PATH_SEPARATOR}{}",
                parent.0,
                identifier.as_str()
            )),
        }
    }

    /// Rebuild a path read back from the store without re-validating
    pub(crate) fn from_db(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(PATH_SEPARATOR)
    }

    /// Number of segments, which is the depth of the node
    pub fn depth(&self) -> i64 {
        self.segments().count() as i64
    }

    pub fn last_segment(&self) -> &str {
        self.0
            .rsplit_once(PATH_SEPARATOR)
            .map_or(self.0.as_str(), |(_, last)| last)
    }

    /// Path of the parent node, `None` for roots
    pub fn parent_path(&self) -> Option<NodePath> {
        self.0
            .rsplit_once(PATH_SEPARATOR)
            .map(|(head, _)| Self(head.to_string()))
    }

    /// Strict descendant test on segment boundaries
    ///
    /// `main.sales` is a descendant of `main`; `mainframe` is not.
    pub fn is_descendant_of(&self, ancestor: &NodePath) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0[ancestor.0.len()..].starts_with(PATH_SEPARATOR)
    }

    /// True for the path itself or any of its descendants
    pub fn is_self_or_descendant_of(&self, ancestor: &NodePath) -> bool {
        self == ancestor || self.is_descendant_of(ancestor)
    }

    /// `[lower, upper)` string bounds enclosing all strict descendants
    pub fn descendant_range(&self) -> (String, String) {
        (
            format!("{}{PATH_SEPARATOR}", self.0),
            format!("{}{RANGE_END}", self.0),
        )
    }

    /// Replace the `old_prefix` ancestor part of this path with `new_prefix`
    ///
    /// `new_prefix = None` drops the prefix entirely, which is how compaction
    /// promotes the children of a purged root. Returns `None` when this path
    /// is not `old_prefix` or below it.
    pub fn rebase(&self, old_prefix: &NodePath, new_prefix: Option<&NodePath>) -> Option<NodePath> {
        if self == old_prefix {
            return new_prefix.cloned();
        }
        if !self.is_descendant_of(old_prefix) {
            return None;
        }
        let suffix = &self.0[old_prefix.0.len() + 1..];
        Some(match new_prefix {
            Some(prefix) => Self(format!("{}{PATH_SEPARATOR}{suffix}", prefix.0)),
            None => Self(suffix.to_string()),
        })
    }

    /// Same path with the node's own (last) segment replaced
    pub fn with_last_segment(&self, identifier: &Identifier) -> Result<NodePath, PathFormatError> {
        Self::compute(self.parent_path().as_ref(), identifier)
    }
}

/// Depth of a node whose parent has `parent_depth`
pub fn compute_depth(parent_depth: Option<i64>) -> i64 {
    parent_depth.map_or(1, |depth| depth + 1)
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> NodePath {
        NodePath::parse(s).unwrap()
    }

    fn ident(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    #[test]
    fn test_compute_root_and_child() {
        let root = NodePath::compute(None, &ident("main")).unwrap();
        assert_eq!(root.as_str(), "main");
        assert_eq!(root.depth(), 1);

        let child = NodePath::compute(Some(&root), &ident("Moscow")).unwrap();
        assert_eq!(child.as_str(), "main.moscow");
        assert_eq!(child.depth(), 2);
        assert_eq!(compute_depth(Some(root.depth())), child.depth());
        assert_eq!(compute_depth(None), 1);
    }

    #[test]
    fn test_parse_rejects_bad_grammar() {
        assert!(NodePath::parse("main..sales").is_err());
        assert!(NodePath::parse(".main").is_err());
        assert!(NodePath::parse("main.").is_err());
        assert!(NodePath::parse("main.---").is_err());
        assert!(NodePath::parse("main.sales1").is_err());
        assert_eq!(path("Main.Sales").as_str(), "main.sales");
    }

    #[test]
    fn test_is_descendant_of_respects_segment_boundary() {
        assert!(path("main.sales").is_descendant_of(&path("main")));
        assert!(path("main.sales.shops").is_descendant_of(&path("main")));
        assert!(!path("mainframe").is_descendant_of(&path("main")));
        assert!(!path("main").is_descendant_of(&path("main")));
        assert!(path("main").is_self_or_descendant_of(&path("main")));
    }

    #[test]
    fn test_descendant_range_bounds_subtree() {
        let (lower, upper) = path("main").descendant_range();
        for inside in ["main.a", "main.sales.shops", "main.z-z"] {
            assert!(inside >= lower.as_str() && inside < upper.as_str(), "{inside}");
        }
        for outside in ["main", "mainframe", "maio", "mai"] {
            assert!(!(outside >= lower.as_str() && outside < upper.as_str()), "{outside}");
        }
    }

    #[test]
    fn test_rebase_keeps_suffix() {
        let moved = path("sales.shops").rebase(&path("sales"), Some(&path("main.sales")));
        assert_eq!(moved.unwrap().as_str(), "main.sales.shops");

        let promoted = path("main.sales.shops").rebase(&path("main.sales"), Some(&path("sales")));
        assert_eq!(promoted.unwrap().as_str(), "sales.shops");

        let spliced = path("dead.child.leaf").rebase(&path("dead"), None);
        assert_eq!(spliced.unwrap().as_str(), "child.leaf");

        assert!(path("other.x").rebase(&path("sales"), None).is_none());
    }

    #[test]
    fn test_with_last_segment_and_parent_path() {
        let p = path("main.sales");
        assert_eq!(p.last_segment(), "sales");
        assert_eq!(p.parent_path().unwrap().as_str(), "main");
        assert!(path("main").parent_path().is_none());

        let renamed = p.with_last_segment(&ident("sales").deactivated()).unwrap();
        assert_eq!(renamed.as_str(), "main.deleted-sales");
    }
}
