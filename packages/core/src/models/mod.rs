//! Data Models
//!
//! This module contains the pure data structures of the directory tree:
//!
//! - `Node` - one department row with its materialized path
//! - `NodePath` / `Identifier` - the path codec and its segment type
//! - `validation` - shape checks run before any lock or store access

mod identifier;
mod node;
pub mod path;
pub mod validation;

pub use identifier::{Identifier, DEACTIVATED_MARKER, IDENTIFIER_MAX_LENGTH, IDENTIFIER_MIN_LENGTH};
pub use node::{Node, NodeId, NodeState, NodeSummary, NodeWithChildren};
pub use path::{compute_depth, NodePath, PathFormatError, PATH_SEPARATOR};
pub use validation::FieldError;
