//! Directory Core - hierarchical department tree engine
//!
//! This crate stores an organizational directory as a forest of departments
//! and performs structural mutations on it while keeping every materialized
//! path consistent under concurrent access.
//!
//! # Architecture
//!
//! - **Materialized path**: each row carries `path` + `depth`; subtrees are
//!   index range scans
//! - **libsql/Turso**: embedded SQLite-compatible storage, one
//!   `BEGIN IMMEDIATE` transaction per mutation
//! - **Row locks**: subtree-scoped exclusive locks with a fixed acquisition
//!   order, owned by the transaction
//! - **Soft deactivation**: inactive departments are purged by a scheduled
//!   compaction job that splices their descendants into the surviving tree
//!
//! # Modules
//!
//! - [`models`] - Data structures and the path codec
//! - [`db`] - Database layer with libsql integration and row locks
//! - [`services`] - Hierarchy mutations, cached queries, compaction
//! - [`config`] - Configuration loading

pub mod cancel;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use cancel::{CancelToken, Cancelled};
pub use config::{CompactionConfig, DirectoryConfig};
pub use models::*;
pub use services::*;
