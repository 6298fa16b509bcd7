//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, initialization, locking and query
//! failures.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
///
/// Covers connection, schema initialization, row-lock acquisition and SQL
/// execution. Business-rule failures are reported by the service layer.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// A stored row could not be mapped back into a node
    #[error("Corrupt row: {context}")]
    CorruptRow { context: String },

    /// Row lock was not granted within the configured wait
    #[error("Timed out after {waited_ms}ms waiting for row lock on {row_id}")]
    LockTimeout { row_id: String, waited_ms: u64 },

    /// Descendant set kept changing while locks were being collected
    #[error("Subtree of {row_id} did not settle after {attempts} lock attempts")]
    LockContention { row_id: String, attempts: usize },

    /// Cancellation was observed while waiting on a lock or before COMMIT
    #[error(transparent)]
    Cancelled(#[from] crate::cancel::Cancelled),
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Create a corrupt row error
    pub fn corrupt_row(context: impl Into<String>) -> Self {
        Self::CorruptRow {
            context: context.into(),
        }
    }

    /// True when the failure is a violated UNIQUE constraint
    pub fn is_unique_violation(&self) -> bool {
        self.to_string().contains("UNIQUE constraint failed")
    }
}
