//! Database Layer
//!
//! This module handles all persistence for the directory using libsql:
//!
//! - Database initialization and connection management
//! - The `departments` table and its SQL primitives
//! - Row-scoped locks and the transactions that own them
//!
//! # Architecture
//!
//! Mutations follow one shape:
//!
//! 1. collect row locks through a [`LockSet`] (target, new parent, descendants)
//! 2. open a [`StoreTransaction`] (`BEGIN IMMEDIATE`) that takes ownership of them
//! 3. re-read and re-validate under the locks, then write
//! 4. commit or roll back, which releases the locks
//!
//! Row locks are always taken before the write transaction opens, so a task
//! holding the SQLite write lock never waits on a row lock.

mod database;
mod error;
mod locks;
mod node_store;
mod transaction;

pub use database::{DatabaseService, BUSY_TIMEOUT_MS};
pub use error::DatabaseError;
pub use locks::{LockSet, RowLockManager, DEFAULT_LOCK_TIMEOUT};
pub use node_store::NodeStore;
pub use transaction::StoreTransaction;
