//! Business Services
//!
//! This module contains the directory's business logic:
//!
//! - `HierarchyService` - create, move, deactivate, reactivate
//! - `QueryService` - cached children and roots listings
//! - `CompactionJob` - background purge of long-inactive departments
//! - `Directory` - wires the above from a [`crate::config::DirectoryConfig`]
//!
//! Services coordinate between the database layer and callers, enforcing the
//! tree invariants and talking to the consumed collaborators.

pub mod cache;
pub mod clock;
pub mod collaborators;
pub mod compaction;
mod directory;
pub mod error;
pub mod hierarchy_service;
pub mod query_service;

pub use cache::{ReadCache, CACHE_PREFIX};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{CacheInvalidator, CollaboratorError, LocationDeactivator, NoopLocations};
pub use compaction::{CompactionHandle, CompactionJob, CompactionOutcome, CompactionReport, Schedule};
pub use directory::{Directory, DirectoryBuilder};
pub use error::{DirectoryError, ErrorKind, ErrorResponse};
pub use hierarchy_service::HierarchyService;
pub use query_service::QueryService;
