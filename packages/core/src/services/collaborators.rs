//! Consumed collaborators
//!
//! The directory calls out to two services it does not own: the location
//! registry, which must retire locations that only a deactivated department
//! used, and the read cache, which must forget stale listings after a write.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::NodeId;

/// Failure reported by a collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{collaborator}: {message}")]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

/// Location registry hook used by deactivation
///
/// `locations_of` is called inside the deactivation, before its transaction
/// commits; an error there aborts the deactivation. `deactivate_exclusive`
/// is called only after COMMIT, so a rolled back or cancelled deactivation
/// never retires a location. Its failures are logged and never undo the
/// deactivation.
#[async_trait]
pub trait LocationDeactivator: Send + Sync {
    /// Ids of the locations attached to a department
    async fn locations_of(&self, node_id: NodeId) -> Result<Vec<String>, CollaboratorError>;

    /// Deactivate those of `location_ids` no other active department uses
    async fn deactivate_exclusive(
        &self,
        node_id: NodeId,
        location_ids: &[String],
    ) -> Result<(), CollaboratorError>;
}

/// Prefix-based invalidation of cached read models
///
/// Called after commit; failures are logged and never undo the mutation.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn remove_by_prefix(&self, prefix: &str) -> Result<(), CollaboratorError>;
}

/// Location hook for deployments without a location registry
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLocations;

#[async_trait]
impl LocationDeactivator for NoopLocations {
    async fn locations_of(&self, _node_id: NodeId) -> Result<Vec<String>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn deactivate_exclusive(
        &self,
        _node_id: NodeId,
        _location_ids: &[String],
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
