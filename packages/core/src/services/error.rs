//! Service Layer Error Types
//!
//! This module defines the error returned by every directory operation,
//! together with its coarse [`ErrorKind`] and the serializable response shape
//! (`{code, message, field}` entries) exposed at the API boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::{FieldError, NodeId, NodeState, PathFormatError};
use crate::services::collaborators::CollaboratorError;

/// Coarse classification of a [`DirectoryError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Cycle,
    AlreadyInState,
    Storage,
    Failure,
    Cancelled,
}

/// Directory operation errors
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Input failed shape validation; every offending field is listed
    #[error("Validation failed: {}", join_messages(.0))]
    Validation(Vec<FieldError>),

    /// A department cannot be moved under itself
    #[error("Department {id} cannot be its own parent")]
    SelfParent { id: NodeId },

    /// An active department already uses this identifier
    #[error("Department with identifier '{identifier}' already exists")]
    Conflict { identifier: String },

    /// Referenced department does not exist
    #[error("Department {id} not found")]
    NotFound { field: &'static str, id: NodeId },

    /// The new parent lies inside the subtree being moved
    #[error("Cannot move department {node_id} under its own descendant {new_parent_id}")]
    Cycle {
        node_id: NodeId,
        new_parent_id: NodeId,
    },

    /// Department is already in the requested lifecycle state
    #[error("Department {id} is already {state}")]
    AlreadyInState { id: NodeId, state: NodeState },

    /// A consumed collaborator failed inside the operation
    #[error("Collaborator failed: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Store failure, surfaced as-is
    #[error("Database operation failed: {0}")]
    Storage(DatabaseError),

    /// Cancellation observed before commit; nothing was changed
    #[error("Operation cancelled")]
    Cancelled,
}

fn join_messages(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<DatabaseError> for DirectoryError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Cancelled(_) => Self::Cancelled,
            other => Self::Storage(other),
        }
    }
}

impl From<FieldError> for DirectoryError {
    fn from(err: FieldError) -> Self {
        Self::Validation(vec![err])
    }
}

impl From<PathFormatError> for DirectoryError {
    fn from(err: PathFormatError) -> Self {
        Self::Validation(vec![err.into()])
    }
}

impl DirectoryError {
    pub fn not_found(field: &'static str, id: NodeId) -> Self {
        Self::NotFound { field, id }
    }

    pub fn conflict(identifier: impl Into<String>) -> Self {
        Self::Conflict {
            identifier: identifier.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::SelfParent { .. } => ErrorKind::Validation,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Cycle { .. } => ErrorKind::Cycle,
            Self::AlreadyInState { .. } => ErrorKind::AlreadyInState,
            Self::Collaborator(_) => ErrorKind::Failure,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Machine-readable code of the (first) error
    pub fn code(&self) -> &str {
        match self {
            Self::Validation(errors) => errors
                .first()
                .map_or("param.bad.format", |e| e.code.as_str()),
            Self::SelfParent { .. } => "cannot.add.self",
            Self::Conflict { .. } => "record.already.exists",
            Self::NotFound { .. } => "record.not.found",
            Self::Cycle { .. } => "cannot.add.ancestor",
            Self::AlreadyInState {
                state: NodeState::Inactive,
                ..
            } => "department.already.deactivated",
            Self::AlreadyInState {
                state: NodeState::Active,
                ..
            } => "department.already.activated",
            Self::Collaborator(_) => "collaborator.failure",
            Self::Storage(_) => "database.error",
            Self::Cancelled => "operation.cancelled",
        }
    }

    /// Input field the (first) error refers to, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation(errors) => errors.first().and_then(|e| e.field.as_deref()),
            Self::SelfParent { .. } | Self::Cycle { .. } => Some("parentId"),
            Self::Conflict { .. } => Some("identifier"),
            Self::NotFound { field, .. } => Some(*field),
            Self::AlreadyInState { .. } => Some("departmentId"),
            Self::Collaborator(_) | Self::Storage(_) | Self::Cancelled => None,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let errors = match self {
            Self::Validation(errors) => errors.clone(),
            other => vec![FieldError::new(
                other.code(),
                other.to_string(),
                other.field(),
            )],
        };
        ErrorResponse {
            kind: self.kind(),
            errors,
        }
    }
}

/// Serializable error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub errors: Vec<FieldError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_response_lists_every_field() {
        let err = DirectoryError::Validation(vec![
            FieldError::empty("name"),
            FieldError::bad_format("identifier", "Latin letters, hyphens"),
        ]);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.code(), "param.is.empty");

        let response = err.to_response();
        assert_eq!(response.errors.len(), 2);
        assert_eq!(response.errors[1].field.as_deref(), Some("identifier"));
    }

    #[test]
    fn test_codes_for_business_failures() {
        let id = NodeId::new();
        assert_eq!(DirectoryError::SelfParent { id }.code(), "cannot.add.self");
        assert_eq!(DirectoryError::conflict("main").code(), "record.already.exists");
        assert_eq!(
            DirectoryError::not_found("parentId", id).field(),
            Some("parentId")
        );
        assert_eq!(
            DirectoryError::AlreadyInState {
                id,
                state: NodeState::Inactive
            }
            .code(),
            "department.already.deactivated"
        );
    }

    #[test]
    fn test_cancelled_database_error_maps_to_cancelled() {
        let err = DirectoryError::from(DatabaseError::from(crate::cancel::Cancelled));
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let err = DirectoryError::from(DatabaseError::sql_execution("boom"));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.code(), "database.error");
        assert_eq!(err.to_response().errors[0].field, None);
    }
}
