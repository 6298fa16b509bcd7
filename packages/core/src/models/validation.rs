//! Input Shape Validation
//!
//! Plain functions that check command inputs before any lock is taken or the
//! store is touched. Each returns every [`FieldError`] it finds so the caller
//! can report all offending fields at once.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::identifier::{Identifier, DEACTIVATED_MARKER};
use crate::models::NodeId;

pub const NAME_MIN_LENGTH: usize = 3;
pub const NAME_MAX_LENGTH: usize = 150;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 50;
pub const DEFAULT_PREFETCH: u32 = 3;
pub const MAX_PREFETCH: u32 = 20;

/// A single structured validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
}

impl FieldError {
    pub fn new(code: &str, message: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    pub fn empty(field: &str) -> Self {
        Self::new(
            "param.is.empty",
            format!("Parameter '{field}' cannot be empty"),
            Some(field),
        )
    }

    pub fn length_not_in_range(field: &str, min: usize, max: usize) -> Self {
        Self::new(
            "param.bad.length",
            format!("Parameter '{field}' length must be between {min} and {max}"),
            Some(field),
        )
    }

    pub fn bad_format(field: &str, allowed: &str) -> Self {
        Self::new(
            "param.bad.format",
            format!("Parameter '{field}' has invalid format. Allowed: '{allowed}'"),
            Some(field),
        )
    }

    pub fn too_small(field: &str, min: u32) -> Self {
        Self::new(
            "param.too.small",
            format!("Parameter '{field}' must be greater than or equal to '{min}'"),
            Some(field),
        )
    }

    pub fn out_of_range(field: &str, min: u32, max: u32) -> Self {
        Self::new(
            "param.bad.length",
            format!("Parameter '{field}' must be between {min} and {max}"),
            Some(field),
        )
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

pub fn validate_name(name: &str) -> Vec<FieldError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return vec![FieldError::empty("name")];
    }
    let len = trimmed.chars().count();
    if !(NAME_MIN_LENGTH..=NAME_MAX_LENGTH).contains(&len) {
        return vec![FieldError::length_not_in_range(
            "name",
            NAME_MIN_LENGTH,
            NAME_MAX_LENGTH,
        )];
    }
    Vec::new()
}

pub fn validate_identifier(identifier: &str) -> Vec<FieldError> {
    match Identifier::parse(identifier) {
        Err(e) => vec![e],
        Ok(id) if id.is_marked_deactivated() => vec![FieldError::bad_format(
            "identifier",
            "must not start with the reserved 'deleted-' marker",
        )],
        Ok(_) => Vec::new(),
    }
}

/// Validate the node id an operation targets
pub fn validate_node_id(field: &str, id: NodeId) -> Vec<FieldError> {
    if id.as_uuid() == Uuid::nil() {
        return vec![FieldError::empty(field)];
    }
    Vec::new()
}

pub fn validate_create(name: &str, identifier: &str, parent_id: Option<NodeId>) -> Vec<FieldError> {
    let mut errors = validate_name(name);
    errors.extend(validate_identifier(identifier));
    if let Some(parent_id) = parent_id {
        errors.extend(validate_node_id("parentId", parent_id));
    }
    errors
}

pub fn validate_move(node_id: NodeId, new_parent_id: Option<NodeId>) -> Vec<FieldError> {
    let mut errors = validate_node_id("departmentId", node_id);
    if let Some(parent_id) = new_parent_id {
        errors.extend(validate_node_id("parentId", parent_id));
    }
    errors
}

pub fn validate_page(page: u32, page_size: u32) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if page < 1 {
        errors.push(FieldError::too_small("page", 1));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        errors.push(FieldError::out_of_range("pageSize", 1, MAX_PAGE_SIZE));
    }
    errors
}

pub fn validate_prefetch(prefetch: u32) -> Vec<FieldError> {
    if prefetch > MAX_PREFETCH {
        return vec![FieldError::out_of_range("prefetch", 0, MAX_PREFETCH)];
    }
    Vec::new()
}
