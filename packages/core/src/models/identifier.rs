//! Department Identifier
//!
//! The identifier is the short slug a department contributes to the
//! materialized path. Active identifiers are unique; deactivated ones carry the
//! [`DEACTIVATED_MARKER`] prefix so the bare slug can be reused.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::models::validation::FieldError;

/// Prefix prepended to the identifier of a deactivated department
pub const DEACTIVATED_MARKER: &str = "deleted-";

pub const IDENTIFIER_MIN_LENGTH: usize = 3;
pub const IDENTIFIER_MAX_LENGTH: usize = 150;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z-]+$";

fn identifier_regex() -> &'static Regex {
    static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER_REGEX.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).unwrap())
}

/// Lowercase slug of ASCII letters and hyphens
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Validate and normalize a user-supplied identifier
    ///
    /// Returns the first rule the value breaks. Callers that need every
    /// field error at once use [`crate::models::validation::validate_create`].
    pub fn parse(raw: &str) -> Result<Self, FieldError> {
        if raw.trim().is_empty() {
            return Err(FieldError::empty("identifier"));
        }

        let len = raw.chars().count();
        if !(IDENTIFIER_MIN_LENGTH..=IDENTIFIER_MAX_LENGTH).contains(&len) {
            return Err(FieldError::length_not_in_range(
                "identifier",
                IDENTIFIER_MIN_LENGTH,
                IDENTIFIER_MAX_LENGTH,
            ));
        }

        if !identifier_regex().is_match(raw) {
            return Err(FieldError::bad_format("identifier", "Latin letters, hyphens"));
        }

        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Rebuild an identifier read back from the store without re-validating
    pub(crate) fn from_db(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_marked_deactivated(&self) -> bool {
        self.0.starts_with(DEACTIVATED_MARKER)
    }

    /// Identifier with the deactivation marker prepended
    pub fn deactivated(&self) -> Self {
        if self.is_marked_deactivated() {
            return self.clone();
        }
        Self(format!("{DEACTIVATED_MARKER}{}", self.0))
    }

    /// Identifier with the deactivation marker stripped
    ///
    /// The bare slug is validated again because it must be a legal active
    /// identifier before it is put back into a path.
    pub fn reactivated(&self) -> Result<Self, FieldError> {
        match self.0.strip_prefix(DEACTIVATED_MARKER) {
            Some(bare) => Self::parse(bare),
            None => Ok(self.clone()),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
