//! Structured validation reports returned to clients.
//!
//! Shape on the wire (per file):
//!   `{"map": [{"type": "error", "message": "...", "details": "..."}], "tilesets": [...]}`
//!
//! Empty categories are omitted; an empty report means the file was accepted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-entry validation reports for an archive, keyed by entry name.
pub type ValidationErrorSet = BTreeMap<String, OrganizedErrors>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(rename = "type")]
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub details: String,
}

impl ValidationError {
    pub fn error(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            details: details.into(),
        }
    }
}

/// Validation findings grouped by the part of the map they concern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizedErrors {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub map: Vec<ValidationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tilesets: Vec<ValidationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ValidationError>,
}

impl OrganizedErrors {
    /// A report holding a single map-level error.
    pub fn map_error(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            map: vec![ValidationError::error(message, details)],
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.map.len() + self.tilesets.len() + self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if at least one finding is an error (warnings alone do not reject a file).
    pub fn has_errors(&self) -> bool {
        self.map
            .iter()
            .chain(&self.tilesets)
            .chain(&self.scripts)
            .any(|e| e.severity == Severity::Error)
    }
}
