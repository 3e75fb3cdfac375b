use thiserror::Error;

use crate::report::{OrganizedErrors, ValidationErrorSet};

pub type MapStoreResult<T> = Result<T, MapStoreError>;

#[derive(Debug, Error)]
pub enum MapStoreError {
    /// Path contains a traversal segment or is otherwise unusable
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("file too large: contents must not exceed {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// One or more members of an archive failed validation
    #[error("validation failed for {} file(s)", .0.len())]
    Validation(ValidationErrorSet),

    /// A single uploaded (or patched) file failed validation
    #[error("invalid file: {} error(s)", .0.len())]
    InvalidFile(OrganizedErrors),

    #[error("patch rejected: {0}")]
    PatchRejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cache error: {0}")]
    Cache(String),

    /// Cache artifact exists but cannot be parsed
    #[error("invalid cache file: {0}")]
    InvalidCache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MapStoreError {
    /// Errors recovered into a structured client response rather than
    /// surfaced as a fatal request failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MapStoreError::InvalidPath(_)
                | MapStoreError::PayloadTooLarge { .. }
                | MapStoreError::MalformedRequest(_)
                | MapStoreError::Validation(_)
                | MapStoreError::InvalidFile(_)
                | MapStoreError::PatchRejected(_)
                | MapStoreError::NotFound(_)
                | MapStoreError::Conflict(_)
        )
    }

    /// Missing or unreadable cache artifact; the caller regenerates once.
    pub fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            MapStoreError::NotFound(_) | MapStoreError::InvalidCache(_)
        )
    }
}
