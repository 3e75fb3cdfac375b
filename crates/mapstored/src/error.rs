//! API error type and its HTTP mapping.
//!
//! Validation failures are answered with the structured report itself
//! (per-entry for archives, per-category for single files) so clients can
//! show every problem at once. Everything else uses `{code, message}`.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mapstore_core::MapStoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("request body too large: {0}")]
    BodyTooLarge(String),

    #[error(transparent)]
    Store(#[from] MapStoreError),
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::BodyTooLarge(e.body_text())
        } else {
            ApiError::BadRequest(e.body_text())
        }
    }
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::BodyTooLarge(_) => "payload_too_large",
            Self::Store(e) => match e {
                MapStoreError::InvalidPath(_) => "invalid_path",
                MapStoreError::PayloadTooLarge { .. } => "payload_too_large",
                MapStoreError::MalformedRequest(_) => "malformed_request",
                MapStoreError::Validation(_) | MapStoreError::InvalidFile(_) => "validation_failed",
                MapStoreError::PatchRejected(_) => "patch_rejected",
                MapStoreError::NotFound(_) => "not_found",
                MapStoreError::Conflict(_) => "conflict",
                MapStoreError::Storage(_) => "storage_error",
                MapStoreError::Cache(_) | MapStoreError::InvalidCache(_) => "cache_error",
                MapStoreError::Io(_) | MapStoreError::Other(_) => "internal_error",
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Store(e) => match e {
                MapStoreError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                MapStoreError::NotFound(_) => StatusCode::NOT_FOUND,
                MapStoreError::Conflict(_) => StatusCode::CONFLICT,
                e if e.is_client_error() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            ApiError::Store(MapStoreError::Validation(set)) => (status, Json(set)).into_response(),
            ApiError::Store(MapStoreError::InvalidFile(report)) => {
                (status, Json(report)).into_response()
            }
            other => {
                let message = if status.is_server_error() {
                    tracing::error!(code = other.code(), "request failed: {other}");
                    "An error occurred".to_string()
                } else {
                    other.to_string()
                };
                let body = ErrorResponse {
                    code: other.code().to_string(),
                    message,
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
