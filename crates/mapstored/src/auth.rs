//! API key middleware and the tenant extractor.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::api::AppState;
use crate::error::ApiError;

/// Keys are compared as fixed-size digests so neither the content nor the
/// length of the configured key shows up in the timing.
fn keys_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    bool::from(provided.as_slice().ct_eq(expected.as_slice()))
}

/// Require `Authorization: Bearer <key>` (or the bare key) when a key is configured.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key.as_ref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim());

    match provided {
        Some(key) if keys_match(key, expected.expose_secret()) => {
            Ok(next.run(request).await)
        }
        _ => {
            tracing::debug!(path = %request.uri().path(), "rejected unauthenticated request");
            Err(ApiError::Unauthorized)
        }
    }
}

/// The tenant a request is addressed to: its `Host`, port included (the
/// path mapper normalizes it).
#[derive(Debug, Clone)]
pub struct Tenant(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.host())
            .ok_or_else(|| ApiError::BadRequest("missing Host header".into()))?;
        Ok(Tenant(host.to_string()))
    }
}
