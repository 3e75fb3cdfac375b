//! Prometheus /metrics and health endpoints, served on their own listener
//!
//! Endpoints:
//!   GET /metrics  - ingestion counters, Prometheus text format
//!   GET /healthz  - 200 while the process runs
//!   GET /readyz   - 200 once the map store accepts writes

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::{encoding::text::encode, registry::Registry as PRegistry};
use mapstore_storage::FileSystem;
use std::sync::Arc;

pub type Registry = PRegistry;

/// Counters updated by the API handlers.
#[derive(Clone, Default)]
pub struct ApiMetrics {
    pub archives_committed: Counter,
    pub files_stored: Counter,
    pub patches_applied: Counter,
    pub requests_rejected: Counter,
}

impl ApiMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "mapstore_archives_committed",
            "Zip uploads validated and written",
            metrics.archives_committed.clone(),
        );
        registry.register(
            "mapstore_files_stored",
            "Single files validated and written",
            metrics.files_stored.clone(),
        );
        registry.register(
            "mapstore_patches_applied",
            "WAM documents patched",
            metrics.patches_applied.clone(),
        );
        registry.register(
            "mapstore_requests_rejected",
            "Mutating requests refused with a client error",
            metrics.requests_rejected.clone(),
        );
        metrics
    }
}

#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    /// Same storage the API writes maps to
    pub fs: Arc<dyn FileSystem>,
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// 200 if a sentinel can be written and read back, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match state.fs.check_writable().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!("readiness: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, "map storage not writable")
        }
    }
}
