//! HTTP routes.
//!
//! Everything except `GET /maps` requires the API key when one is set. The
//! tenant is taken from the `Host` header of each request.

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{middleware, Json, Router};
use mapstore_core::MapStoreResult;
use mapstore_ingest::{MapStore, MapsCacheFile, UploadReport};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{require_api_key, Tenant};
use crate::error::{ApiError, ApiResult};
use crate::metrics::ApiMetrics;

/// Room for multipart framing and the `directory` field on top of the ceiling.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: MapStore,
    pub api_key: Option<Arc<SecretString>>,
    pub metrics: ApiMetrics,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    pub directory: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub source: String,
    pub destination: String,
}

pub fn router(state: AppState) -> Router {
    let ceiling = usize::try_from(state.store.limits().max_uncompressed_size).unwrap_or(usize::MAX);
    let body_limit = ceiling.saturating_add(MULTIPART_OVERHEAD);

    let protected = Router::new()
        .route("/upload", post(upload_archive))
        .route("/download", get(download))
        .route("/delete", delete(delete_directory))
        .route("/move", post(move_path))
        .route("/copy", post(copy_path))
        .route(
            "/{*path}",
            put(put_file).patch(patch_wam).delete(delete_file),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/maps", get(list_maps))
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

impl AppState {
    /// Count client-side rejections of mutating requests.
    fn observe<T>(&self, result: MapStoreResult<T>) -> ApiResult<T> {
        if let Err(e) = &result {
            if e.is_client_error() {
                self.metrics.requests_rejected.inc();
            }
        }
        result.map_err(ApiError::from)
    }
}

/// Collected multipart fields of an upload form.
struct UploadForm {
    file: Option<Bytes>,
    directory: String,
}

async fn read_form(mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm {
        file: None,
        directory: String::new(),
    };
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => form.file = Some(field.bytes().await?),
            Some("directory") => form.directory = field.text().await?,
            _ => {}
        }
    }
    Ok(form)
}

async fn upload_archive(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    multipart: Multipart,
) -> ApiResult<Json<UploadReport>> {
    let form = read_form(multipart).await?;
    let file = form
        .file
        .ok_or_else(|| ApiError::BadRequest("No file was uploaded.".into()))?;

    let report = state.observe(
        state
            .store
            .upload_archive(&tenant, &form.directory, file)
            .await,
    )?;
    state.metrics.archives_committed.inc();
    Ok(Json(report))
}

async fn put_file(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(path): Path<String>,
    multipart: Multipart,
) -> ApiResult<&'static str> {
    let form = read_form(multipart).await?;
    let file = form
        .file
        .ok_or_else(|| ApiError::BadRequest("No file was uploaded".into()))?;

    state.observe(state.store.put_file(&tenant, &path, file).await)?;
    state.metrics.files_stored.inc();
    Ok("File successfully uploaded.")
}

async fn patch_wam(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(path): Path<String>,
    Json(ops): Json<Value>,
) -> ApiResult<Json<Value>> {
    state.observe(state.store.patch_wam(&tenant, &path, ops).await)?;
    state.metrics.patches_applied.inc();
    Ok(Json(json!({ "success": true })))
}

async fn delete_file(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(path): Path<String>,
) -> ApiResult<StatusCode> {
    state.observe(state.store.delete_file(&tenant, &path).await)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_directory(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<StatusCode> {
    let directory = query.directory.unwrap_or_default();
    state.observe(state.store.delete_directory(&tenant, &directory).await)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_path(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(body): Json<MoveRequest>,
) -> ApiResult<StatusCode> {
    state.observe(
        state
            .store
            .move_path(&tenant, &body.source, &body.destination)
            .await,
    )?;
    Ok(StatusCode::OK)
}

async fn copy_path(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(body): Json<MoveRequest>,
) -> ApiResult<StatusCode> {
    state.observe(
        state
            .store
            .copy_path(&tenant, &body.source, &body.destination)
            .await,
    )?;
    Ok(StatusCode::CREATED)
}

async fn download(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<Response> {
    let directory = query.directory.unwrap_or_default();
    let (name, stream) = state.store.download(&tenant, &directory).await?;
    let headers = [
        (CONTENT_TYPE, "application/zip".to_string()),
        (CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}

async fn list_maps(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
) -> ApiResult<Json<MapsCacheFile>> {
    Ok(Json(state.store.list_maps(&tenant).await?))
}
