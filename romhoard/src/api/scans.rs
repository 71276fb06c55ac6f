//! Scan jobs and saved scan paths

use std::path::Path as FsPath;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::library::scanner::{
    delete_scan_path_roms, normalize_scan_path, scan_path_delete_preview, ScanPathDeletePreview, ScanPathDeletion,
};
use crate::models::{ScanJob, ScanPath, ScheduleInterval};
use crate::services::{active_scan_for_path, cancel_scan, start_scan, StartScanRequest};
use crate::AppState;

/// POST /api/scan/start
pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartScanRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = start_scan(&state, &request).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/scan/status/:id
pub async fn status(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<ScanJob>> {
    let job = db::scan_jobs::get_scan_job(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scan job {} not found", id)))?;
    Ok(Json(job))
}

/// POST /api/scan/cancel/:id
pub async fn cancel(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<ScanJob>> {
    Ok(Json(cancel_scan(&state, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// GET /api/scan/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> ApiResult<Json<Vec<ScanJob>>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    Ok(Json(db::scan_jobs::list_scan_jobs(&state.db, limit).await?))
}

/// Saved path plus its next scheduled run
#[derive(Debug, Serialize)]
pub struct ScanPathView {
    #[serde(flatten)]
    pub scan_path: ScanPath,
    pub next_scan_time: Option<DateTime<Utc>>,
}

impl From<ScanPath> for ScanPathView {
    fn from(scan_path: ScanPath) -> Self {
        Self {
            next_scan_time: scan_path.next_scan_time(),
            scan_path,
        }
    }
}

async fn require_scan_path(state: &AppState, id: i64) -> ApiResult<ScanPath> {
    db::scan_paths::get_scan_path(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scan path {} not found", id)))
}

/// GET /api/scan-paths
pub async fn list_scan_paths(State(state): State<AppState>) -> ApiResult<Json<Vec<ScanPathView>>> {
    let paths = db::scan_paths::list_scan_paths(&state.db).await?;
    Ok(Json(paths.into_iter().map(ScanPathView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CreateScanPathRequest {
    pub path: String,
    #[serde(default = "default_true")]
    pub use_hasheous: bool,
    #[serde(default)]
    pub schedule_enabled: bool,
    #[serde(default)]
    pub schedule_interval: ScheduleInterval,
}

fn default_true() -> bool {
    true
}

/// POST /api/scan-paths
pub async fn create_scan_path(
    State(state): State<AppState>,
    Json(request): Json<CreateScanPathRequest>,
) -> ApiResult<impl IntoResponse> {
    let raw = request.path.trim();
    if raw.is_empty() {
        return Err(ApiError::BadRequest("Path is required".to_string()));
    }
    if !tokio::fs::metadata(raw).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(ApiError::BadRequest(format!("Path is not a directory: {}", raw)));
    }
    let path = normalize_scan_path(FsPath::new(raw)).to_string_lossy().into_owned();
    if db::scan_paths::get_scan_path_by_path(&state.db, &path).await?.is_some() {
        return Err(ApiError::Conflict(format!("Scan path {} already exists", path)));
    }

    let scan_path = db::scan_paths::create_scan_path(
        &state.db,
        &path,
        request.use_hasheous,
        request.schedule_enabled,
        request.schedule_interval,
    )
    .await?;
    info!(path = %scan_path.path, "Saved scan path");
    Ok((StatusCode::CREATED, Json(ScanPathView::from(scan_path))))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateScanPathRequest {
    pub use_hasheous: Option<bool>,
    pub schedule_enabled: Option<bool>,
    pub schedule_interval: Option<ScheduleInterval>,
}

/// PATCH /api/scan-paths/:id
pub async fn update_scan_path(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateScanPathRequest>,
) -> ApiResult<Json<ScanPathView>> {
    let mut scan_path = require_scan_path(&state, id).await?;
    if let Some(use_hasheous) = request.use_hasheous {
        scan_path.use_hasheous = use_hasheous;
    }
    if let Some(enabled) = request.schedule_enabled {
        scan_path.schedule_enabled = enabled;
    }
    if let Some(interval) = request.schedule_interval {
        scan_path.schedule_interval = interval;
    }
    db::scan_paths::update_scan_path(&state.db, &scan_path).await?;
    Ok(Json(require_scan_path(&state, id).await?.into()))
}

/// GET /api/scan-paths/:id/delete-preview
pub async fn delete_preview(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ScanPathDeletePreview>> {
    let scan_path = require_scan_path(&state, id).await?;
    Ok(Json(scan_path_delete_preview(&state.db, &scan_path.path).await?))
}

#[derive(Debug, Serialize)]
pub struct ScanPathDeleteResponse {
    pub path: String,
    #[serde(flatten)]
    pub deleted: ScanPathDeletion,
}

/// DELETE /api/scan-paths/:id
///
/// Removes the saved path and every ROM under it; sets and games left
/// empty go too.
pub async fn delete_scan_path(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ScanPathDeleteResponse>> {
    let scan_path = require_scan_path(&state, id).await?;
    if let Some(active) = active_scan_for_path(&state, &scan_path.path).await? {
        return Err(ApiError::Conflict(format!(
            "Cannot delete {} while scan {} is running",
            scan_path.path, active
        )));
    }

    let deleted = delete_scan_path_roms(&state.db, &scan_path.path).await?;
    db::scan_paths::delete_scan_path(&state.db, id).await?;
    Ok(Json(ScanPathDeleteResponse {
        path: scan_path.path,
        deleted,
    }))
}

pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/scan/start", post(start))
        .route("/api/scan/status/:id", get(status))
        .route("/api/scan/cancel/:id", post(cancel))
        .route("/api/scan/jobs", get(list_jobs))
        .route("/api/scan-paths", get(list_scan_paths).post(create_scan_path))
        .route("/api/scan-paths/:id", axum::routing::patch(update_scan_path).delete(delete_scan_path))
        .route("/api/scan-paths/:id/delete-preview", get(delete_preview))
}
