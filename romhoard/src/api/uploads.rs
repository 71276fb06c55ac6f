//! ROM uploads
//!
//! Each file is sent as the raw body of its own PUT, so no multipart parsing
//! or size limit applies.

use std::collections::{BTreeMap, HashMap};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scans::JobListQuery;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::UploadJob;
use crate::services::upload_runner::DuplicateMatch;
use crate::services::{
    check_duplicates, create_upload, finalize_upload, receive_file, resolve_upload, DuplicateQuery, StartUploadRequest,
};
use crate::AppState;

/// POST /api/uploads
pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartUploadRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = create_upload(&state, &request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/uploads
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> ApiResult<Json<Vec<UploadJob>>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    Ok(Json(db::upload_jobs::list_upload_jobs(&state.db, limit).await?))
}

/// GET /api/uploads/:id
pub async fn status(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<UploadJob>> {
    let job = db::upload_jobs::get_upload_job(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Upload job {} not found", id)))?;
    Ok(Json(job))
}

/// PUT /api/uploads/:id/files/:name
pub async fn upload_file(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
    body: Body,
) -> ApiResult<Json<UploadJob>> {
    let job = receive_file(&state, id, &name, body.into_data_stream()).await?;
    Ok(Json(job))
}

/// POST /api/uploads/:id/finalize
pub async fn finalize(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let job = finalize_upload(&state, id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// File name to system slug, or `"skip"`
    pub assignments: HashMap<String, String>,
}

/// POST /api/uploads/:id/resolve
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.assignments.is_empty() {
        return Err(ApiError::BadRequest("No assignments given".to_string()));
    }
    let job = resolve_upload(&state, id, &request.assignments).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct DuplicateRequest {
    pub files: Vec<DuplicateQuery>,
}

#[derive(Debug, Serialize)]
pub struct DuplicateResponse {
    pub duplicates: BTreeMap<String, Option<DuplicateMatch>>,
}

/// POST /api/uploads/check-duplicates
pub async fn duplicates(
    State(state): State<AppState>,
    Json(request): Json<DuplicateRequest>,
) -> ApiResult<Json<DuplicateResponse>> {
    Ok(Json(DuplicateResponse {
        duplicates: check_duplicates(&state, &request.files).await?,
    }))
}

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/api/uploads", get(list_jobs).post(start))
        .route("/api/uploads/check-duplicates", post(duplicates))
        .route("/api/uploads/:id", get(status))
        .route(
            "/api/uploads/:id/files/:name",
            put(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/uploads/:id/finalize", post(finalize))
        .route("/api/uploads/:id/resolve", post(resolve))
}
