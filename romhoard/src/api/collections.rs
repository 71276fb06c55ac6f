//! Collections: CRUD, entries, ordering, export and import
//!
//! Collection archives are sent as the raw request body.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use super::downloads::{content_disposition, stream_file};
use crate::db;
use crate::db::collections::CollectionSummary;
use crate::error::{ApiError, ApiResult};
use crate::library::collection_archive::{self, ArchiveImportSummary, ArchiveValidation, MAX_ARCHIVE_SIZE};
use crate::library::collections::{self, ImportSummary};
use crate::models::{Collection, CollectionEntry, CollectionInput};
use crate::AppState;

/// Entry with the library game it resolves to, if any
#[derive(Debug, Serialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: CollectionEntry,
    pub game_id: Option<i64>,
    pub in_library: bool,
}

#[derive(Debug, Serialize)]
pub struct CollectionDetail {
    #[serde(flatten)]
    pub collection: Collection,
    pub entries: Vec<EntryView>,
}

async fn entry_views(state: &AppState, entries: Vec<CollectionEntry>) -> ApiResult<Vec<EntryView>> {
    let mut views = Vec::with_capacity(entries.len());
    for entry in entries {
        let game_id = collections::matched_game(&state.db, &entry).await?.map(|g| g.id);
        views.push(EntryView {
            in_library: game_id.is_some(),
            game_id,
            entry,
        });
    }
    Ok(views)
}

async fn collection_detail(state: &AppState, collection: Collection) -> ApiResult<CollectionDetail> {
    let entries = db::collections::list_entries(&state.db, collection.id).await?;
    Ok(CollectionDetail {
        entries: entry_views(state, entries).await?,
        collection,
    })
}

/// GET /api/collections
pub async fn list_collections(State(state): State<AppState>) -> ApiResult<Json<Vec<CollectionSummary>>> {
    Ok(Json(db::collections::list_collections(&state.db).await?))
}

/// POST /api/collections
pub async fn create_collection(
    State(state): State<AppState>,
    Json(input): Json<CollectionInput>,
) -> ApiResult<impl IntoResponse> {
    let collection = collections::create_collection(&state.db, &input).await?;
    Ok((StatusCode::CREATED, Json(collection_detail(&state, collection).await?)))
}

/// GET /api/collections/:id
pub async fn get_collection(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<CollectionDetail>> {
    let collection = collections::require_collection(&state.db, id).await?;
    Ok(Json(collection_detail(&state, collection).await?))
}

/// PUT /api/collections/:id
pub async fn update_collection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<CollectionInput>,
) -> ApiResult<Json<CollectionDetail>> {
    let collection = collections::update_collection(&state.db, id, &input).await?;
    Ok(Json(collection_detail(&state, collection).await?))
}

/// DELETE /api/collections/:id
pub async fn delete_collection(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    collections::delete_collection(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AddEntryRequest {
    pub game_name: String,
    pub system_slug: String,
    #[serde(default)]
    pub notes: String,
}

/// POST /api/collections/:id/entries
pub async fn add_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AddEntryRequest>,
) -> ApiResult<impl IntoResponse> {
    let entry = collections::add_entry(&state.db, id, &request.game_name, &request.system_slug, &request.notes).await?;
    let mut views = entry_views(&state, vec![entry]).await?;
    let view = views
        .pop()
        .ok_or_else(|| ApiError::Internal("Entry vanished after insert".to_string()))?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// DELETE /api/collections/:id/entries/:entry_id
pub async fn remove_entry(
    State(state): State<AppState>,
    Path((id, entry_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    collections::remove_entry(&state.db, id, entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub entry_ids: Vec<i64>,
}

/// PUT /api/collections/:id/order
pub async fn reorder(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ReorderRequest>,
) -> ApiResult<Json<Vec<EntryView>>> {
    let entries = collections::reorder_entries(&state.db, id, &request.entry_ids).await?;
    Ok(Json(entry_views(&state, entries).await?))
}

/// GET /api/collections/:id/export
pub async fn export(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let collection = collections::require_collection(&state.db, id).await?;
    let document = collections::export_collection(&state.db, id).await?;
    let disposition = content_disposition(&format!("{}.json", collection.slug));
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(document)))
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub data: Value,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub creator: Option<String>,
}

/// POST /api/collections/import
pub async fn import(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> ApiResult<impl IntoResponse> {
    let summary: ImportSummary =
        collections::import_collection(&state.db, &request.data, request.overwrite, request.creator.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /api/collections/:id/export/archive
pub async fn export_archive(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let archive = collection_archive::export_collection_archive(&state.db, id).await?;
    let path = archive.path.to_path_buf();
    stream_file(&path, &archive.filename, true, Some(archive.path)).await
}

/// Write a request body to a temp zip, refusing anything over the archive limit
async fn spool_archive(body: Body) -> ApiResult<TempPath> {
    let temp = tempfile::Builder::new()
        .prefix("romhoard-import-")
        .suffix(".zip")
        .tempfile()?
        .into_temp_path();
    let mut file = tokio::fs::File::create(&temp).await?;
    let mut stream = body.into_data_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(format!("Upload interrupted: {}", e)))?;
        written += chunk.len() as u64;
        if written > MAX_ARCHIVE_SIZE {
            return Err(ApiError::BadRequest(format!(
                "Archive too large (max {} bytes)",
                MAX_ARCHIVE_SIZE
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(temp)
}

/// POST /api/collections/validate/archive
pub async fn validate_archive(body: Body) -> ApiResult<Json<ArchiveValidation>> {
    let temp = spool_archive(body).await?;
    Ok(Json(collection_archive::validate_collection_archive(&temp).await?))
}

#[derive(Debug, Deserialize)]
pub struct ArchiveImportQuery {
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub creator: Option<String>,
}

/// POST /api/collections/import/archive
pub async fn import_archive(
    State(state): State<AppState>,
    Query(query): Query<ArchiveImportQuery>,
    body: Body,
) -> ApiResult<impl IntoResponse> {
    let temp = spool_archive(body).await?;
    let summary: ArchiveImportSummary = collection_archive::import_collection_archive(
        &state.db,
        &temp,
        &state.images_dir,
        query.overwrite,
        query.creator.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub fn collection_routes() -> Router<AppState> {
    Router::new()
        .route("/api/collections", get(list_collections).post(create_collection))
        .route("/api/collections/import", post(import))
        .route(
            "/api/collections/:id",
            get(get_collection).put(update_collection).delete(delete_collection),
        )
        .route("/api/collections/:id/entries", post(add_entry))
        .route("/api/collections/:id/entries/:entry_id", delete(remove_entry))
        .route("/api/collections/:id/order", put(reorder))
        .route("/api/collections/:id/export", get(export))
        .route("/api/collections/:id/export/archive", get(export_archive))
        .route(
            "/api/collections/validate/archive",
            post(validate_archive).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/collections/import/archive",
            post(import_archive).layer(DefaultBodyLimit::disable()),
        )
}
