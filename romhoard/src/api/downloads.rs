//! File downloads: single ROMs, ROM set zips, multi-game bundles and images

use std::path::Path as FsPath;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::library::download::{create_romset_bundle, rom_file, rom_file_as_stored, sanitize_filename};
use crate::library::romset_scoring::best_romset_for_game;
use crate::models::{DownloadJob, JobStatus};
use crate::services::{start_download, StartDownloadRequest};
use crate::AppState;

/// `Content-Disposition` with an ASCII fallback and an RFC 5987 UTF-8 name
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .map(|c| if c == '"' || c == '\\' { '\'' } else { c })
        .collect();
    if fallback == filename {
        return format!("attachment; filename=\"{}\"", fallback);
    }

    let mut encoded = String::new();
    for byte in filename.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", fallback, encoded)
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = FsPath::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "zip" => "application/zip",
        "7z" => "application/x-7z-compressed",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Stream a file from disk; `keep` is dropped (and its file removed) once the body ends
pub(crate) async fn stream_file(path: &FsPath, filename: &str, attachment: bool, keep: Option<TempPath>) -> ApiResult<Response> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("File not found: {}", filename)));
        }
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();

    let stream = ReaderStream::new(file);
    let body = match keep {
        Some(temp) => Body::from_stream(stream.map(move |chunk| {
            let _held = &temp;
            chunk
        })),
        None => Body::from_stream(stream),
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(filename))
        .header(header::CONTENT_LENGTH, len);
    if attachment {
        let value = HeaderValue::from_str(&content_disposition(filename))
            .map_err(|e| ApiError::Internal(format!("Invalid file name header: {}", e)))?;
        builder = builder.header(header::CONTENT_DISPOSITION, value);
    }
    builder
        .body(body)
        .map_err(|e| ApiError::Internal(format!("Failed to build response: {}", e)))
}

#[derive(Debug, Deserialize)]
pub struct RomDownloadQuery {
    #[serde(default)]
    pub mode: Option<String>,
}

/// GET /api/roms/:id/download
///
/// `mode=extract` (default) serves the ROM itself; `mode=stored` serves a
/// single-ROM archive as-is.
pub async fn download_rom(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<RomDownloadQuery>,
) -> ApiResult<Response> {
    let rom = db::roms::get_rom(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("ROM {} not found", id)))?;

    let file = match query.mode.as_deref().unwrap_or("extract") {
        "extract" => rom_file(&rom).await?,
        "stored" => rom_file_as_stored(&state.db, &rom).await?,
        other => return Err(ApiError::BadRequest(format!("Unknown download mode '{}'", other))),
    };
    let path = file.path.clone();
    stream_file(&path, &file.filename, true, file.temp).await
}

/// GET /api/romsets/:id/download
pub async fn download_romset(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let bundle = create_romset_bundle(&state.db, id).await?;
    let path = bundle.path.to_path_buf();
    let filename = sanitize_filename(bundle.filename.trim_end_matches(".zip")) + ".zip";
    stream_file(&path, &filename, true, Some(bundle.path)).await
}

/// GET /api/games/:id/download
///
/// Bundles the game's best ROM set.
pub async fn download_game(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    db::games::get_game(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Game {} not found", id)))?;
    let best = best_romset_for_game(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("No available ROMs".to_string()))?;
    download_romset(State(state), Path(best.rom_set.id)).await
}

/// GET /api/images/:id
pub async fn serve_image(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let image = db::images::get_image(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Image {} not found", id)))?;
    stream_file(FsPath::new(&image.file_path), &image.file_name, false, None).await
}

/// Job plus derived progress fields
#[derive(Debug, Serialize)]
pub struct DownloadStatus {
    #[serde(flatten)]
    pub job: DownloadJob,
    pub percent: i64,
    pub expired: bool,
}

impl From<DownloadJob> for DownloadStatus {
    fn from(job: DownloadJob) -> Self {
        Self {
            percent: job.percent(),
            expired: job.is_expired(Utc::now()),
            job,
        }
    }
}

/// POST /api/downloads
pub async fn create_download(
    State(state): State<AppState>,
    Json(request): Json<StartDownloadRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = start_download(&state, &request).await?;
    Ok((StatusCode::ACCEPTED, Json(DownloadStatus::from(job))))
}

async fn require_job(state: &AppState, id: Uuid) -> ApiResult<DownloadJob> {
    db::download_jobs::get_download_job(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Download job {} not found", id)))
}

/// GET /api/downloads
pub async fn list_downloads(State(state): State<AppState>) -> ApiResult<Json<Vec<DownloadStatus>>> {
    let jobs = db::download_jobs::list_download_jobs(&state.db).await?;
    Ok(Json(jobs.into_iter().map(DownloadStatus::from).collect()))
}

/// GET /api/downloads/:id
pub async fn download_status(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<DownloadStatus>> {
    Ok(Json(require_job(&state, id).await?.into()))
}

/// GET /api/downloads/:id/file
pub async fn download_bundle_file(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Response> {
    let job = require_job(&state, id).await?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::BadRequest("Download not ready".to_string()));
    }
    if job.is_expired(Utc::now()) {
        return Err(ApiError::NotFound("Download has expired".to_string()));
    }
    if job.file_path.is_empty() {
        return Err(ApiError::NotFound("Download file not found".to_string()));
    }
    stream_file(FsPath::new(&job.file_path), &job.file_name, true, None).await
}

pub fn download_routes() -> Router<AppState> {
    Router::new()
        .route("/api/roms/:id/download", get(download_rom))
        .route("/api/romsets/:id/download", get(download_romset))
        .route("/api/games/:id/download", get(download_game))
        .route("/api/images/:id", get(serve_image))
        .route("/api/downloads", post(create_download).get(list_downloads))
        .route("/api/downloads/:id", get(download_status))
        .route("/api/downloads/:id/file", get(download_bundle_file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("Tetris (World).gb"),
            "attachment; filename=\"Tetris (World).gb\""
        );
        let header = content_disposition("Pokémon.zip");
        assert!(header.starts_with("attachment; filename=\"Pok_mon.zip\""));
        assert!(header.ends_with("filename*=UTF-8''Pok%C3%A9mon.zip"));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("bundle.ZIP"), "application/zip");
        assert_eq!(content_type_for("cover.jpg"), "image/jpeg");
        assert_eq!(content_type_for("game.gba"), "application/octet-stream");
    }
}
