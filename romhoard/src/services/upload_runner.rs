//! Upload jobs
//!
//! A job is created with the number of files the client will send. Files
//! arrive one request each into the job's folder; finalizing files them
//! into the library in a tokio task. Files whose system cannot be detected
//! leave the job awaiting until the user assigns one or skips them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use romhoard_common::events::{EventBus, RomhoardEvent};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::db::upload_jobs::UploadCompletion;
use crate::error::{ApiError, ApiResult};
use crate::library::identify::Identifier;
use crate::library::upload::{
    process_uploads, sanitize_upload_name, UploadError, UploadPass, UploadProgress, UploadProgressSink, UploadTarget,
};
use crate::models::{System, UploadJob, UploadStatus};
use crate::AppState;

/// Assignment value that drops an unidentified file
pub const SKIP: &str = "skip";

#[derive(Debug, Clone, Deserialize)]
pub struct StartUploadRequest {
    pub file_count: i64,
    #[serde(default)]
    pub total_size: i64,
    #[serde(default = "default_use_hasheous")]
    pub use_hasheous: bool,
}

fn default_use_hasheous() -> bool {
    true
}

struct JobProgress {
    pool: SqlitePool,
    events: EventBus,
    job_id: Uuid,
}

#[async_trait]
impl UploadProgressSink for JobProgress {
    async fn report(&self, progress: &UploadProgress) {
        if let Err(e) =
            db::upload_jobs::update_progress(&self.pool, self.job_id, progress.files_processed, &progress.current_file)
                .await
        {
            warn!(job_id = %self.job_id, "Failed to store upload progress: {}", e);
        }
        self.events.emit_lossy(RomhoardEvent::UploadProgress {
            job_id: self.job_id,
            files_processed: progress.files_processed.max(0) as u64,
            files_total: progress.files_total.max(0) as u64,
            current_file: progress.current_file.clone(),
            timestamp: Utc::now(),
        });
    }
}

fn job_dir(state: &AppState, job_id: Uuid) -> PathBuf {
    state.uploads_dir.join(job_id.to_string())
}

async fn require_job(state: &AppState, job_id: Uuid) -> ApiResult<UploadJob> {
    db::upload_jobs::get_upload_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Upload job {} not found", job_id)))
}

async fn require_library_root(state: &AppState) -> ApiResult<PathBuf> {
    db::settings::get_library_root(&state.db).await?.ok_or_else(|| {
        ApiError::BadRequest("Upload destination not configured. Set library_root in settings.".to_string())
    })
}

/// Open a job for `file_count` files
pub async fn create_upload(state: &AppState, request: &StartUploadRequest) -> ApiResult<UploadJob> {
    require_library_root(state).await?;
    if request.file_count <= 0 {
        return Err(ApiError::BadRequest("No files selected".to_string()));
    }

    let job = db::upload_jobs::create_upload_job(
        &state.db,
        request.file_count,
        request.total_size.max(0),
        request.use_hasheous,
    )
    .await?;
    tokio::fs::create_dir_all(job_dir(state, job.job_id)).await?;
    info!(job_id = %job.job_id, files = request.file_count, "Upload job created");
    Ok(job)
}

/// Store one file of an uploading job
///
/// A stream error removes the partial file.
pub async fn receive_file<S, E>(state: &AppState, job_id: Uuid, file_name: &str, mut body: S) -> ApiResult<UploadJob>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let job = require_job(state, job_id).await?;
    if job.status != UploadStatus::Uploading {
        return Err(ApiError::BadRequest(format!("Upload job is {}, not accepting files", job.status)));
    }
    if job.files_uploaded >= job.files_total {
        return Err(ApiError::BadRequest(format!(
            "All {} files of this upload were already received",
            job.files_total
        )));
    }
    let name = sanitize_upload_name(file_name)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid file name '{}'", file_name)))?;

    let dir = job_dir(state, job_id);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(&name);
    if tokio::fs::try_exists(&path).await? {
        return Err(ApiError::Conflict(format!("File '{}' was already uploaded", name)));
    }

    let mut file = tokio::fs::File::create(&path).await?;
    let mut written: i64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(ApiError::BadRequest(format!("Upload of '{}' interrupted: {}", name, e)));
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as i64;
    }
    file.flush().await?;

    db::upload_jobs::record_file_received(&state.db, job_id, &name, written).await?;
    info!(job_id = %job_id, file = %name, bytes = written, "Upload file received");
    require_job(state, job_id).await
}

/// Received files in name order
async fn received_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Stop receiving and file everything in the background
pub async fn finalize_upload(state: &AppState, job_id: Uuid) -> ApiResult<UploadJob> {
    let job = require_job(state, job_id).await?;
    if job.status != UploadStatus::Uploading {
        return Err(ApiError::Conflict(format!("Upload job is {}, cannot finalize", job.status)));
    }
    if job.files_uploaded == 0 {
        db::upload_jobs::mark_failed(&state.db, job_id, "No files were uploaded").await?;
        let _ = tokio::fs::remove_dir_all(job_dir(state, job_id)).await;
        return Err(ApiError::BadRequest("No files were uploaded".to_string()));
    }
    let library_root = require_library_root(state).await?;

    if !db::upload_jobs::transition(&state.db, job_id, UploadStatus::Uploading, UploadStatus::Processing).await? {
        return Err(ApiError::Conflict("Upload job was finalized concurrently".to_string()));
    }

    let files: Vec<(PathBuf, Option<System>)> = received_files(&job_dir(state, job_id))
        .await?
        .into_iter()
        .map(|path| (path, None))
        .collect();
    info!(job_id = %job_id, files = files.len(), "Upload finalized");

    let state_clone = state.clone();
    tokio::spawn(async move {
        run_pass(state_clone, job_id, library_root, files, Vec::new(), 0).await;
    });
    require_job(state, job_id).await
}

/// Give unidentified files a system, or `"skip"` to drop them
///
/// Files left out of `assignments` stay unidentified.
pub async fn resolve_upload(
    state: &AppState,
    job_id: Uuid,
    assignments: &HashMap<String, String>,
) -> ApiResult<UploadJob> {
    let job = require_job(state, job_id).await?;
    if job.status != UploadStatus::Awaiting {
        return Err(ApiError::Conflict(format!(
            "Upload job is {}, nothing to resolve",
            job.status
        )));
    }
    let library_root = require_library_root(state).await?;

    let waiting: HashSet<&str> = job.unidentified.iter().map(String::as_str).collect();
    let mut systems = HashMap::new();
    for (file_name, slug) in assignments {
        if !waiting.contains(file_name.as_str()) {
            return Err(ApiError::BadRequest(format!("'{}' is not waiting for a system", file_name)));
        }
        if slug == SKIP {
            continue;
        }
        let system = db::systems::get_system(&state.db, slug)
            .await?
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown system '{}'", slug)))?;
        systems.insert(file_name.clone(), system);
    }

    if !db::upload_jobs::transition(&state.db, job_id, UploadStatus::Awaiting, UploadStatus::Processing).await? {
        return Err(ApiError::Conflict("Upload job was resolved concurrently".to_string()));
    }

    let dir = job_dir(state, job_id);
    let mut files = Vec::new();
    let mut still_waiting = Vec::new();
    let mut skipped = 0;
    for file_name in &job.unidentified {
        match assignments.get(file_name) {
            Some(slug) if slug == SKIP => {
                if let Err(e) = tokio::fs::remove_file(dir.join(file_name)).await {
                    warn!(job_id = %job_id, file = %file_name, "Cannot remove skipped upload: {}", e);
                }
                skipped += 1;
            }
            Some(_) => files.push((dir.join(file_name), systems.remove(file_name))),
            None => still_waiting.push(file_name.clone()),
        }
    }

    let state_clone = state.clone();
    tokio::spawn(async move {
        run_pass(state_clone, job_id, library_root, files, still_waiting, skipped).await;
    });
    require_job(state, job_id).await
}

async fn run_pass(
    state: AppState,
    job_id: Uuid,
    library_root: PathBuf,
    files: Vec<(PathBuf, Option<System>)>,
    still_waiting: Vec<String>,
    skipped: i64,
) {
    if let Err(e) = file_pass(&state, job_id, &library_root, &files, still_waiting, skipped).await {
        let message = e.to_string();
        error!(job_id = %job_id, error = %message, "Upload processing failed");
        if let Err(db_err) = db::upload_jobs::mark_failed(&state.db, job_id, &message).await {
            error!(job_id = %job_id, "Failed to record upload failure: {}", db_err);
        }
        state.event_bus.emit_lossy(RomhoardEvent::UploadFailed {
            job_id,
            error: message.clone(),
            timestamp: Utc::now(),
        });
        state.record_error(message).await;
    }
}

async fn file_pass(
    state: &AppState,
    job_id: Uuid,
    library_root: &Path,
    files: &[(PathBuf, Option<System>)],
    still_waiting: Vec<String>,
    skipped: i64,
) -> Result<(), UploadError> {
    let pool = &state.db;
    let job = db::upload_jobs::get_upload_job(pool, job_id)
        .await?
        .ok_or_else(|| romhoard_common::Error::NotFound(format!("Upload job {} not found", job_id)))?;

    let target = UploadTarget::load(pool, library_root).await?;
    let progress = JobProgress {
        pool: pool.clone(),
        events: state.event_bus.clone(),
        job_id,
    };
    let UploadPass {
        games_added,
        games_skipped,
        games_failed,
        mut unidentified,
        added_rom_ids,
        errors,
    } = process_uploads(pool, &target, files, &progress).await;
    unidentified.extend(still_waiting);

    if !added_rom_ids.is_empty() {
        let identifier = Identifier::new(
            pool.clone(),
            state.lookup_services.as_ref().clone(),
            Some(state.event_bus.clone()),
        );
        let identified = identifier.identify_roms(&added_rom_ids, job.use_hasheous).await;
        info!(job_id = %job_id, identified, total = added_rom_ids.len(), "Identification finished");
    }

    let completion = UploadCompletion {
        games_added,
        games_skipped: games_skipped + skipped,
        games_failed,
        unidentified,
        errors,
    };
    let status = db::upload_jobs::record_pass(pool, job_id, &completion).await?;
    if status == UploadStatus::Completed {
        if let Err(e) = tokio::fs::remove_dir_all(job_dir(state, job_id)).await {
            warn!(job_id = %job_id, "Cannot remove upload folder: {}", e);
        }
    }

    info!(
        job_id = %job_id,
        status = %status,
        games_added,
        skipped = completion.games_skipped,
        failed = games_failed,
        unidentified = completion.unidentified.len(),
        "Upload pass finished"
    );
    state.event_bus.emit_lossy(RomhoardEvent::UploadProcessed {
        job_id,
        games_added: games_added.max(0) as u64,
        games_skipped: completion.games_skipped.max(0) as u64,
        unidentified: completion.unidentified.len() as u64,
        timestamp: Utc::now(),
    });
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct DuplicateQuery {
    pub name: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    pub game_id: i64,
    pub game_name: String,
    pub system_slug: String,
}

/// Library game already holding a ROM of each file name, if any
pub async fn check_duplicates(
    state: &AppState,
    files: &[DuplicateQuery],
) -> ApiResult<BTreeMap<String, Option<DuplicateMatch>>> {
    let mut found = BTreeMap::new();
    for query in files {
        let Some(name) = sanitize_upload_name(&query.name) else {
            continue;
        };
        let game = db::games::find_any_game_by_rom_file_name(&state.db, &name).await?;
        found.insert(
            query.name.clone(),
            game.map(|g| DuplicateMatch {
                game_id: g.id,
                game_name: g.name,
                system_slug: g.system_slug,
            }),
        );
    }
    Ok(found)
}
