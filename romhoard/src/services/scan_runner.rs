//! Scan jobs
//!
//! A job row is created up front; the scan itself runs in a tokio task that
//! writes progress to the row and the event bus, then identifies the ROMs it
//! added.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use romhoard_common::events::{EventBus, RomhoardEvent};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::db::scan_jobs::ScanCompletion;
use crate::error::{ApiError, ApiResult};
use crate::library::identify::Identifier;
use crate::library::scanner::{normalize_scan_path, scan_directory, ProgressSink, ScanError, ScanOptions, ScanProgress};
use crate::models::{JobStatus, ScanJob};
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct StartScanRequest {
    pub path: String,
    #[serde(default = "default_use_hasheous")]
    pub use_hasheous: bool,
}

fn default_use_hasheous() -> bool {
    true
}

/// Writes scan progress to the job row and the event bus
struct JobProgress {
    pool: SqlitePool,
    events: EventBus,
    job_id: Uuid,
    max_wait_ms: u64,
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn report(&self, progress: &ScanProgress) {
        if let Err(e) = db::scan_jobs::update_progress(&self.pool, self.job_id, progress, self.max_wait_ms).await {
            warn!(job_id = %self.job_id, "Failed to store scan progress: {}", e);
        }
        self.events.emit_lossy(RomhoardEvent::ScanProgress {
            job_id: self.job_id,
            files_processed: progress.files_processed.max(0) as u64,
            roms_found: progress.roms_found.max(0) as u64,
            images_found: progress.images_found.max(0) as u64,
            current_directory: progress.current_directory.clone(),
            timestamp: Utc::now(),
        });
    }
}

/// Validate the path and start a background scan
///
/// 400 when the path is not an existing directory; 409 when a scan of the
/// same path is still active.
pub async fn start_scan(state: &AppState, request: &StartScanRequest) -> ApiResult<ScanJob> {
    let raw = request.path.trim();
    if raw.is_empty() {
        return Err(ApiError::BadRequest("Path is required".to_string()));
    }
    let requested = Path::new(raw);
    match tokio::fs::metadata(requested).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(ApiError::BadRequest(format!("Path is not a directory: {}", raw))),
        Err(_) => return Err(ApiError::BadRequest(format!("Path does not exist: {}", raw))),
    }
    let path = normalize_scan_path(requested).to_string_lossy().into_owned();

    let job = {
        let _guard = state.scan_start_lock.lock().await;
        if let Some(active) = active_scan_for_path(state, &path).await? {
            return Err(ApiError::Conflict(format!(
                "A scan of {} is already running (job {})",
                path, active
            )));
        }
        db::scan_jobs::create_scan_job(&state.db, &path, request.use_hasheous).await?
    };

    let token = state.shutdown.child_token();
    state.scan_tokens.write().await.insert(job.job_id, token.clone());

    info!(job_id = %job.job_id, path = %path, use_hasheous = job.use_hasheous, "Scan job started");
    state.event_bus.emit_lossy(RomhoardEvent::ScanStarted {
        job_id: job.job_id,
        path: path.clone(),
        timestamp: Utc::now(),
    });

    let state_clone = state.clone();
    let job_clone = job.clone();
    tokio::spawn(async move {
        run_scan_job(state_clone, job_clone, token).await;
    });

    Ok(job)
}

/// Job still scanning `path`
///
/// A cancelled job counts until its task has exited.
pub async fn active_scan_for_path(state: &AppState, path: &str) -> romhoard_common::Result<Option<Uuid>> {
    if let Some(active) = db::scan_jobs::find_active_job_for_path(&state.db, path).await? {
        return Ok(Some(active.job_id));
    }
    let live: Vec<Uuid> = state.scan_tokens.read().await.keys().copied().collect();
    for job_id in live {
        if let Some(job) = db::scan_jobs::get_scan_job(&state.db, job_id).await? {
            if job.path == path {
                return Ok(Some(job_id));
            }
        }
    }
    Ok(None)
}

async fn run_scan_job(state: AppState, job: ScanJob, token: CancellationToken) {
    let job_id = job.job_id;

    match execute_scan(&state, &job, &token).await {
        Ok(()) => {}
        Err(ScanError::Cancelled) => {
            match db::scan_jobs::mark_finished(&state.db, job_id, JobStatus::Cancelled, &[]).await {
                Ok(true) => {
                    state.event_bus.emit_lossy(RomhoardEvent::ScanCancelled {
                        job_id,
                        timestamp: Utc::now(),
                    });
                }
                Ok(false) => {}
                Err(e) => error!(job_id = %job_id, "Failed to record cancellation: {}", e),
            }
            info!(job_id = %job_id, "Scan cancelled");
        }
        Err(e) => {
            let message = e.to_string();
            error!(job_id = %job_id, error = %message, "Scan failed");
            if let Err(db_err) =
                db::scan_jobs::mark_finished(&state.db, job_id, JobStatus::Failed, &[message.clone()]).await
            {
                error!(job_id = %job_id, "Failed to record scan failure: {}", db_err);
            }
            state.event_bus.emit_lossy(RomhoardEvent::ScanFailed {
                job_id,
                error: message.clone(),
                timestamp: Utc::now(),
            });
            state.record_error(message).await;
        }
    }

    state.scan_tokens.write().await.remove(&job_id);
}

async fn execute_scan(state: &AppState, job: &ScanJob, token: &CancellationToken) -> Result<(), ScanError> {
    let pool = &state.db;
    if !db::scan_jobs::mark_running(pool, job.job_id).await? {
        return Err(ScanError::Cancelled);
    }

    let sink = JobProgress {
        pool: pool.clone(),
        events: state.event_bus.clone(),
        job_id: job.job_id,
        max_wait_ms: db::settings::get_max_lock_wait_ms(pool).await?,
    };
    let result = scan_directory(pool, Path::new(&job.path), &ScanOptions::default(), &sink, token).await?;

    let completed = db::scan_jobs::mark_completed(
        pool,
        job.job_id,
        &ScanCompletion {
            added: result.added,
            skipped: result.skipped,
            deleted_roms: result.deleted_roms,
            images_added: result.images_added,
            images_skipped: result.images_skipped,
            errors: result.errors.clone(),
        },
    )
    .await?;
    if !completed {
        return Err(ScanError::Cancelled);
    }
    db::scan_paths::record_scan(pool, &job.path, job.use_hasheous, Utc::now()).await?;

    info!(
        job_id = %job.job_id,
        added = result.added,
        skipped = result.skipped,
        deleted_roms = result.deleted_roms,
        images_added = result.images_added,
        "Scan completed"
    );
    state.event_bus.emit_lossy(RomhoardEvent::ScanCompleted {
        job_id: job.job_id,
        added: result.added.max(0) as u64,
        skipped: result.skipped.max(0) as u64,
        deleted_roms: result.deleted_roms.max(0) as u64,
        images_added: result.images_added.max(0) as u64,
        timestamp: Utc::now(),
    });

    if !result.added_rom_ids.is_empty() && !token.is_cancelled() {
        let identifier = Identifier::new(
            pool.clone(),
            state.lookup_services.as_ref().clone(),
            Some(state.event_bus.clone()),
        );
        let identified = identifier.identify_roms(&result.added_rom_ids, job.use_hasheous).await;
        db::scan_jobs::set_identified(pool, job.job_id, identified).await?;
        info!(job_id = %job.job_id, identified, total = result.added_rom_ids.len(), "Identification finished");
    }

    Ok(())
}

/// Cancel a pending or running scan
pub async fn cancel_scan(state: &AppState, job_id: Uuid) -> ApiResult<ScanJob> {
    let job = db::scan_jobs::get_scan_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scan job not found: {}", job_id)))?;
    if job.status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Scan job already in terminal state: {}",
            job.status
        )));
    }

    if let Some(token) = state.scan_tokens.read().await.get(&job_id) {
        token.cancel();
    }
    if db::scan_jobs::mark_finished(&state.db, job_id, JobStatus::Cancelled, &[]).await? {
        state.event_bus.emit_lossy(RomhoardEvent::ScanCancelled {
            job_id,
            timestamp: Utc::now(),
        });
    }
    info!(job_id = %job_id, "Scan cancellation requested");

    db::scan_jobs::get_scan_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scan job not found: {}", job_id)))
}
