//! Multi-game download jobs

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use romhoard_common::events::{EventBus, RomhoardEvent};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::db::download_jobs::DownloadCompletion;
use crate::error::{ApiError, ApiResult};
use crate::library::download::{create_multi_game_bundle, BundleProgress, BundleProgressSink, DownloadError};
use crate::models::{Device, DownloadJob, Game};
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct StartDownloadRequest {
    pub game_ids: Vec<i64>,
    #[serde(default)]
    pub device_id: Option<i64>,
}

/// `<system>[_<device>]_<YYYY-mm-dd-HH-MM>`
pub fn bundle_name(system_slug: &str, device: Option<&Device>, at: chrono::DateTime<Utc>) -> String {
    let device_part = device.map(|d| format!("_{}", d.slug)).unwrap_or_default();
    format!("{}{}_{}", system_slug, device_part, at.format("%Y-%m-%d-%H-%M"))
}

struct JobProgress {
    pool: SqlitePool,
    events: EventBus,
    job_id: Uuid,
}

#[async_trait]
impl BundleProgressSink for JobProgress {
    async fn report(&self, progress: &BundleProgress) {
        if let Err(e) = db::download_jobs::update_progress(
            &self.pool,
            self.job_id,
            progress.games_processed,
            &progress.current_game,
            progress.bytes_written,
        )
        .await
        {
            warn!(job_id = %self.job_id, "Failed to store download progress: {}", e);
        }
        self.events.emit_lossy(RomhoardEvent::DownloadProgress {
            job_id: self.job_id,
            games_processed: progress.games_processed.max(0) as u64,
            games_total: progress.games_total.max(0) as u64,
            current_game: progress.current_game.clone(),
            bytes_written: progress.bytes_written.max(0) as u64,
            timestamp: Utc::now(),
        });
    }
}

/// Queue a bundle of games that all belong to one system
pub async fn start_download(state: &AppState, request: &StartDownloadRequest) -> ApiResult<DownloadJob> {
    let mut seen = HashSet::new();
    let mut game_ids = request.game_ids.clone();
    game_ids.retain(|id| seen.insert(*id));
    if game_ids.is_empty() {
        return Err(ApiError::BadRequest("No games selected".to_string()));
    }

    let mut games = Vec::with_capacity(game_ids.len());
    for id in &game_ids {
        let game = db::games::get_game(&state.db, *id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Game {} not found", id)))?;
        games.push(game);
    }
    let system_slug = games[0].system_slug.clone();
    if games.iter().any(|g| g.system_slug != system_slug) {
        return Err(ApiError::BadRequest(
            "All games must belong to the same system".to_string(),
        ));
    }

    let device = match request.device_id {
        Some(id) => Some(
            db::devices::get_device(&state.db, id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("Device {} not found", id)))?,
        ),
        None => None,
    };

    let job = db::download_jobs::create_download_job(&state.db, &game_ids, &system_slug, request.device_id).await?;
    info!(job_id = %job.job_id, system = %system_slug, games = game_ids.len(), "Download job queued");

    let state_clone = state.clone();
    let job_id = job.job_id;
    tokio::spawn(async move {
        run_download_job(state_clone, job_id, system_slug, games, device).await;
    });

    Ok(job)
}

async fn run_download_job(state: AppState, job_id: Uuid, system_slug: String, games: Vec<Game>, device: Option<Device>) {
    let dest_dir = state.downloads_dir.join(job_id.to_string());

    match build_bundle(&state, job_id, &system_slug, &games, device.as_ref(), &dest_dir).await {
        Ok(()) => {}
        Err(e) => {
            let message = e.to_string();
            error!(job_id = %job_id, error = %message, "Download bundle failed");
            if let Err(db_err) = db::download_jobs::mark_failed(&state.db, job_id, &message).await {
                error!(job_id = %job_id, "Failed to record download failure: {}", db_err);
            }
            let _ = tokio::fs::remove_dir_all(&dest_dir).await;
            state.event_bus.emit_lossy(RomhoardEvent::DownloadFailed {
                job_id,
                error: message.clone(),
                timestamp: Utc::now(),
            });
            state.record_error(message).await;
        }
    }
}

async fn build_bundle(
    state: &AppState,
    job_id: Uuid,
    system_slug: &str,
    games: &[Game],
    device: Option<&Device>,
    dest_dir: &std::path::Path,
) -> Result<(), DownloadError> {
    let pool = &state.db;
    db::download_jobs::mark_running(pool, job_id, games.len() as i64).await?;

    let progress = JobProgress {
        pool: pool.clone(),
        events: state.event_bus.clone(),
        job_id,
    };
    let name = bundle_name(system_slug, device, Utc::now());
    let bundle = create_multi_game_bundle(pool, games, &name, device, dest_dir, &progress).await?;

    let expiry_hours = db::settings::get_download_expiry_hours(pool).await?;
    db::download_jobs::mark_completed(
        pool,
        job_id,
        &DownloadCompletion {
            file_path: bundle.path.to_string_lossy().into_owned(),
            file_name: bundle.filename.clone(),
            file_size: bundle.file_size,
            games_included: bundle.games_included,
            games_failed: bundle.games_failed,
            errors: bundle.errors.clone(),
            expires_at: Utc::now() + Duration::hours(expiry_hours),
        },
    )
    .await?;

    info!(job_id = %job_id, file = %bundle.filename, size = bundle.file_size, "Download bundle ready");
    state.event_bus.emit_lossy(RomhoardEvent::DownloadCompleted {
        job_id,
        file_name: bundle.filename,
        file_size: bundle.file_size.max(0) as u64,
        games_included: bundle.games_included.max(0) as u64,
        timestamp: Utc::now(),
    });
    Ok(())
}
