//! Download job persistence

use chrono::{DateTime, Utc};
use romhoard_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp};
use crate::models::{DownloadJob, JobStatus};

const DOWNLOAD_JOB_COLUMNS: &str = "job_id, status, game_ids, system_slug, device_id, games_total, \
    games_processed, current_game, bytes_written, file_path, file_name, file_size, games_included, \
    games_failed, errors, created_at, completed_at, expires_at";

fn map_download_job(row: &SqliteRow) -> Result<DownloadJob> {
    let job_id: String = row.get("job_id");
    let status: String = row.get("status");
    let game_ids: String = row.get("game_ids");
    let errors: String = row.get("errors");

    Ok(DownloadJob {
        job_id: Uuid::parse_str(&job_id).map_err(|e| Error::Internal(format!("Bad job id {}: {}", job_id, e)))?,
        status: status.parse().map_err(Error::Internal)?,
        game_ids: serde_json::from_str(&game_ids)?,
        system_slug: row.get("system_slug"),
        device_id: row.get("device_id"),
        games_total: row.get("games_total"),
        games_processed: row.get("games_processed"),
        current_game: row.get("current_game"),
        bytes_written: row.get("bytes_written"),
        file_path: row.get("file_path"),
        file_name: row.get("file_name"),
        file_size: row.get("file_size"),
        games_included: row.get("games_included"),
        games_failed: row.get("games_failed"),
        errors: serde_json::from_str(&errors)?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        completed_at: parse_optional_timestamp(row.get("completed_at"))?,
        expires_at: parse_optional_timestamp(row.get("expires_at"))?,
    })
}

pub async fn create_download_job(
    pool: &SqlitePool,
    game_ids: &[i64],
    system_slug: &str,
    device_id: Option<i64>,
) -> Result<DownloadJob> {
    let job_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO download_jobs (job_id, status, game_ids, system_slug, device_id, games_total, created_at)
        VALUES (?, 'pending', ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job_id.to_string())
    .bind(serde_json::to_string(game_ids)?)
    .bind(system_slug)
    .bind(device_id)
    .bind(game_ids.len() as i64)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    get_download_job(pool, job_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Download job {} vanished after insert", job_id)))
}

pub async fn get_download_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<DownloadJob>> {
    let sql = format!("SELECT {} FROM download_jobs WHERE job_id = ?", DOWNLOAD_JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(map_download_job).transpose()
}

pub async fn list_download_jobs(pool: &SqlitePool) -> Result<Vec<DownloadJob>> {
    let sql = format!("SELECT {} FROM download_jobs ORDER BY created_at DESC", DOWNLOAD_JOB_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(map_download_job).collect()
}

pub async fn mark_running(pool: &SqlitePool, job_id: Uuid, games_total: i64) -> Result<()> {
    sqlx::query("UPDATE download_jobs SET status = 'running', games_total = ? WHERE job_id = ?")
        .bind(games_total)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_progress(
    pool: &SqlitePool,
    job_id: Uuid,
    games_processed: i64,
    current_game: &str,
    bytes_written: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE download_jobs SET games_processed = ?, current_game = ?, bytes_written = ?
        WHERE job_id = ?
        "#,
    )
    .bind(games_processed)
    .bind(current_game)
    .bind(bytes_written)
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Bundle written and ready to fetch
#[derive(Debug, Clone)]
pub struct DownloadCompletion {
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub games_included: i64,
    pub games_failed: i64,
    pub errors: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

pub async fn mark_completed(pool: &SqlitePool, job_id: Uuid, done: &DownloadCompletion) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE download_jobs
        SET status = 'completed', file_path = ?, file_name = ?, file_size = ?,
            games_included = ?, games_failed = ?, errors = ?, current_game = '',
            completed_at = ?, expires_at = ?
        WHERE job_id = ?
        "#,
    )
    .bind(&done.file_path)
    .bind(&done.file_name)
    .bind(done.file_size)
    .bind(done.games_included)
    .bind(done.games_failed)
    .bind(serde_json::to_string(&done.errors)?)
    .bind(Utc::now().to_rfc3339())
    .bind(done.expires_at.to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE download_jobs SET status = ?, errors = ?, completed_at = ? WHERE job_id = ?",
    )
    .bind(JobStatus::Failed.as_str())
    .bind(serde_json::to_string(&[error])?)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_download_job(pool: &SqlitePool, job_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM download_jobs WHERE job_id = ?")
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}
