//! Scan job persistence
//!
//! Job ids are UUIDs stored as text.

use chrono::Utc;
use romhoard_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp};
use crate::library::scanner::ScanProgress;
use crate::models::{JobStatus, ScanJob};
use crate::utils::retry_on_lock;

const SCAN_JOB_COLUMNS: &str = "job_id, path, status, use_hasheous, files_processed, roms_found, \
    images_found, current_directory, added, skipped, deleted_roms, images_added, images_skipped, \
    identified, errors, started_at, scan_started_at, completed_at";

/// Longest stored `current_directory`
pub const CURRENT_DIRECTORY_MAX_LEN: usize = 500;

fn map_scan_job(row: &SqliteRow) -> Result<ScanJob> {
    let job_id: String = row.get("job_id");
    let status: String = row.get("status");
    let errors: String = row.get("errors");

    Ok(ScanJob {
        job_id: Uuid::parse_str(&job_id).map_err(|e| Error::Internal(format!("Bad job id {}: {}", job_id, e)))?,
        path: row.get("path"),
        status: status.parse().map_err(Error::Internal)?,
        use_hasheous: row.get("use_hasheous"),
        files_processed: row.get("files_processed"),
        roms_found: row.get("roms_found"),
        images_found: row.get("images_found"),
        current_directory: row.get("current_directory"),
        added: row.get("added"),
        skipped: row.get("skipped"),
        deleted_roms: row.get("deleted_roms"),
        images_added: row.get("images_added"),
        images_skipped: row.get("images_skipped"),
        identified: row.get("identified"),
        errors: serde_json::from_str(&errors)?,
        started_at: parse_timestamp(&row.get::<String, _>("started_at"))?,
        scan_started_at: parse_optional_timestamp(row.get("scan_started_at"))?,
        completed_at: parse_optional_timestamp(row.get("completed_at"))?,
    })
}

pub async fn create_scan_job(pool: &SqlitePool, path: &str, use_hasheous: bool) -> Result<ScanJob> {
    let job_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO scan_jobs (job_id, path, status, use_hasheous, started_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(job_id.to_string())
    .bind(path)
    .bind(JobStatus::Pending.as_str())
    .bind(use_hasheous)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    get_scan_job(pool, job_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Scan job {} vanished after insert", job_id)))
}

pub async fn get_scan_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<ScanJob>> {
    let sql = format!("SELECT {} FROM scan_jobs WHERE job_id = ?", SCAN_JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(map_scan_job).transpose()
}

/// Most recent jobs first
pub async fn list_scan_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<ScanJob>> {
    let sql = format!(
        "SELECT {} FROM scan_jobs ORDER BY started_at DESC LIMIT ?",
        SCAN_JOB_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;
    rows.iter().map(map_scan_job).collect()
}

/// Pending or running job for a path, if any
pub async fn find_active_job_for_path(pool: &SqlitePool, path: &str) -> Result<Option<ScanJob>> {
    let sql = format!(
        "SELECT {} FROM scan_jobs WHERE path = ? AND status IN ('pending', 'running') LIMIT 1",
        SCAN_JOB_COLUMNS
    );
    let row = sqlx::query(&sql).bind(path).fetch_optional(pool).await?;
    row.as_ref().map(map_scan_job).transpose()
}

/// Move a pending job to running; false when it was cancelled first
pub async fn mark_running(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scan_jobs SET status = 'running', scan_started_at = ? WHERE job_id = ? AND status = 'pending'",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_progress(
    pool: &SqlitePool,
    job_id: Uuid,
    progress: &ScanProgress,
    max_wait_ms: u64,
) -> Result<()> {
    let job_id = job_id.to_string();
    let current_directory: String = progress
        .current_directory
        .chars()
        .take(CURRENT_DIRECTORY_MAX_LEN)
        .collect();

    retry_on_lock("scan progress update", max_wait_ms, || async {
        sqlx::query(
            r#"
            UPDATE scan_jobs
            SET files_processed = ?, roms_found = ?, images_found = ?, current_directory = ?
            WHERE job_id = ?
            "#,
        )
        .bind(progress.files_processed)
        .bind(progress.roms_found)
        .bind(progress.images_found)
        .bind(&current_directory)
        .bind(&job_id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Final counters of a successful scan
#[derive(Debug, Clone, Default)]
pub struct ScanCompletion {
    pub added: i64,
    pub skipped: i64,
    pub deleted_roms: i64,
    pub images_added: i64,
    pub images_skipped: i64,
    pub errors: Vec<String>,
}

/// Record a finished scan; false when the job is no longer running
pub async fn mark_completed(pool: &SqlitePool, job_id: Uuid, result: &ScanCompletion) -> Result<bool> {
    let updated = sqlx::query(
        r#"
        UPDATE scan_jobs
        SET status = 'completed', added = ?, skipped = ?, deleted_roms = ?,
            images_added = ?, images_skipped = ?, errors = ?, completed_at = ?
        WHERE job_id = ? AND status = 'running'
        "#,
    )
    .bind(result.added)
    .bind(result.skipped)
    .bind(result.deleted_roms)
    .bind(result.images_added)
    .bind(result.images_skipped)
    .bind(serde_json::to_string(&result.errors)?)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(updated.rows_affected() > 0)
}

pub async fn set_identified(pool: &SqlitePool, job_id: Uuid, identified: i64) -> Result<()> {
    sqlx::query("UPDATE scan_jobs SET identified = ? WHERE job_id = ?")
        .bind(identified)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Terminal failure or cancellation
///
/// A job that already finished keeps its status.
pub async fn mark_finished(pool: &SqlitePool, job_id: Uuid, status: JobStatus, errors: &[String]) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE scan_jobs
        SET status = ?, errors = ?, completed_at = ?
        WHERE job_id = ? AND status IN ('pending', 'running')
        "#,
    )
    .bind(status.as_str())
    .bind(serde_json::to_string(errors)?)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Jobs left active by a previous process can never finish
pub async fn fail_interrupted_jobs(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE scan_jobs
        SET status = 'failed', errors = '["Interrupted by service restart"]', completed_at = ?
        WHERE status IN ('pending', 'running')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        romhoard_common::db::init_memory_database().await.unwrap()
    }

    #[tokio::test]
    async fn test_status_moves_forward_only() {
        let pool = pool().await;
        let job = create_scan_job(&pool, "/roms", true).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(find_active_job_for_path(&pool, "/roms").await.unwrap().unwrap().job_id, job.job_id);

        assert!(mark_running(&pool, job.job_id).await.unwrap());
        assert!(!mark_running(&pool, job.job_id).await.unwrap());
        assert!(mark_completed(&pool, job.job_id, &ScanCompletion { added: 3, ..Default::default() })
            .await
            .unwrap());

        let stored = get_scan_job(&pool, job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.added, 3);
        assert!(!mark_finished(&pool, job.job_id, JobStatus::Failed, &["late".into()]).await.unwrap());
        assert!(find_active_job_for_path(&pool, "/roms").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_job_stays_cancelled() {
        let pool = pool().await;
        let pending = create_scan_job(&pool, "/roms", false).await.unwrap();
        assert!(mark_finished(&pool, pending.job_id, JobStatus::Cancelled, &[]).await.unwrap());
        assert!(!mark_running(&pool, pending.job_id).await.unwrap());
        assert!(!mark_completed(&pool, pending.job_id, &ScanCompletion::default()).await.unwrap());
        assert_eq!(get_scan_job(&pool, pending.job_id).await.unwrap().unwrap().status, JobStatus::Cancelled);

        // Cancelled mid-scan, then the scan finishes
        let running = create_scan_job(&pool, "/roms", false).await.unwrap();
        mark_running(&pool, running.job_id).await.unwrap();
        assert!(mark_finished(&pool, running.job_id, JobStatus::Cancelled, &[]).await.unwrap());
        assert!(!mark_completed(&pool, running.job_id, &ScanCompletion { added: 1, ..Default::default() })
            .await
            .unwrap());
        let stored = get_scan_job(&pool, running.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.added, 0);
    }

    #[tokio::test]
    async fn test_fail_interrupted_jobs() {
        let pool = pool().await;
        let job = create_scan_job(&pool, "/roms", false).await.unwrap();
        assert_eq!(fail_interrupted_jobs(&pool).await.unwrap(), 1);
        let stored = get_scan_job(&pool, job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.errors, vec!["Interrupted by service restart".to_string()]);
    }
}
