//! Upload job persistence

use chrono::Utc;
use romhoard_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp};
use crate::models::{UploadJob, UploadStatus};

const UPLOAD_JOB_COLUMNS: &str = "job_id, status, use_hasheous, files_total, files_uploaded, bytes_total, \
    bytes_uploaded, files_processed, current_file, games_added, games_skipped, games_failed, unidentified, \
    errors, created_at, completed_at";

fn map_upload_job(row: &SqliteRow) -> Result<UploadJob> {
    let job_id: String = row.get("job_id");
    let status: String = row.get("status");
    let unidentified: String = row.get("unidentified");
    let errors: String = row.get("errors");

    Ok(UploadJob {
        job_id: Uuid::parse_str(&job_id).map_err(|e| Error::Internal(format!("Bad job id {}: {}", job_id, e)))?,
        status: status.parse().map_err(Error::Internal)?,
        use_hasheous: row.get("use_hasheous"),
        files_total: row.get("files_total"),
        files_uploaded: row.get("files_uploaded"),
        bytes_total: row.get("bytes_total"),
        bytes_uploaded: row.get("bytes_uploaded"),
        files_processed: row.get("files_processed"),
        current_file: row.get("current_file"),
        games_added: row.get("games_added"),
        games_skipped: row.get("games_skipped"),
        games_failed: row.get("games_failed"),
        unidentified: serde_json::from_str(&unidentified)?,
        errors: serde_json::from_str(&errors)?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        completed_at: parse_optional_timestamp(row.get("completed_at"))?,
    })
}

pub async fn create_upload_job(
    pool: &SqlitePool,
    files_total: i64,
    bytes_total: i64,
    use_hasheous: bool,
) -> Result<UploadJob> {
    let job_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO upload_jobs (job_id, status, use_hasheous, files_total, bytes_total, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job_id.to_string())
    .bind(UploadStatus::Uploading.as_str())
    .bind(use_hasheous)
    .bind(files_total)
    .bind(bytes_total)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    get_upload_job(pool, job_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Upload job {} vanished after insert", job_id)))
}

pub async fn get_upload_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<UploadJob>> {
    let sql = format!("SELECT {} FROM upload_jobs WHERE job_id = ?", UPLOAD_JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(map_upload_job).transpose()
}

/// Most recent jobs first
pub async fn list_upload_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<UploadJob>> {
    let sql = format!(
        "SELECT {} FROM upload_jobs ORDER BY created_at DESC LIMIT ?",
        UPLOAD_JOB_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;
    rows.iter().map(map_upload_job).collect()
}

/// Count one more received file
pub async fn record_file_received(pool: &SqlitePool, job_id: Uuid, file_name: &str, bytes: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE upload_jobs
        SET files_uploaded = files_uploaded + 1, bytes_uploaded = bytes_uploaded + ?, current_file = ?
        WHERE job_id = ?
        "#,
    )
    .bind(bytes)
    .bind(file_name)
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Move a job from one status to another; false when it was not in `from`
pub async fn transition(pool: &SqlitePool, job_id: Uuid, from: UploadStatus, to: UploadStatus) -> Result<bool> {
    let result = sqlx::query("UPDATE upload_jobs SET status = ? WHERE job_id = ? AND status = ?")
        .bind(to.as_str())
        .bind(job_id.to_string())
        .bind(from.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_progress(pool: &SqlitePool, job_id: Uuid, files_processed: i64, current_file: &str) -> Result<()> {
    sqlx::query("UPDATE upload_jobs SET files_processed = ?, current_file = ? WHERE job_id = ?")
        .bind(files_processed)
        .bind(current_file)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Outcome of one processing pass
#[derive(Debug, Clone, Default)]
pub struct UploadCompletion {
    pub games_added: i64,
    pub games_skipped: i64,
    pub games_failed: i64,
    /// Files still without a system after this pass
    pub unidentified: Vec<String>,
    pub errors: Vec<String>,
}

/// Add a pass's counters to the job and leave it awaiting or completed
///
/// Errors are appended to those of earlier passes. Returns the new status.
pub async fn record_pass(pool: &SqlitePool, job_id: Uuid, pass: &UploadCompletion) -> Result<UploadStatus> {
    let job = get_upload_job(pool, job_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Upload job {} not found", job_id)))?;
    let mut errors = job.errors;
    errors.extend(pass.errors.iter().cloned());

    let status = if pass.unidentified.is_empty() {
        UploadStatus::Completed
    } else {
        UploadStatus::Awaiting
    };
    let completed_at = (status == UploadStatus::Completed).then(|| Utc::now().to_rfc3339());

    sqlx::query(
        r#"
        UPDATE upload_jobs
        SET status = ?, games_added = games_added + ?, games_skipped = games_skipped + ?,
            games_failed = games_failed + ?, unidentified = ?, errors = ?, current_file = '',
            completed_at = ?
        WHERE job_id = ? AND status = 'processing'
        "#,
    )
    .bind(status.as_str())
    .bind(pass.games_added)
    .bind(pass.games_skipped)
    .bind(pass.games_failed)
    .bind(serde_json::to_string(&pass.unidentified)?)
    .bind(serde_json::to_string(&errors)?)
    .bind(completed_at)
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(status)
}

pub async fn mark_failed(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<()> {
    let job = get_upload_job(pool, job_id).await?;
    let mut errors = job.map(|j| j.errors).unwrap_or_default();
    errors.push(error.to_string());

    sqlx::query("UPDATE upload_jobs SET status = 'failed', errors = ?, completed_at = ? WHERE job_id = ?")
        .bind(serde_json::to_string(&errors)?)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Uploads still being processed by a previous process can never finish
pub async fn fail_interrupted_uploads(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE upload_jobs
        SET status = 'failed', errors = '["Interrupted by service restart"]', completed_at = ?
        WHERE status = 'processing'
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
    async fn test_passes_accumulate() {
        let pool = pool().await;
        let job = create_upload_job(&pool, 3, 300, false).await.unwrap();
        assert_eq!(job.status, UploadStatus::Uploading);

        record_file_received(&pool, job.job_id, "a.gba", 100).await.unwrap();
        record_file_received(&pool, job.job_id, "b.bin", 200).await.unwrap();
        assert!(!transition(&pool, job.job_id, UploadStatus::Awaiting, UploadStatus::Processing)
            .await
            .unwrap());
        assert!(transition(&pool, job.job_id, UploadStatus::Uploading, UploadStatus::Processing)
            .await
            .unwrap());

        let first = UploadCompletion {
            games_added: 1,
            unidentified: vec!["b.bin".into()],
            errors: vec!["first".into()],
            ..Default::default()
        };
        assert_eq!(record_pass(&pool, job.job_id, &first).await.unwrap(), UploadStatus::Awaiting);

        let stored = get_upload_job(&pool, job.job_id).await.unwrap().unwrap();
        assert_eq!((stored.files_uploaded, stored.bytes_uploaded), (2, 300));
        assert_eq!(stored.unidentified, vec!["b.bin".to_string()]);
        assert!(stored.completed_at.is_none());

        assert!(transition(&pool, job.job_id, UploadStatus::Awaiting, UploadStatus::Processing)
            .await
            .unwrap());
        let second = UploadCompletion {
            games_added: 1,
            errors: vec!["second".into()],
            ..Default::default()
        };
        assert_eq!(record_pass(&pool, job.job_id, &second).await.unwrap(), UploadStatus::Completed);

        let stored = get_upload_job(&pool, job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Completed);
        assert_eq!(stored.games_added, 2);
        assert!(stored.unidentified.is_empty());
        assert_eq!(stored.errors, vec!["first".to_string(), "second".to_string()]);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_fail_interrupted_uploads() {
        let pool = pool().await;
        let receiving = create_upload_job(&pool, 1, 1, false).await.unwrap();
        let processing = create_upload_job(&pool, 1, 1, false).await.unwrap();
        transition(&pool, processing.job_id, UploadStatus::Uploading, UploadStatus::Processing)
            .await
            .unwrap();

        assert_eq!(fail_interrupted_uploads(&pool).await.unwrap(), 1);
        let failed = get_upload_job(&pool, processing.job_id).await.unwrap().unwrap();
        assert_eq!(failed.status, UploadStatus::Failed);
        assert_eq!(failed.errors, vec!["Interrupted by service restart".to_string()]);
        let untouched = get_upload_job(&pool, receiving.job_id).await.unwrap().unwrap();
        assert_eq!(untouched.status, UploadStatus::Uploading);
    }
}
