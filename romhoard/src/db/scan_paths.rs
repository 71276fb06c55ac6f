//! Saved scan paths and their schedules

use chrono::{DateTime, Utc};
use romhoard_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{parse_optional_timestamp, parse_timestamp};
use crate::models::{ScanPath, ScheduleInterval};

const SCAN_PATH_COLUMNS: &str =
    "id, path, use_hasheous, schedule_enabled, schedule_interval, last_scanned, created_at";

fn map_scan_path(row: &SqliteRow) -> Result<ScanPath> {
    let interval: String = row.get("schedule_interval");
    Ok(ScanPath {
        id: row.get("id"),
        path: row.get("path"),
        use_hasheous: row.get("use_hasheous"),
        schedule_enabled: row.get("schedule_enabled"),
        schedule_interval: interval.parse::<ScheduleInterval>().map_err(Error::Internal)?,
        last_scanned: parse_optional_timestamp(row.get("last_scanned"))?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

pub async fn list_scan_paths(pool: &SqlitePool) -> Result<Vec<ScanPath>> {
    let sql = format!("SELECT {} FROM scan_paths ORDER BY path", SCAN_PATH_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(map_scan_path).collect()
}

pub async fn get_scan_path(pool: &SqlitePool, id: i64) -> Result<Option<ScanPath>> {
    let sql = format!("SELECT {} FROM scan_paths WHERE id = ?", SCAN_PATH_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(map_scan_path).transpose()
}

pub async fn get_scan_path_by_path(pool: &SqlitePool, path: &str) -> Result<Option<ScanPath>> {
    let sql = format!("SELECT {} FROM scan_paths WHERE path = ?", SCAN_PATH_COLUMNS);
    let row = sqlx::query(&sql).bind(path).fetch_optional(pool).await?;
    row.as_ref().map(map_scan_path).transpose()
}

pub async fn create_scan_path(
    pool: &SqlitePool,
    path: &str,
    use_hasheous: bool,
    schedule_enabled: bool,
    schedule_interval: ScheduleInterval,
) -> Result<ScanPath> {
    let id = sqlx::query(
        r#"
        INSERT INTO scan_paths (path, use_hasheous, schedule_enabled, schedule_interval, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(path)
    .bind(use_hasheous)
    .bind(schedule_enabled)
    .bind(schedule_interval.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_scan_path(pool, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Scan path {} vanished after insert", id)))
}

pub async fn update_scan_path(pool: &SqlitePool, scan_path: &ScanPath) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE scan_paths
        SET use_hasheous = ?, schedule_enabled = ?, schedule_interval = ?, last_scanned = ?
        WHERE id = ?
        "#,
    )
    .bind(scan_path.use_hasheous)
    .bind(scan_path.schedule_enabled)
    .bind(scan_path.schedule_interval.as_str())
    .bind(scan_path.last_scanned.map(|t| t.to_rfc3339()))
    .bind(scan_path.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a finished scan, creating the saved path on first use
pub async fn record_scan(
    pool: &SqlitePool,
    path: &str,
    use_hasheous: bool,
    scanned_at: DateTime<Utc>,
) -> Result<ScanPath> {
    let mut scan_path = match get_scan_path_by_path(pool, path).await? {
        Some(existing) => existing,
        None => create_scan_path(pool, path, use_hasheous, false, ScheduleInterval::default()).await?,
    };
    scan_path.use_hasheous = use_hasheous;
    scan_path.last_scanned = Some(scanned_at);
    update_scan_path(pool, &scan_path).await?;
    Ok(scan_path)
}

pub async fn delete_scan_path(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM scan_paths WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
