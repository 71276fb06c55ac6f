//! Runtime settings
//!
//! Key-value pairs in the `settings` table, values stored as JSON text.

use std::collections::BTreeMap;
use std::path::PathBuf;

use romhoard_common::{Error, Result};
use serde_json::Value;
use sqlx::SqlitePool;

pub const REGION_PRIORITIES: &str = "region_priorities";
pub const DOWNLOAD_EXPIRY_HOURS: &str = "download_expiry_hours";
pub const SCAN_SCHEDULE_CHECK_SECS: &str = "scan_schedule_check_secs";
pub const DATABASE_MAX_LOCK_WAIT_MS: &str = "database_max_lock_wait_ms";
pub const LIBRARY_ROOT: &str = "library_root";

/// Hours a generated download stays available
///
/// **Default:** 1
pub async fn get_download_expiry_hours(pool: &SqlitePool) -> Result<i64> {
    get_setting::<i64>(pool, DOWNLOAD_EXPIRY_HOURS).await.map(|v| v.unwrap_or(1))
}

/// Seconds between scheduler passes
///
/// **Default:** 600
pub async fn get_scan_schedule_check_secs(pool: &SqlitePool) -> Result<u64> {
    get_setting::<u64>(pool, SCAN_SCHEDULE_CHECK_SECS).await.map(|v| v.unwrap_or(600))
}

/// Longest total wait when retrying a locked database
///
/// **Default:** 5000
pub async fn get_max_lock_wait_ms(pool: &SqlitePool) -> Result<u64> {
    get_setting::<u64>(pool, DATABASE_MAX_LOCK_WAIT_MS).await.map(|v| v.unwrap_or(5000))
}

/// Folder uploaded ROMs are filed into, one subfolder per system
///
/// **Default:** unset (uploads are refused)
pub async fn get_library_root(pool: &SqlitePool) -> Result<Option<PathBuf>> {
    Ok(get_setting_value(pool, LIBRARY_ROOT)
        .await?
        .and_then(|value| value.as_str().map(|s| s.trim().to_string()))
        .filter(|root| !root.is_empty())
        .map(PathBuf::from))
}

/// Region preference, either a list (best first) or an object region → score
pub async fn get_region_priorities(pool: &SqlitePool) -> Result<Option<Value>> {
    get_setting_value(pool, REGION_PRIORITIES).await
}

/// Raw JSON value of a setting
///
/// Text that is not valid JSON is returned as a JSON string.
pub async fn get_setting_value(pool: &SqlitePool, key: &str) -> Result<Option<Value>> {
    let row: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(row
        .flatten()
        .map(|text| serde_json::from_str(&text).unwrap_or(Value::String(text))))
}

pub async fn set_setting_value(pool: &SqlitePool, key: &str, value: &Value) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(serde_json::to_string(value)?)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_settings(pool: &SqlitePool) -> Result<BTreeMap<String, Value>> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as("SELECT key, value FROM settings ORDER BY key")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
                None => Value::Null,
            };
            (key, value)
        })
        .collect())
}

/// Typed setting parsed from its text form (generic, internal)
async fn get_setting<T>(pool: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match row.flatten() {
        Some(text) => {
            let trimmed = text.trim().trim_matches('"');
            let parsed = trimmed
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
