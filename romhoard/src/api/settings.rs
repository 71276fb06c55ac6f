//! Runtime settings
//!
//! Values are JSON; known keys are type-checked before they are stored.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::db;
use crate::db::settings::{
    DATABASE_MAX_LOCK_WAIT_MS, DOWNLOAD_EXPIRY_HOURS, LIBRARY_ROOT, REGION_PRIORITIES, SCAN_SCHEDULE_CHECK_SECS,
};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const KNOWN_SETTINGS: &[&str] = &[
    REGION_PRIORITIES,
    DOWNLOAD_EXPIRY_HOURS,
    SCAN_SCHEDULE_CHECK_SECS,
    DATABASE_MAX_LOCK_WAIT_MS,
    LIBRARY_ROOT,
];

/// Check a value against the shape its key expects
pub fn validate_setting(key: &str, value: &Value) -> Result<(), String> {
    match key {
        REGION_PRIORITIES => match value {
            Value::Array(items) if items.iter().all(Value::is_string) => Ok(()),
            Value::Object(map) if map.values().all(Value::is_number) => Ok(()),
            _ => Err("region_priorities must be a list of regions or an object of region scores".to_string()),
        },
        DOWNLOAD_EXPIRY_HOURS | SCAN_SCHEDULE_CHECK_SECS => match value.as_u64() {
            Some(n) if n > 0 => Ok(()),
            _ => Err(format!("{} must be a positive integer", key)),
        },
        DATABASE_MAX_LOCK_WAIT_MS => match value.as_u64() {
            Some(_) => Ok(()),
            None => Err(format!("{} must be a non-negative integer", key)),
        },
        LIBRARY_ROOT => match value.as_str() {
            Some(root) if root.trim().is_empty() || std::path::Path::new(root.trim()).is_absolute() => Ok(()),
            Some(_) => Err("library_root must be an absolute path".to_string()),
            None => Err("library_root must be a string".to_string()),
        },
        other => Err(format!("Unknown setting '{}'", other)),
    }
}

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
pub struct SettingUpdate {
    pub value: Value,
}

/// GET /api/settings
pub async fn list_settings(State(state): State<AppState>) -> ApiResult<Json<BTreeMap<String, Value>>> {
    Ok(Json(db::settings::list_settings(&state.db).await?))
}

/// GET /api/settings/:key
pub async fn get_setting(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<Json<SettingResponse>> {
    let value = db::settings::get_setting_value(&state.db, &key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Setting '{}' not found", key)))?;
    Ok(Json(SettingResponse { key, value }))
}

/// PUT /api/settings/:key
pub async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(update): Json<SettingUpdate>,
) -> ApiResult<Json<SettingResponse>> {
    validate_setting(&key, &update.value).map_err(ApiError::BadRequest)?;
    db::settings::set_setting_value(&state.db, &key, &update.value).await?;
    info!(key = %key, "Setting updated");
    Ok(Json(SettingResponse {
        key,
        value: update.value,
    }))
}

pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/api/settings", get(list_settings))
        .route("/api/settings/:key", get(get_setting).put(put_setting))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_setting() {
        assert!(validate_setting(REGION_PRIORITIES, &json!(["USA", "Japan"])).is_ok());
        assert!(validate_setting(REGION_PRIORITIES, &json!({"USA": 10, "Europe": 5})).is_ok());
        assert!(validate_setting(REGION_PRIORITIES, &json!([1, 2])).is_err());
        assert!(validate_setting(DOWNLOAD_EXPIRY_HOURS, &json!(24)).is_ok());
        assert!(validate_setting(DOWNLOAD_EXPIRY_HOURS, &json!(0)).is_err());
        assert!(validate_setting(DATABASE_MAX_LOCK_WAIT_MS, &json!(0)).is_ok());
        assert!(validate_setting("theme", &json!("dark")).is_err());
        assert!(validate_setting(LIBRARY_ROOT, &json!("/srv/roms")).is_ok());
        assert!(validate_setting(LIBRARY_ROOT, &json!("")).is_ok());
        assert!(validate_setting(LIBRARY_ROOT, &json!("roms")).is_err());
        assert!(validate_setting(LIBRARY_ROOT, &json!(5)).is_err());
        assert_eq!(KNOWN_SETTINGS.len(), 5);
    }
}
