//! Devices and device presets

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::library::genres::slugify;
use crate::library::presets::apply_preset_to_device;
use crate::models::{Device, DeviceInput, DevicePreset, PresetFolders, PresetImages};
use crate::AppState;

/// GET /api/devices
pub async fn list_devices(State(state): State<AppState>) -> ApiResult<Json<Vec<Device>>> {
    Ok(Json(db::devices::list_devices(&state.db).await?))
}

/// POST /api/devices
pub async fn create_device(
    State(state): State<AppState>,
    Json(input): Json<DeviceInput>,
) -> ApiResult<impl IntoResponse> {
    let device = db::devices::create_device(&state.db, &input).await?;
    info!(device = %device.slug, "Created device");
    Ok((StatusCode::CREATED, Json(device)))
}

async fn require_device(state: &AppState, id: i64) -> ApiResult<Device> {
    db::devices::get_device(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Device {} not found", id)))
}

/// GET /api/devices/:id
pub async fn get_device(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Device>> {
    Ok(Json(require_device(&state, id).await?))
}

/// PUT /api/devices/:id
pub async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<DeviceInput>,
) -> ApiResult<Json<Device>> {
    let device = db::devices::update_device(&state.db, id, &input)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Device {} not found", id)))?;
    Ok(Json(device))
}

/// DELETE /api/devices/:id
pub async fn delete_device(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    if !db::devices::delete_device(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("Device {} not found", id)));
    }
    info!(device_id = id, "Deleted device");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ApplyPresetRequest {
    pub preset: String,
}

/// POST /api/devices/:id/apply-preset
pub async fn apply_preset(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ApplyPresetRequest>,
) -> ApiResult<Json<Device>> {
    Ok(Json(apply_preset_to_device(&state.db, id, &request.preset).await?))
}

/// GET /api/device-presets
pub async fn list_presets(State(state): State<AppState>) -> ApiResult<Json<Vec<DevicePreset>>> {
    Ok(Json(db::presets::list_presets(&state.db).await?))
}

/// User preset, either given directly or captured from a device
#[derive(Debug, Deserialize)]
pub struct UserPresetRequest {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub device_id: Option<i64>,
    #[serde(default)]
    pub folders: Option<PresetFolders>,
    #[serde(default)]
    pub images: Option<PresetImages>,
}

/// Folder and image settings of a device as preset sections
pub fn preset_from_device(device: &Device) -> (PresetFolders, PresetImages) {
    let folders = PresetFolders {
        root_path: Some(device.root_path.clone()),
        system_paths: device.system_paths.clone(),
    };
    let images = PresetImages {
        path_template: Some(device.image_path_template.clone()).filter(|_| device.include_images),
        max_width: device.image_max_width,
        image_type: Some(device.image_type.clone()),
    };
    (folders, images)
}

/// POST /api/device-presets
pub async fn create_preset(
    State(state): State<AppState>,
    Json(request): Json<UserPresetRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Preset name is required".to_string()));
    }
    let slug = slugify(request.slug.as_deref().filter(|s| !s.trim().is_empty()).unwrap_or(name));
    if slug.is_empty() {
        return Err(ApiError::BadRequest("Preset slug must contain letters or digits".to_string()));
    }

    let (folders, images) = match request.device_id {
        Some(id) => {
            let (folders, images) = preset_from_device(&require_device(&state, id).await?);
            (Some(folders), Some(images))
        }
        None => (request.folders, request.images),
    };
    let preset = DevicePreset {
        slug,
        name: name.to_string(),
        description: request.description,
        tags: request.tags,
        is_builtin: false,
        folders,
        images,
    };
    db::presets::save_user_preset(&state.db, &preset).await?;
    info!(preset = %preset.slug, "Saved user preset");
    Ok((StatusCode::CREATED, Json(preset)))
}

/// DELETE /api/device-presets/:slug
///
/// Built-in presets cannot be deleted.
pub async fn delete_preset(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult<StatusCode> {
    if !db::presets::delete_user_preset(&state.db, &slug).await? {
        return Err(ApiError::NotFound(format!("User preset '{}' not found", slug)));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn device_routes() -> Router<AppState> {
    Router::new()
        .route("/api/devices", get(list_devices).post(create_device))
        .route("/api/devices/:id", get(get_device).put(update_device).delete(delete_device))
        .route("/api/devices/:id/apply-preset", post(apply_preset))
        .route("/api/device-presets", get(list_presets).post(create_preset))
        .route("/api/device-presets/:slug", delete(delete_preset))
}
