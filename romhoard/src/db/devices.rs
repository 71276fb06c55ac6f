//! Device persistence

use chrono::Utc;
use romhoard_common::{Error, Result};
use sqlx::SqlitePool;

use crate::library::genres::slugify;
use crate::models::{Device, DeviceInput};

const DEVICE_COLUMNS: &str = "id, name, slug, description, root_path, system_paths, include_images, \
    image_type, image_path_template, image_max_width, applied_preset, created_at, updated_at";

pub async fn list_devices(pool: &SqlitePool) -> Result<Vec<Device>> {
    let sql = format!("SELECT {} FROM devices ORDER BY name, id", DEVICE_COLUMNS);
    Ok(sqlx::query_as::<_, Device>(&sql).fetch_all(pool).await?)
}

pub async fn get_device(pool: &SqlitePool, id: i64) -> Result<Option<Device>> {
    let sql = format!("SELECT {} FROM devices WHERE id = ?", DEVICE_COLUMNS);
    Ok(sqlx::query_as::<_, Device>(&sql).bind(id).fetch_optional(pool).await?)
}

pub async fn get_device_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Device>> {
    let sql = format!("SELECT {} FROM devices WHERE slug = ?", DEVICE_COLUMNS);
    Ok(sqlx::query_as::<_, Device>(&sql).bind(slug).fetch_optional(pool).await?)
}

fn validate(input: &DeviceInput) -> Result<String> {
    if input.name.trim().is_empty() {
        return Err(Error::InvalidInput("Device name is required".to_string()));
    }
    if input.image_type != crate::models::device::IMAGE_TYPE_COVER
        && input.image_type != crate::models::device::IMAGE_TYPE_SCREENSHOT
    {
        return Err(Error::InvalidInput(format!("Unknown image type '{}'", input.image_type)));
    }
    if matches!(input.image_max_width, Some(w) if w <= 0) {
        return Err(Error::InvalidInput("image_max_width must be positive".to_string()));
    }

    let slug = match input.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slugify(slug),
        None => slugify(&input.name),
    };
    if slug.is_empty() {
        return Err(Error::InvalidInput("Device slug must contain letters or digits".to_string()));
    }
    Ok(slug)
}

/// Create a device; the slug defaults to the slugified name
///
/// A duplicate slug is `InvalidInput`.
pub async fn create_device(pool: &SqlitePool, input: &DeviceInput) -> Result<Device> {
    let slug = validate(input)?;
    if get_device_by_slug(pool, &slug).await?.is_some() {
        return Err(Error::InvalidInput(format!("A device with slug '{}' already exists", slug)));
    }

    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO devices (name, slug, description, root_path, system_paths, include_images,
                             image_type, image_path_template, image_max_width, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(input.name.trim())
    .bind(&slug)
    .bind(&input.description)
    .bind(&input.root_path)
    .bind(serde_json::to_string(&input.system_paths)?)
    .bind(input.include_images)
    .bind(&input.image_type)
    .bind(&input.image_path_template)
    .bind(input.image_max_width)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_device(pool, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Device {} vanished after insert", id)))
}

/// Replace a device's settings from the input
pub async fn update_device(pool: &SqlitePool, id: i64, input: &DeviceInput) -> Result<Option<Device>> {
    let slug = validate(input)?;
    if get_device(pool, id).await?.is_none() {
        return Ok(None);
    }
    if let Some(existing) = get_device_by_slug(pool, &slug).await? {
        if existing.id != id {
            return Err(Error::InvalidInput(format!("A device with slug '{}' already exists", slug)));
        }
    }

    let result = sqlx::query(
        r#"
        UPDATE devices SET
            name = ?, slug = ?, description = ?, root_path = ?, system_paths = ?,
            include_images = ?, image_type = ?, image_path_template = ?, image_max_width = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(input.name.trim())
    .bind(&slug)
    .bind(&input.description)
    .bind(&input.root_path)
    .bind(serde_json::to_string(&input.system_paths)?)
    .bind(input.include_images)
    .bind(&input.image_type)
    .bind(&input.image_path_template)
    .bind(input.image_max_width)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_device(pool, id).await
}

/// Write back a device after in-memory changes such as an applied preset
pub async fn save_device(pool: &SqlitePool, device: &Device) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE devices SET
            root_path = ?, system_paths = ?, include_images = ?, image_type = ?,
            image_path_template = ?, image_max_width = ?, applied_preset = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&device.root_path)
    .bind(serde_json::to_string(&device.system_paths)?)
    .bind(device.include_images)
    .bind(&device.image_type)
    .bind(&device.image_path_template)
    .bind(device.image_max_width)
    .bind(&device.applied_preset)
    .bind(Utc::now())
    .bind(device.id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_device(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM devices WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
