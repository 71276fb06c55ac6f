//! Device preset persistence
//!
//! `folders` and `images` are nullable JSON columns; a preset without them
//! leaves that part of a device untouched when applied.

use romhoard_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::DevicePreset;

const PRESET_COLUMNS: &str = "slug, name, description, tags, is_builtin, folders, images";

fn map_preset(row: &SqliteRow) -> Result<DevicePreset> {
    let tags: String = row.get("tags");
    let folders: Option<String> = row.get("folders");
    let images: Option<String> = row.get("images");

    Ok(DevicePreset {
        slug: row.get("slug"),
        name: row.get("name"),
        description: row.get("description"),
        tags: serde_json::from_str(&tags)?,
        is_builtin: row.get("is_builtin"),
        folders: folders.as_deref().map(serde_json::from_str).transpose()?,
        images: images.as_deref().map(serde_json::from_str).transpose()?,
    })
}

pub async fn upsert_preset(pool: &SqlitePool, preset: &DevicePreset) -> Result<()> {
    let folders = preset.folders.as_ref().map(serde_json::to_string).transpose()?;
    let images = preset.images.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO device_presets (slug, name, description, tags, is_builtin, folders, images)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(slug) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            tags = excluded.tags,
            is_builtin = excluded.is_builtin,
            folders = excluded.folders,
            images = excluded.images
        "#,
    )
    .bind(&preset.slug)
    .bind(&preset.name)
    .bind(&preset.description)
    .bind(serde_json::to_string(&preset.tags)?)
    .bind(preset.is_builtin)
    .bind(folders)
    .bind(images)
    .execute(pool)
    .await?;
    Ok(())
}

/// Built-ins first, then by name
pub async fn list_presets(pool: &SqlitePool) -> Result<Vec<DevicePreset>> {
    let sql = format!(
        "SELECT {} FROM device_presets ORDER BY is_builtin DESC, name",
        PRESET_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(map_preset).collect()
}

pub async fn get_preset(pool: &SqlitePool, slug: &str) -> Result<Option<DevicePreset>> {
    let sql = format!("SELECT {} FROM device_presets WHERE slug = ?", PRESET_COLUMNS);
    let row = sqlx::query(&sql).bind(slug).fetch_optional(pool).await?;
    row.as_ref().map(map_preset).transpose()
}

/// Save a user preset; built-in slugs cannot be overwritten
pub async fn save_user_preset(pool: &SqlitePool, preset: &DevicePreset) -> Result<()> {
    if let Some(existing) = get_preset(pool, &preset.slug).await? {
        if existing.is_builtin {
            return Err(Error::InvalidInput(format!(
                "Preset '{}' is built in and cannot be replaced",
                preset.slug
            )));
        }
    }
    let mut preset = preset.clone();
    preset.is_builtin = false;
    upsert_preset(pool, &preset).await
}

pub async fn delete_user_preset(pool: &SqlitePool, slug: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM device_presets WHERE slug = ? AND is_builtin = 0")
        .bind(slug)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
