//! Built-in device presets
//!
//! Same pattern as the system catalogue: embedded JSON, upserted at startup.

use romhoard_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::info;

use crate::db;
use crate::models::{Device, DevicePreset};

const PRESETS_JSON: &str = include_str!("presets.json");

pub fn builtin_presets() -> Result<Vec<DevicePreset>> {
    let mut presets: Vec<DevicePreset> = serde_json::from_str(PRESETS_JSON)?;
    for preset in &mut presets {
        preset.is_builtin = true;
    }
    Ok(presets)
}

/// Upsert every built-in preset; user presets are untouched
pub async fn sync_presets(pool: &SqlitePool) -> Result<usize> {
    let presets = builtin_presets()?;
    for preset in &presets {
        db::presets::upsert_preset(pool, preset).await?;
    }
    info!(count = presets.len(), "Synchronized device presets");
    Ok(presets.len())
}

/// Apply a stored preset to a device and save it
pub async fn apply_preset_to_device(pool: &SqlitePool, device_id: i64, preset_slug: &str) -> Result<Device> {
    let mut device = db::devices::get_device(pool, device_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Device {} not found", device_id)))?;
    let preset = db::presets::get_preset(pool, preset_slug)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Preset '{}' not found", preset_slug)))?;

    device.apply_preset(&preset);
    db::devices::save_device(pool, &device).await?;
    info!(device = %device.slug, preset = %preset.slug, "Applied device preset");
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceInput;
    use std::collections::BTreeMap;

    #[test]
    fn test_builtin_presets_parse() {
        let presets = builtin_presets().unwrap();
        let slugs: Vec<&str> = presets.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["minui", "muos", "onion", "knulli"]);
        assert!(presets.iter().all(|p| p.is_builtin && p.folders.is_some() && p.images.is_some()));
    }

    #[tokio::test]
    async fn test_sync_and_apply() {
        let pool = romhoard_common::db::init_memory_database().await.unwrap();
        assert_eq!(sync_presets(&pool).await.unwrap(), 4);
        // Second sync updates in place
        assert_eq!(sync_presets(&pool).await.unwrap(), 4);
        assert_eq!(db::presets::list_presets(&pool).await.unwrap().len(), 4);

        let device = db::devices::create_device(
            &pool,
            &DeviceInput {
                name: "Miyoo Mini".into(),
                slug: None,
                description: String::new(),
                root_path: "Roms/".into(),
                system_paths: BTreeMap::new(),
                include_images: false,
                image_type: "cover".into(),
                image_path_template: String::new(),
                image_max_width: None,
            },
        )
        .await
        .unwrap();

        let device = apply_preset_to_device(&pool, device.id, "onion").await.unwrap();
        assert_eq!(device.applied_preset, "onion");
        assert!(device.include_images);
        assert_eq!(device.image_max_width, Some(250));
        assert_eq!(device.rom_path("gba", "Golden Sun", "gs.gba"), "Roms/GBA/gs.gba");
        assert_eq!(device.image_path("gba", "gs.gba").as_deref(), Some("Roms/GBA/Imgs/gs.png"));

        let stored = db::devices::get_device(&pool, device.id).await.unwrap().unwrap();
        assert_eq!(stored.applied_preset, "onion");

        assert!(matches!(
            apply_preset_to_device(&pool, device.id, "nope").await,
            Err(Error::NotFound(_))
        ));
    }
}
