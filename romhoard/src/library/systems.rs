//! Built-in system catalogue
//!
//! The catalogue ships inside the binary and is upserted into the `systems`
//! table at startup. Catalogue order becomes `sort_order`.

use romhoard_common::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::db;
use crate::models::System;

const CATALOGUE_JSON: &str = include_str!("systems.json");

/// Parse the embedded catalogue
pub fn builtin_systems() -> Result<Vec<System>> {
    let mut systems: Vec<System> = serde_json::from_str(CATALOGUE_JSON)?;
    for (index, system) in systems.iter_mut().enumerate() {
        system.sort_order = index as i64;
    }
    Ok(systems)
}

/// Upsert every catalogue system
///
/// Rows for systems no longer in the catalogue are left alone so their games
/// stay reachable.
pub async fn sync_systems(pool: &SqlitePool) -> Result<usize> {
    let systems = builtin_systems()?;
    for system in &systems {
        db::systems::upsert_system(pool, system).await?;
    }
    info!(count = systems.len(), "Synchronized system catalogue");
    Ok(systems.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::extensions::is_archive_extension;
    use std::collections::HashSet;

    #[test]
    fn test_catalogue_parses_with_unique_slugs() {
        let systems = builtin_systems().unwrap();
        let slugs: HashSet<&str> = systems.iter().map(|s| s.slug.as_str()).collect();
        assert_eq!(slugs.len(), systems.len());
        for required in ["gb", "gba", "snes", "switch", "ps1", "pico8", "arcade", "neogeo"] {
            assert!(slugs.contains(required), "missing {}", required);
        }
        assert_eq!(systems[0].sort_order, 0);
        assert_eq!(systems[1].sort_order, 1);
    }

    #[test]
    fn test_catalogue_extensions_are_normalized() {
        for system in builtin_systems().unwrap() {
            assert!(!system.extensions.is_empty(), "{} has no extensions", system.slug);
            for ext in system.extensions.iter().chain(&system.exclusive_extensions) {
                assert!(ext.starts_with('.'), "{}: {}", system.slug, ext);
                assert_eq!(ext, &ext.to_lowercase());
            }
            for ext in &system.exclusive_extensions {
                assert!(!is_archive_extension(ext));
                assert!(system.extensions.contains(ext), "{}: {}", system.slug, ext);
            }
        }
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let pool = romhoard_common::db::init_memory_database().await.unwrap();
        let first = sync_systems(&pool).await.unwrap();
        let second = sync_systems(&pool).await.unwrap();
        assert_eq!(first, second);

        let stored = db::systems::list_systems(&pool).await.unwrap();
        assert_eq!(stored.len(), first);
        let gba = db::systems::get_system(&pool, "gba").await.unwrap().unwrap();
        assert_eq!(gba.name, "Game Boy Advance");
        assert_eq!(gba.extensions, vec![".gba".to_string()]);
    }
}
