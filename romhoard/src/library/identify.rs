//! Post-scan identification: rename games from hash lookups

use std::sync::Arc;

use chrono::Utc;
use romhoard_common::events::{EventBus, RomhoardEvent};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::lookup::{lookup_rom, LookupError, LookupService, RomHashes};
use super::merge::{merge_games, MergeError};
use crate::db;
use crate::models::name_source;

#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Database(#[from] romhoard_common::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IdentifyOutcome {
    Identified {
        game_id: i64,
        old_name: String,
        new_name: String,
        source: String,
    },
    Skipped {
        reason: String,
    },
    NoMatch,
}

impl IdentifyOutcome {
    fn skipped(reason: &str) -> Self {
        IdentifyOutcome::Skipped {
            reason: reason.to_string(),
        }
    }
}

/// Runs hash lookups for ROMs and applies the names found
pub struct Identifier {
    pool: SqlitePool,
    services: Vec<Arc<dyn LookupService>>,
    events: Option<EventBus>,
}

impl Identifier {
    pub fn new(pool: SqlitePool, services: Vec<Arc<dyn LookupService>>, events: Option<EventBus>) -> Self {
        Self { pool, services, events }
    }

    /// Identify the game of one ROM
    ///
    /// When the looked-up name already belongs to another game of the system,
    /// this ROM's game is merged into that one.
    pub async fn identify_rom(&self, rom_id: i64, use_network: bool) -> Result<IdentifyOutcome, IdentifyError> {
        let Some(rom) = db::roms::get_rom(&self.pool, rom_id).await? else {
            return Ok(IdentifyOutcome::skipped("rom_deleted"));
        };
        let Some(rom_set) = db::rom_sets::get_rom_set(&self.pool, rom.rom_set_id).await? else {
            return Ok(IdentifyOutcome::skipped("rom_deleted"));
        };
        let Some(game) = db::games::get_game(&self.pool, rom_set.game_id).await? else {
            return Ok(IdentifyOutcome::skipped("rom_deleted"));
        };

        if name_source::HASH_BASED.contains(&game.name_source.as_str()) {
            return Ok(IdentifyOutcome::skipped("already_hash_based"));
        }

        let hashes = RomHashes {
            crc32: &rom.crc32,
            sha1: &rom.sha1,
            md5: "",
        };
        if hashes.is_empty() {
            return Ok(IdentifyOutcome::skipped("no_hash"));
        }

        let Some(system) = db::systems::get_system(&self.pool, &game.system_slug).await? else {
            return Ok(IdentifyOutcome::skipped("unknown_system"));
        };

        let Some(found) = lookup_rom(&self.pool, &self.services, &system, &hashes, use_network).await? else {
            debug!(rom_id, game = %game.name, "No hash match");
            return Ok(IdentifyOutcome::NoMatch);
        };

        let existing = db::games::find_game_by_name(&self.pool, &system.slug, &found.name)
            .await?
            .filter(|other| other.id != game.id);

        let game_id = match existing {
            Some(other) => {
                info!(
                    rom_id,
                    from = %game.name,
                    into = %other.name,
                    "Identified name already exists; merging games"
                );
                merge_games(&self.pool, other.id, &[game.id]).await?;
                if let Some(events) = &self.events {
                    events.emit_lossy(RomhoardEvent::GamesMerged {
                        target_id: other.id,
                        merged_ids: vec![game.id],
                        timestamp: Utc::now(),
                    });
                }
                if !name_source::HASH_BASED.contains(&other.name_source.as_str()) {
                    db::games::rename_game(&self.pool, other.id, &found.name, &found.source).await?;
                }
                other.id
            }
            None => {
                db::games::rename_game(&self.pool, game.id, &found.name, &found.source).await?;
                game.id
            }
        };

        info!(
            rom_id,
            game_id,
            old_name = %game.name,
            new_name = %found.name,
            source = %found.source,
            "Identified ROM"
        );
        if let Some(events) = &self.events {
            events.emit_lossy(RomhoardEvent::GameIdentified {
                game_id,
                old_name: game.name.clone(),
                new_name: found.name.clone(),
                source: found.source.clone(),
                timestamp: Utc::now(),
            });
        }

        Ok(IdentifyOutcome::Identified {
            game_id,
            old_name: game.name,
            new_name: found.name,
            source: found.source,
        })
    }

    /// Identify a batch of ROMs, returning how many were identified
    ///
    /// A failure on one ROM is logged and the rest continue.
    pub async fn identify_roms(&self, rom_ids: &[i64], use_network: bool) -> i64 {
        let mut identified = 0;
        for rom_id in rom_ids {
            match self.identify_rom(*rom_id, use_network).await {
                Ok(IdentifyOutcome::Identified { .. }) => identified += 1,
                Ok(_) => {}
                Err(e) => warn!(rom_id, "Identification failed: {}", e),
            }
        }
        identified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{add_rom, memory_pool_with_systems};
    use crate::library::lookup::cache;
    use crate::library::lookup::LookupResult;

    async fn cache_name(pool: &SqlitePool, crc: &str, name: &str) {
        let parsed = LookupResult {
            name: name.into(),
            region: "USA".into(),
            revision: String::new(),
            tags: vec![],
            source: "NoIntros".into(),
            confidence: 0.9,
            raw_name: name.into(),
        };
        cache::save_match(pool, "crc32", crc, name, "", "NoIntros", Some(&parsed))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_identify_renames_from_cache() {
        let pool = memory_pool_with_systems().await;
        let game = db::games::create_game(&pool, "zelda minish", "gba", "filename").await.unwrap();
        let rom_id = add_rom(&pool, game.id, "/roms/gba/zelda minish.gba", "11112222").await;
        cache_name(&pool, "11112222", "The Legend of Zelda - The Minish Cap").await;

        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let identifier = Identifier::new(pool.clone(), vec![], Some(bus));

        let outcome = identifier.identify_rom(rom_id, false).await.unwrap();
        assert_eq!(
            outcome,
            IdentifyOutcome::Identified {
                game_id: game.id,
                old_name: "zelda minish".into(),
                new_name: "The Legend of Zelda - The Minish Cap".into(),
                source: "NoIntros".into(),
            }
        );
        let renamed = db::games::get_game(&pool, game.id).await.unwrap().unwrap();
        assert_eq!(renamed.name_source, "NoIntros");
        assert_eq!(rx.try_recv().unwrap().event_type(), "GameIdentified");

        // Hash-based names are final
        let again = identifier.identify_rom(rom_id, false).await.unwrap();
        assert_eq!(again, IdentifyOutcome::skipped("already_hash_based"));
    }

    #[tokio::test]
    async fn test_identify_merges_into_existing_name() {
        let pool = memory_pool_with_systems().await;
        let existing = db::games::create_game(&pool, "Metroid Fusion", "gba", "filename").await.unwrap();
        add_rom(&pool, existing.id, "/roms/gba/Metroid Fusion.gba", "aaaa0000").await;
        let stray = db::games::create_game(&pool, "metroid4", "gba", "filename").await.unwrap();
        let rom_id = add_rom(&pool, stray.id, "/roms/gba/metroid4.gba", "bbbb0000").await;
        cache_name(&pool, "bbbb0000", "Metroid Fusion").await;

        let identifier = Identifier::new(pool.clone(), vec![], None);
        let outcome = identifier.identify_rom(rom_id, false).await.unwrap();
        assert!(matches!(outcome, IdentifyOutcome::Identified { game_id, .. } if game_id == existing.id));

        assert!(db::games::get_game(&pool, stray.id).await.unwrap().is_none());
        assert_eq!(db::roms::list_roms_for_game(&pool, existing.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_identify_skips_and_misses() {
        let pool = memory_pool_with_systems().await;
        let identifier = Identifier::new(pool.clone(), vec![], None);
        assert_eq!(identifier.identify_rom(404, false).await.unwrap(), IdentifyOutcome::skipped("rom_deleted"));

        let game = db::games::create_game(&pool, "Unhashed", "gba", "filename").await.unwrap();
        let no_hash = add_rom(&pool, game.id, "/roms/gba/Unhashed.gba", "").await;
        assert_eq!(identifier.identify_rom(no_hash, false).await.unwrap(), IdentifyOutcome::skipped("no_hash"));

        let unknown = add_rom(&pool, game.id, "/roms/gba/Unknown.gba", "99999999").await;
        assert_eq!(identifier.identify_rom(unknown, false).await.unwrap(), IdentifyOutcome::NoMatch);
        assert_eq!(identifier.identify_roms(&[no_hash, unknown], false).await, 0);
    }
}
