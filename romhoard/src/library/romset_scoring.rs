//! ROM set scoring for default selection
//!
//! Higher score = better default. Region dominates; archive layout breaks
//! ties between sets of the same region; Switch sets without a base game
//! are effectively disqualified.

use std::collections::HashMap;

use romhoard_common::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db;
use crate::models::{Rom, RomSet};

pub const DEFAULT_REGION_PRIORITIES: &[(&str, i64)] =
    &[("USA", 1000), ("Europe", 800), ("Japan", 600), ("World", 400)];
pub const DEFAULT_REGION_SCORE: i64 = 200;

pub const LOOSE_FILE_BONUS: i64 = 150;
pub const SINGLE_ROM_ARCHIVE_BONUS: i64 = 100;
pub const ARCHIVE_PENALTY_PER_ROM: i64 = 2;
pub const MAX_ARCHIVE_PENALTY: i64 = 75;
pub const NO_BASE_GAME_PENALTY: i64 = -5000;

/// Region → score table
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPriorities(HashMap<String, i64>);

impl Default for RegionPriorities {
    fn default() -> Self {
        Self(
            DEFAULT_REGION_PRIORITIES
                .iter()
                .map(|(r, s)| (r.to_string(), *s))
                .collect(),
        )
    }
}

impl RegionPriorities {
    /// Build from the `region_priorities` setting
    ///
    /// A list scores `1000 - 100 * index`; an object maps regions to scores.
    /// Anything else falls back to the defaults.
    pub fn from_setting(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Array(regions)) => Self(
                regions
                    .iter()
                    .filter_map(Value::as_str)
                    .enumerate()
                    .map(|(i, r)| (r.to_string(), 1000 - 100 * i as i64))
                    .collect(),
            ),
            Some(Value::Object(map)) => Self(
                map.iter()
                    .filter_map(|(r, s)| s.as_i64().map(|s| (r.clone(), s)))
                    .collect(),
            ),
            _ => Self::default(),
        }
    }

    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let value = db::settings::get_region_priorities(pool).await?;
        Ok(Self::from_setting(value.as_ref()))
    }

    /// Score of a region string; "USA, Europe" takes the best part
    pub fn score(&self, region: &str) -> i64 {
        region
            .split(',')
            .map(str::trim)
            .map(|r| self.0.get(r).copied().unwrap_or(DEFAULT_REGION_SCORE))
            .max()
            .unwrap_or(DEFAULT_REGION_SCORE)
    }
}

/// Archive score of a set: the worst score among its ROMs
///
/// `archive_rom_count` gives the number of ROMs stored from an archive.
pub fn archive_score<F>(roms: &[Rom], archive_rom_count: F) -> i64
where
    F: Fn(&str) -> i64,
{
    roms.iter()
        .map(|rom| {
            if !rom.is_archived() {
                return LOOSE_FILE_BONUS;
            }
            match archive_rom_count(&rom.archive_path) {
                1 => SINGLE_ROM_ARCHIVE_BONUS,
                count => -(count * ARCHIVE_PENALTY_PER_ROM).min(MAX_ARCHIVE_PENALTY),
            }
        })
        .min()
        .unwrap_or(0)
}

/// Penalty for Switch sets that carry content types but no base game
pub fn content_type_penalty(system_slug: &str, roms: &[Rom]) -> i64 {
    if system_slug != "switch" {
        return 0;
    }
    if roms.iter().all(|r| r.content_type.is_empty()) {
        return 0;
    }
    if roms.iter().any(|r| r.content_type == "base") {
        0
    } else {
        NO_BASE_GAME_PENALTY
    }
}

/// A ROM set with its ROMs and computed score
#[derive(Debug, Clone)]
pub struct ScoredRomSet {
    pub rom_set: RomSet,
    pub roms: Vec<Rom>,
    pub score: i64,
}

pub fn score_rom_set<F>(
    priorities: &RegionPriorities,
    system_slug: &str,
    rom_set: &RomSet,
    roms: &[Rom],
    archive_rom_count: F,
) -> i64
where
    F: Fn(&str) -> i64,
{
    let mut score = priorities.score(&rom_set.region);
    if !roms.is_empty() {
        score += archive_score(roms, archive_rom_count);
    }
    score + content_type_penalty(system_slug, roms)
}

/// Highest-scoring candidate with ROMs; ties keep the earlier candidate
pub fn best_romset(candidates: &[ScoredRomSet]) -> Option<&ScoredRomSet> {
    candidates
        .iter()
        .filter(|c| !c.roms.is_empty())
        .fold(None, |best: Option<&ScoredRomSet>, c| match best {
            Some(b) if b.score >= c.score => Some(b),
            _ => Some(c),
        })
}

/// Score every ROM set of a game, in id order
pub async fn score_game_rom_sets(
    pool: &SqlitePool,
    priorities: &RegionPriorities,
    game_id: i64,
    system_slug: &str,
) -> Result<Vec<ScoredRomSet>> {
    let rom_sets = db::rom_sets::list_rom_sets_for_game(pool, game_id).await?;
    let mut scored = Vec::with_capacity(rom_sets.len());

    for rom_set in rom_sets {
        let roms = db::roms::list_roms_for_rom_set(pool, rom_set.id).await?;

        let mut archive_counts: HashMap<String, i64> = HashMap::new();
        for rom in roms.iter().filter(|r| r.is_archived()) {
            if !archive_counts.contains_key(&rom.archive_path) {
                let count = db::roms::count_roms_in_archive(pool, &rom.archive_path).await?;
                archive_counts.insert(rom.archive_path.clone(), count);
            }
        }

        let score = score_rom_set(priorities, system_slug, &rom_set, &roms, |path| {
            archive_counts.get(path).copied().unwrap_or(0)
        });
        scored.push(ScoredRomSet { rom_set, roms, score });
    }

    Ok(scored)
}

/// Best ROM set of a game, if any set still holds ROMs
pub async fn best_romset_for_game(pool: &SqlitePool, game_id: i64) -> Result<Option<ScoredRomSet>> {
    let Some(game) = db::games::get_game(pool, game_id).await? else {
        return Ok(None);
    };
    let priorities = RegionPriorities::load(pool).await?;
    let scored = score_game_rom_sets(pool, &priorities, game.id, &game.system_slug).await?;
    Ok(best_romset(&scored).cloned())
}

/// Point the game's default at its best set
///
/// Returns true when the default changed. A game with no ROMs keeps its
/// current default.
pub async fn recalculate_default_romset(pool: &SqlitePool, game_id: i64) -> Result<bool> {
    let Some(game) = db::games::get_game(pool, game_id).await? else {
        return Ok(false);
    };
    let Some(best) = best_romset_for_game(pool, game_id).await? else {
        return Ok(false);
    };

    if game.default_rom_set_id == Some(best.rom_set.id) {
        return Ok(false);
    }

    debug!(
        game_id,
        rom_set_id = best.rom_set.id,
        score = best.score,
        "Default ROM set changed"
    );
    db::games::set_default_rom_set(pool, game_id, Some(best.rom_set.id)).await?;
    Ok(true)
}

/// Recalculate every game's default; returns how many changed
pub async fn recalculate_all_default_romsets(pool: &SqlitePool) -> Result<usize> {
    let mut changed = 0;
    for game_id in db::games::list_all_game_ids(pool).await? {
        if recalculate_default_romset(pool, game_id).await? {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Default regions followed by every other region found in the library
pub async fn known_regions(pool: &SqlitePool) -> Result<Vec<String>> {
    let mut regions: Vec<String> = DEFAULT_REGION_PRIORITIES
        .iter()
        .map(|(r, _)| r.to_string())
        .collect();

    for region in db::rom_sets::distinct_regions(pool).await? {
        for part in region.split(',').map(str::trim) {
            if !part.is_empty() && !regions.iter().any(|r| r == part) {
                regions.push(part.to_string());
            }
        }
    }
    Ok(regions)
}
