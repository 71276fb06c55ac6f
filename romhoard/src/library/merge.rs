//! Duplicate game detection and merging

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use tracing::{debug, info};

use super::romset_scoring::recalculate_default_romset;
use crate::db;
use crate::db::games::GAME_COLUMNS;
use crate::models::{name_source, Game};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Game {0} not found")]
    NotFound(i64),

    #[error("Cannot merge a game with itself")]
    SelfMerge,

    #[error("Cannot merge games from different systems ({target} and {source_system})")]
    SystemMismatch { target: String, source_system: String },

    #[error("No source games given")]
    NoSources,

    #[error(transparent)]
    Database(#[from] romhoard_common::Error),
}

impl From<sqlx::Error> for MergeError {
    fn from(e: sqlx::Error) -> Self {
        MergeError::Database(romhoard_common::Error::Database(e))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub games_merged: i64,
    pub rom_sets_moved: i64,
    pub rom_sets_combined: i64,
    pub roms_moved: i64,
    pub images_moved: i64,
    pub images_deleted: i64,
}

/// Best game to keep among duplicates
///
/// Ranked by screenscraper id, metadata, image count, name source
/// authority, then the oldest record.
pub fn choose_canonical_game<F>(games: &[Game], image_count: F) -> Option<&Game>
where
    F: Fn(i64) -> i64,
{
    games.iter().max_by_key(|g| {
        (
            g.screenscraper_id.is_some(),
            g.has_metadata(),
            image_count(g.id),
            name_source::priority(&g.name_source),
            -g.id,
        )
    })
}

/// Each set's content types must not be base-only against update/dlc-only
fn content_compatible(first: &BTreeSet<String>, second: &BTreeSet<String>) -> bool {
    if first.is_empty() || second.is_empty() {
        return true;
    }
    let base_only = |types: &BTreeSet<String>| types.contains("base") && !types.contains("update") && !types.contains("dlc");
    let addon_only = |types: &BTreeSet<String>| !types.contains("base") && (types.contains("update") || types.contains("dlc"));

    !((base_only(first) && addon_only(second)) || (base_only(second) && addon_only(first)))
}

async fn load_game(tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<Game, MergeError> {
    let sql = format!("SELECT {} FROM games WHERE id = ?", GAME_COLUMNS);
    sqlx::query_as::<_, Game>(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(MergeError::NotFound(id))
}

async fn content_types(tx: &mut Transaction<'_, Sqlite>, rom_set_id: i64) -> Result<BTreeSet<String>, MergeError> {
    let types: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT content_type FROM roms WHERE rom_set_id = ? AND content_type != ''")
            .bind(rom_set_id)
            .fetch_all(&mut **tx)
            .await?;
    Ok(types.into_iter().collect())
}

async fn count_roms(tx: &mut Transaction<'_, Sqlite>, rom_set_id: i64) -> Result<i64, MergeError> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM roms WHERE rom_set_id = ?")
        .bind(rom_set_id)
        .fetch_one(&mut **tx)
        .await?)
}

/// Move ROMs into `into` and drop the emptied set
async fn combine_sets(tx: &mut Transaction<'_, Sqlite>, from: i64, into: i64) -> Result<i64, MergeError> {
    let moved = sqlx::query("UPDATE roms SET rom_set_id = ? WHERE rom_set_id = ?")
        .bind(into)
        .bind(from)
        .execute(&mut **tx)
        .await?
        .rows_affected() as i64;
    sqlx::query("DELETE FROM rom_sets WHERE id = ?")
        .bind(from)
        .execute(&mut **tx)
        .await?;
    Ok(moved)
}

#[derive(sqlx::FromRow)]
struct SetKey {
    id: i64,
    region: String,
    revision: String,
    source_path: String,
}

async fn merge_rom_sets(
    tx: &mut Transaction<'_, Sqlite>,
    target_id: i64,
    source_id: i64,
    summary: &mut MergeSummary,
) -> Result<(), MergeError> {
    let source_sets: Vec<SetKey> =
        sqlx::query_as("SELECT id, region, revision, source_path FROM rom_sets WHERE game_id = ? ORDER BY id")
            .bind(source_id)
            .fetch_all(&mut **tx)
            .await?;

    for set in source_sets {
        let same_variant: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM rom_sets WHERE game_id = ? AND region = ? AND revision = ? ORDER BY id LIMIT 1",
        )
        .bind(target_id)
        .bind(&set.region)
        .bind(&set.revision)
        .fetch_optional(&mut **tx)
        .await?;

        let source_types = content_types(tx, set.id).await?;
        let mut revision = set.revision.clone();

        if let Some(existing) = same_variant {
            let target_types = content_types(tx, existing).await?;
            if content_compatible(&target_types, &source_types) {
                summary.roms_moved += combine_sets(tx, set.id, existing).await?;
                summary.rom_sets_combined += 1;
                debug!(from = set.id, into = existing, "Combined ROM sets");
                continue;
            }

            // Base and add-on sets stay apart under a content-type revision
            let label = if source_types.is_empty() {
                "merged".to_string()
            } else {
                source_types.iter().cloned().collect::<Vec<_>>().join("-")
            };
            revision = format!("({})", label);
        }

        let exact: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM rom_sets WHERE game_id = ? AND region = ? AND revision = ? AND source_path = ?",
        )
        .bind(target_id)
        .bind(&set.region)
        .bind(&revision)
        .bind(&set.source_path)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(existing) = exact {
            summary.roms_moved += combine_sets(tx, set.id, existing).await?;
            summary.rom_sets_combined += 1;
            continue;
        }

        sqlx::query("UPDATE rom_sets SET game_id = ?, revision = ? WHERE id = ?")
            .bind(target_id)
            .bind(&revision)
            .bind(set.id)
            .execute(&mut **tx)
            .await?;
        summary.rom_sets_moved += 1;
        summary.roms_moved += count_roms(tx, set.id).await?;
    }
    Ok(())
}

async fn merge_images(
    tx: &mut Transaction<'_, Sqlite>,
    target_id: i64,
    source_id: i64,
    summary: &mut MergeSummary,
) -> Result<(), MergeError> {
    let target_types: Vec<String> = sqlx::query_scalar("SELECT image_type FROM game_images WHERE game_id = ?")
        .bind(target_id)
        .fetch_all(&mut **tx)
        .await?;
    let mut target_types: HashSet<String> = target_types.into_iter().collect();

    let source_images: Vec<(i64, String)> =
        sqlx::query_as("SELECT id, image_type FROM game_images WHERE game_id = ? ORDER BY id")
            .bind(source_id)
            .fetch_all(&mut **tx)
            .await?;

    for (image_id, image_type) in source_images {
        if target_types.contains(&image_type) {
            sqlx::query("DELETE FROM game_images WHERE id = ?")
                .bind(image_id)
                .execute(&mut **tx)
                .await?;
            summary.images_deleted += 1;
        } else {
            sqlx::query("UPDATE game_images SET game_id = ? WHERE id = ?")
                .bind(target_id)
                .bind(image_id)
                .execute(&mut **tx)
                .await?;
            summary.images_moved += 1;
            target_types.insert(image_type);
        }
    }
    Ok(())
}

/// Fill metadata the target lacks from the source
fn copy_missing_metadata(target: &mut Game, source: &Game) -> bool {
    let mut changed = false;

    macro_rules! fill_str {
        ($field:ident) => {
            if target.$field.is_empty() && !source.$field.is_empty() {
                target.$field = source.$field.clone();
                changed = true;
            }
        };
    }
    macro_rules! fill_opt {
        ($field:ident) => {
            if target.$field.is_none() && source.$field.is_some() {
                target.$field = source.$field.clone();
                changed = true;
            }
        };
    }

    fill_str!(description);
    fill_opt!(release_date);
    fill_str!(developer);
    fill_str!(publisher);
    fill_str!(players);
    fill_opt!(rating);
    fill_str!(rating_source);
    fill_opt!(metadata_updated_at);
    fill_opt!(screenscraper_id);
    changed
}

async fn save_metadata(tx: &mut Transaction<'_, Sqlite>, game: &Game) -> Result<(), MergeError> {
    sqlx::query(
        r#"
        UPDATE games SET
            screenscraper_id = ?, description = ?, release_date = ?, developer = ?, publisher = ?,
            players = ?, rating = ?, rating_source = ?, metadata_updated_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(game.screenscraper_id)
    .bind(&game.description)
    .bind(&game.release_date)
    .bind(&game.developer)
    .bind(&game.publisher)
    .bind(&game.players)
    .bind(game.rating)
    .bind(&game.rating_source)
    .bind(game.metadata_updated_at)
    .bind(chrono::Utc::now())
    .bind(game.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn copy_genres_if_missing(tx: &mut Transaction<'_, Sqlite>, target_id: i64, source_id: i64) -> Result<(), MergeError> {
    let target_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM game_genres WHERE game_id = ?")
        .bind(target_id)
        .fetch_one(&mut **tx)
        .await?;
    if target_count > 0 {
        return Ok(());
    }
    sqlx::query("INSERT OR IGNORE INTO game_genres (game_id, genre_id) SELECT ?, genre_id FROM game_genres WHERE game_id = ?")
        .bind(target_id)
        .bind(source_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Merge source games into the target in one transaction
///
/// The target's default ROM set is recalculated once the merge is committed.
pub async fn merge_games(pool: &SqlitePool, target_id: i64, source_ids: &[i64]) -> Result<MergeSummary, MergeError> {
    let mut sources: Vec<i64> = Vec::new();
    for id in source_ids {
        if *id == target_id {
            return Err(MergeError::SelfMerge);
        }
        if !sources.contains(id) {
            sources.push(*id);
        }
    }
    if sources.is_empty() {
        return Err(MergeError::NoSources);
    }

    let mut summary = MergeSummary::default();
    let mut tx = pool.begin().await?;
    let mut target = load_game(&mut tx, target_id).await?;

    for source_id in &sources {
        let source = load_game(&mut tx, *source_id).await?;
        if source.system_slug != target.system_slug {
            return Err(MergeError::SystemMismatch {
                target: target.system_slug.clone(),
                source_system: source.system_slug,
            });
        }
        info!(source_id = source.id, source = %source.name, target_id, target = %target.name, "Merging game");

        merge_rom_sets(&mut tx, target_id, source.id, &mut summary).await?;
        merge_images(&mut tx, target_id, source.id, &mut summary).await?;

        if copy_missing_metadata(&mut target, &source) {
            save_metadata(&mut tx, &target).await?;
        }
        copy_genres_if_missing(&mut tx, target_id, source.id).await?;

        sqlx::query("DELETE FROM games WHERE id = ?")
            .bind(source.id)
            .execute(&mut *tx)
            .await?;
        summary.games_merged += 1;
    }

    tx.commit().await?;
    recalculate_default_romset(pool, target_id).await?;

    info!(
        target_id,
        games_merged = summary.games_merged,
        rom_sets_moved = summary.rom_sets_moved,
        rom_sets_combined = summary.rom_sets_combined,
        roms_moved = summary.roms_moved,
        "Merge complete"
    );
    Ok(summary)
}

/// Games that look like the same title, canonical first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub system_slug: String,
    pub canonical_id: i64,
    pub game_ids: Vec<i64>,
}

struct DisjointSet {
    parent: HashMap<i64, i64>,
}

impl DisjointSet {
    fn find(&mut self, id: i64) -> i64 {
        let parent = *self.parent.entry(id).or_insert(id);
        if parent == id {
            return id;
        }
        let root = self.find(parent);
        self.parent.insert(id, root);
        root
    }

    fn union(&mut self, a: i64, b: i64) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower id becomes the root
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent.insert(child, root);
        }
    }

    fn union_all<K>(&mut self, groups: HashMap<K, Vec<i64>>) {
        for ids in groups.into_values() {
            for pair in ids.windows(2) {
                self.union(pair[0], pair[1]);
            }
        }
    }
}

/// Groups of games sharing a screenscraper id, a case-insensitive name or a
/// ROM crc32 within one system
///
/// Overlapping matches join into one group, so each game is listed once.
pub async fn find_duplicate_groups(pool: &SqlitePool, system_slug: Option<&str>) -> romhoard_common::Result<Vec<DuplicateGroup>> {
    let games: Vec<Game> = match system_slug {
        Some(slug) => db::games::list_games_in_system(pool, slug).await?,
        None => {
            let sql = format!("SELECT {} FROM games ORDER BY id", GAME_COLUMNS);
            sqlx::query_as::<_, Game>(&sql).fetch_all(pool).await?
        }
    };

    let mut hashes: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT DISTINCT rs.game_id, r.crc32
        FROM roms r JOIN rom_sets rs ON rs.id = r.rom_set_id
        WHERE r.crc32 != ''
        ORDER BY rs.game_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let by_id: HashMap<i64, &Game> = games.iter().map(|g| (g.id, g)).collect();
    hashes.retain(|(game_id, _)| by_id.contains_key(game_id));

    let mut by_ss: HashMap<(String, i64), Vec<i64>> = HashMap::new();
    let mut by_name: HashMap<(String, String), Vec<i64>> = HashMap::new();
    for game in &games {
        if let Some(ss) = game.screenscraper_id {
            by_ss.entry((game.system_slug.clone(), ss)).or_default().push(game.id);
        }
        by_name
            .entry((game.system_slug.clone(), game.name.to_lowercase()))
            .or_default()
            .push(game.id);
    }
    let mut by_crc: HashMap<(String, String), Vec<i64>> = HashMap::new();
    for (game_id, crc) in hashes {
        if let Some(game) = by_id.get(&game_id) {
            by_crc
                .entry((game.system_slug.clone(), crc.to_lowercase()))
                .or_default()
                .push(game_id);
        }
    }

    let mut sets = DisjointSet { parent: HashMap::new() };
    sets.union_all(by_ss);
    sets.union_all(by_name);
    sets.union_all(by_crc);

    let mut components: HashMap<i64, Vec<Game>> = HashMap::new();
    for game in &games {
        let root = sets.find(game.id);
        components.entry(root).or_default().push(game.clone());
    }

    let mut groups = Vec::new();
    for members in components.into_values().filter(|m| m.len() > 1) {
        let mut image_counts = HashMap::new();
        for game in &members {
            image_counts.insert(game.id, db::images::count_images_for_game(pool, game.id).await?);
        }
        let Some(canonical) = choose_canonical_game(&members, |id| image_counts.get(&id).copied().unwrap_or(0))
        else {
            continue;
        };

        let canonical_id = canonical.id;
        let mut game_ids = vec![canonical_id];
        game_ids.extend(members.iter().map(|g| g.id).filter(|id| *id != canonical_id));
        groups.push(DuplicateGroup {
            system_slug: canonical.system_slug.clone(),
            canonical_id,
            game_ids,
        });
    }
    groups.sort_by(|a, b| a.system_slug.cmp(&b.system_slug).then(a.canonical_id.cmp(&b.canonical_id)));
    Ok(groups)
}
