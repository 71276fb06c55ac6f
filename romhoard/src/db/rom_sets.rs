//! ROM set persistence

use chrono::Utc;
use romhoard_common::Result;
use sqlx::SqlitePool;

use crate::models::RomSet;

const ROM_SET_COLUMNS: &str = "id, game_id, region, revision, source_path, created_at";

pub async fn get_rom_set(pool: &SqlitePool, id: i64) -> Result<Option<RomSet>> {
    let sql = format!("SELECT {} FROM rom_sets WHERE id = ?", ROM_SET_COLUMNS);
    Ok(sqlx::query_as::<_, RomSet>(&sql).bind(id).fetch_optional(pool).await?)
}

/// ROM sets of a game in creation order
pub async fn list_rom_sets_for_game(pool: &SqlitePool, game_id: i64) -> Result<Vec<RomSet>> {
    let sql = format!("SELECT {} FROM rom_sets WHERE game_id = ? ORDER BY id", ROM_SET_COLUMNS);
    Ok(sqlx::query_as::<_, RomSet>(&sql).bind(game_id).fetch_all(pool).await?)
}

/// Find the set for (game, region, revision, source path) or create it
pub async fn get_or_create_rom_set(
    pool: &SqlitePool,
    game_id: i64,
    region: &str,
    revision: &str,
    source_path: &str,
) -> Result<RomSet> {
    sqlx::query(
        r#"
        INSERT INTO rom_sets (game_id, region, revision, source_path, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(game_id, region, revision, source_path) DO NOTHING
        "#,
    )
    .bind(game_id)
    .bind(region)
    .bind(revision)
    .bind(source_path)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let sql = format!(
        "SELECT {} FROM rom_sets WHERE game_id = ? AND region = ? AND revision = ? AND source_path = ?",
        ROM_SET_COLUMNS
    );
    Ok(sqlx::query_as::<_, RomSet>(&sql)
        .bind(game_id)
        .bind(region)
        .bind(revision)
        .bind(source_path)
        .fetch_one(pool)
        .await?)
}

/// Delete the given sets when they no longer hold ROMs
///
/// Returns the games that owned a deleted set.
pub async fn delete_empty_rom_sets(pool: &SqlitePool, rom_set_ids: &[i64]) -> Result<Vec<i64>> {
    let mut game_ids = Vec::new();
    for id in rom_set_ids {
        let game_id: Option<i64> = sqlx::query_scalar(
            r#"
            DELETE FROM rom_sets
            WHERE id = ? AND NOT EXISTS (SELECT 1 FROM roms WHERE rom_set_id = rom_sets.id)
            RETURNING game_id
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        if let Some(game_id) = game_id {
            if !game_ids.contains(&game_id) {
                game_ids.push(game_id);
            }
        }
    }
    Ok(game_ids)
}

/// Distinct non-empty regions across all ROM sets
pub async fn distinct_regions(pool: &SqlitePool) -> Result<Vec<String>> {
    Ok(sqlx::query_scalar(
        "SELECT DISTINCT region FROM rom_sets WHERE region != '' ORDER BY region",
    )
    .fetch_all(pool)
    .await?)
}
