//! System catalogue persistence

use romhoard_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::models::System;

const SYSTEM_COLUMNS: &str = "slug, name, extensions, exclusive_extensions, folder_names, \
                              archive_as_rom, release_year, sort_order";

pub async fn upsert_system(pool: &SqlitePool, system: &System) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO systems (slug, name, extensions, exclusive_extensions, folder_names,
                             archive_as_rom, release_year, sort_order)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(slug) DO UPDATE SET
            name = excluded.name,
            extensions = excluded.extensions,
            exclusive_extensions = excluded.exclusive_extensions,
            folder_names = excluded.folder_names,
            archive_as_rom = excluded.archive_as_rom,
            release_year = excluded.release_year,
            sort_order = excluded.sort_order
        "#,
    )
    .bind(&system.slug)
    .bind(&system.name)
    .bind(serde_json::to_string(&system.extensions)?)
    .bind(serde_json::to_string(&system.exclusive_extensions)?)
    .bind(serde_json::to_string(&system.folder_names)?)
    .bind(system.archive_as_rom)
    .bind(system.release_year)
    .bind(system.sort_order)
    .execute(pool)
    .await?;

    Ok(())
}

/// All systems in catalogue order
pub async fn list_systems(pool: &SqlitePool) -> Result<Vec<System>> {
    let sql = format!("SELECT {} FROM systems ORDER BY sort_order, name", SYSTEM_COLUMNS);
    Ok(sqlx::query_as::<_, System>(&sql).fetch_all(pool).await?)
}

pub async fn get_system(pool: &SqlitePool, slug: &str) -> Result<Option<System>> {
    let sql = format!("SELECT {} FROM systems WHERE slug = ?", SYSTEM_COLUMNS);
    Ok(sqlx::query_as::<_, System>(&sql)
        .bind(slug)
        .fetch_optional(pool)
        .await?)
}

/// System with library counts, for the system browser
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SystemSummary {
    pub slug: String,
    pub name: String,
    pub release_year: Option<i64>,
    pub game_count: i64,
    pub rom_count: i64,
}

/// Systems that have at least one game, optionally filtered by name or slug
pub async fn list_systems_with_games(pool: &SqlitePool, query: Option<&str>) -> Result<Vec<SystemSummary>> {
    let pattern = query
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", q.to_lowercase()));

    let rows = sqlx::query_as::<_, SystemSummary>(
        r#"
        SELECT s.slug, s.name, s.release_year,
               (SELECT COUNT(*) FROM games g WHERE g.system_slug = s.slug) AS game_count,
               (SELECT COUNT(*) FROM roms r
                  JOIN rom_sets rs ON rs.id = r.rom_set_id
                  JOIN games g ON g.id = rs.game_id
                 WHERE g.system_slug = s.slug) AS rom_count
        FROM systems s
        WHERE EXISTS (SELECT 1 FROM games g WHERE g.system_slug = s.slug)
          AND (? IS NULL OR LOWER(s.name) LIKE ? OR LOWER(s.slug) LIKE ?)
        ORDER BY s.sort_order, s.name
        "#,
    )
    .bind(pattern.as_deref())
    .bind(pattern.as_deref())
    .bind(pattern.as_deref())
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
