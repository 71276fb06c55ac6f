//! Game persistence and library queries

use chrono::Utc;
use romhoard_common::Result;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::models::Game;

pub const GAME_COLUMNS: &str = "id, name, system_slug, name_source, default_rom_set_id, \
    screenscraper_id, description, release_date, developer, publisher, players, rating, \
    rating_source, metadata_updated_at, created_at, updated_at";

pub async fn get_game(pool: &SqlitePool, id: i64) -> Result<Option<Game>> {
    let sql = format!("SELECT {} FROM games WHERE id = ?", GAME_COLUMNS);
    Ok(sqlx::query_as::<_, Game>(&sql).bind(id).fetch_optional(pool).await?)
}

pub async fn get_games(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Game>> {
    let mut games = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(game) = get_game(pool, *id).await? {
            games.push(game);
        }
    }
    Ok(games)
}

/// Case-insensitive name match within a system
pub async fn find_game_by_name(pool: &SqlitePool, system_slug: &str, name: &str) -> Result<Option<Game>> {
    let sql = format!(
        "SELECT {} FROM games WHERE system_slug = ? AND LOWER(name) = LOWER(?) ORDER BY id LIMIT 1",
        GAME_COLUMNS
    );
    Ok(sqlx::query_as::<_, Game>(&sql)
        .bind(system_slug)
        .bind(name)
        .fetch_optional(pool)
        .await?)
}

async fn find_game_by_rom_column(
    pool: &SqlitePool,
    system_slug: &str,
    column: &str,
    value: &str,
) -> Result<Option<Game>> {
    let columns: Vec<String> = GAME_COLUMNS.split(", ").map(|c| format!("g.{}", c.trim())).collect();
    let sql = format!(
        r#"
        SELECT {} FROM games g
        WHERE g.system_slug = ?
          AND EXISTS (SELECT 1 FROM rom_sets rs JOIN roms r ON r.rom_set_id = rs.id
                      WHERE rs.game_id = g.id AND LOWER(r.{}) = LOWER(?))
        ORDER BY g.id LIMIT 1
        "#,
        columns.join(", "),
        column
    );
    Ok(sqlx::query_as::<_, Game>(&sql)
        .bind(system_slug)
        .bind(value)
        .fetch_optional(pool)
        .await?)
}

/// Game of the system holding a ROM with this file name, case-insensitive
pub async fn find_game_by_rom_file_name(pool: &SqlitePool, system_slug: &str, file_name: &str) -> Result<Option<Game>> {
    find_game_by_rom_column(pool, system_slug, "file_name", file_name).await
}

/// Like [`find_game_by_rom_file_name`] across every system
pub async fn find_any_game_by_rom_file_name(pool: &SqlitePool, file_name: &str) -> Result<Option<Game>> {
    let columns: Vec<String> = GAME_COLUMNS.split(", ").map(|c| format!("g.{}", c.trim())).collect();
    let sql = format!(
        r#"
        SELECT {} FROM games g
        WHERE EXISTS (SELECT 1 FROM rom_sets rs JOIN roms r ON r.rom_set_id = rs.id
                      WHERE rs.game_id = g.id AND LOWER(r.file_name) = LOWER(?))
        ORDER BY g.id LIMIT 1
        "#,
        columns.join(", ")
    );
    Ok(sqlx::query_as::<_, Game>(&sql)
        .bind(file_name)
        .fetch_optional(pool)
        .await?)
}

pub async fn find_game_by_screenscraper_id(
    pool: &SqlitePool,
    system_slug: &str,
    screenscraper_id: i64,
) -> Result<Option<Game>> {
    let sql = format!(
        "SELECT {} FROM games WHERE system_slug = ? AND screenscraper_id = ? ORDER BY id LIMIT 1",
        GAME_COLUMNS
    );
    Ok(sqlx::query_as::<_, Game>(&sql)
        .bind(system_slug)
        .bind(screenscraper_id)
        .fetch_optional(pool)
        .await?)
}

/// Hashes and identifiers used to recognise an existing game
#[derive(Debug, Clone, Default)]
pub struct GameMatch<'a> {
    pub name: &'a str,
    pub crc32: &'a str,
    pub sha1: &'a str,
    pub screenscraper_id: Option<i64>,
}

/// Find a game in the system by ROM crc32, then sha1, then screenscraper id,
/// then case-insensitive name
pub async fn find_existing_game(pool: &SqlitePool, system_slug: &str, m: &GameMatch<'_>) -> Result<Option<Game>> {
    if !m.crc32.is_empty() {
        if let Some(game) = find_game_by_rom_column(pool, system_slug, "crc32", m.crc32).await? {
            return Ok(Some(game));
        }
    }
    if !m.sha1.is_empty() {
        if let Some(game) = find_game_by_rom_column(pool, system_slug, "sha1", m.sha1).await? {
            return Ok(Some(game));
        }
    }
    if let Some(ss_id) = m.screenscraper_id {
        if let Some(game) = find_game_by_screenscraper_id(pool, system_slug, ss_id).await? {
            return Ok(Some(game));
        }
    }
    if m.name.is_empty() {
        return Ok(None);
    }
    find_game_by_name(pool, system_slug, m.name).await
}

pub async fn create_game(pool: &SqlitePool, name: &str, system_slug: &str, name_source: &str) -> Result<Game> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO games (name, system_slug, name_source, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(system_slug)
    .bind(name_source)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_game(pool, id)
        .await?
        .ok_or_else(|| romhoard_common::Error::Internal(format!("Game {} vanished after insert", id)))
}

pub async fn rename_game(pool: &SqlitePool, id: i64, name: &str, name_source: &str) -> Result<()> {
    sqlx::query("UPDATE games SET name = ?, name_source = ?, updated_at = ? WHERE id = ?")
        .bind(name)
        .bind(name_source)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Write the editable fields of a game back
pub async fn save_game(pool: &SqlitePool, game: &Game) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE games SET
            name = ?, name_source = ?, screenscraper_id = ?, description = ?,
            release_date = ?, developer = ?, publisher = ?, players = ?, rating = ?,
            rating_source = ?, metadata_updated_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&game.name)
    .bind(&game.name_source)
    .bind(game.screenscraper_id)
    .bind(&game.description)
    .bind(&game.release_date)
    .bind(&game.developer)
    .bind(&game.publisher)
    .bind(&game.players)
    .bind(game.rating)
    .bind(&game.rating_source)
    .bind(game.metadata_updated_at)
    .bind(Utc::now())
    .bind(game.id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_screenscraper_id(pool: &SqlitePool, id: i64, screenscraper_id: i64) -> Result<()> {
    sqlx::query("UPDATE games SET screenscraper_id = ?, updated_at = ? WHERE id = ?")
        .bind(screenscraper_id)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_default_rom_set(pool: &SqlitePool, game_id: i64, rom_set_id: Option<i64>) -> Result<()> {
    sqlx::query("UPDATE games SET default_rom_set_id = ? WHERE id = ?")
        .bind(rom_set_id)
        .bind(game_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_game(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM games WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_games_in_system(pool: &SqlitePool, system_slug: &str) -> Result<Vec<Game>> {
    let sql = format!("SELECT {} FROM games WHERE system_slug = ? ORDER BY id", GAME_COLUMNS);
    Ok(sqlx::query_as::<_, Game>(&sql).bind(system_slug).fetch_all(pool).await?)
}

pub async fn list_all_game_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar("SELECT id FROM games ORDER BY id")
        .fetch_all(pool)
        .await?)
}

/// Rating comparison for game queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingFilter {
    Gte(i64),
    Lte(i64),
    Eq(i64),
    Between(i64, i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameSort {
    #[default]
    Name,
    Rating,
    /// Global search order
    SystemThenName,
}

#[derive(Debug, Clone, Default)]
pub struct GameFilter {
    pub system: Option<String>,
    pub query: Option<String>,
    /// Also match the query against genre names
    pub match_genre_names: bool,
    /// Genre slugs; a parent slug also matches its children
    pub genres: Vec<String>,
    pub rating: Option<RatingFilter>,
    pub sort: GameSort,
    pub descending: bool,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GameListItem {
    pub id: i64,
    pub name: String,
    pub system_slug: String,
    pub system_name: String,
    pub name_source: String,
    pub rating: Option<i64>,
    pub release_date: Option<String>,
    pub rom_set_count: i64,
    pub image_count: i64,
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &GameFilter) {
    qb.push(" WHERE 1 = 1");

    if let Some(system) = &filter.system {
        qb.push(" AND g.system_slug = ").push_bind(system.clone());
    }

    if let Some(query) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", query.to_lowercase());
        qb.push(" AND (LOWER(g.name) LIKE ").push_bind(pattern.clone());
        if filter.match_genre_names {
            qb.push(
                " OR EXISTS (SELECT 1 FROM game_genres gg JOIN genres ge ON ge.id = gg.genre_id \
                 WHERE gg.game_id = g.id AND LOWER(ge.name) LIKE ",
            )
            .push_bind(pattern)
            .push(")");
        }
        qb.push(")");
    }

    if !filter.genres.is_empty() {
        qb.push(
            " AND EXISTS (SELECT 1 FROM game_genres gg JOIN genres ge ON ge.id = gg.genre_id \
             LEFT JOIN genres parent ON parent.id = ge.parent_id \
             WHERE gg.game_id = g.id AND (ge.slug IN (",
        );
        {
            let mut slugs = qb.separated(", ");
            for slug in &filter.genres {
                slugs.push_bind(slug.clone());
            }
        }
        qb.push(") OR parent.slug IN (");
        {
            let mut slugs = qb.separated(", ");
            for slug in &filter.genres {
                slugs.push_bind(slug.clone());
            }
        }
        qb.push(")))");
    }

    match filter.rating {
        Some(RatingFilter::Gte(v)) => {
            qb.push(" AND g.rating >= ").push_bind(v);
        }
        Some(RatingFilter::Lte(v)) => {
            qb.push(" AND g.rating <= ").push_bind(v);
        }
        Some(RatingFilter::Eq(v)) => {
            qb.push(" AND g.rating = ").push_bind(v);
        }
        Some(RatingFilter::Between(min, max)) => {
            qb.push(" AND g.rating BETWEEN ").push_bind(min).push(" AND ").push_bind(max);
        }
        None => {}
    }
}

/// Filtered, sorted page of games plus the total match count
pub async fn query_games(pool: &SqlitePool, filter: &GameFilter) -> Result<(Vec<GameListItem>, i64)> {
    let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM games g");
    push_filters(&mut count_qb, filter);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT g.id, g.name, g.system_slug, s.name AS system_name, g.name_source, g.rating,
               g.release_date,
               (SELECT COUNT(*) FROM rom_sets rs WHERE rs.game_id = g.id) AS rom_set_count,
               (SELECT COUNT(*) FROM game_images gi WHERE gi.game_id = g.id) AS image_count
        FROM games g
        JOIN systems s ON s.slug = g.system_slug
        "#,
    );
    push_filters(&mut qb, filter);

    let direction = if filter.descending { "DESC" } else { "ASC" };
    match filter.sort {
        GameSort::Name => {
            qb.push(format!(" ORDER BY LOWER(g.name) {}, g.id", direction));
        }
        GameSort::Rating => {
            qb.push(format!(
                " ORDER BY g.rating IS NULL, g.rating {}, LOWER(g.name), g.id",
                direction
            ));
        }
        GameSort::SystemThenName => {
            qb.push(" ORDER BY s.name, LOWER(g.name), g.id");
        }
    }

    qb.push(" LIMIT ").push_bind(filter.limit);
    qb.push(" OFFSET ").push_bind(filter.offset);

    let items = qb.build_query_as::<GameListItem>().fetch_all(pool).await?;
    Ok((items, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{add_rom, memory_pool_with_systems};

    #[tokio::test]
    async fn test_find_existing_game_priority() {
        let pool = memory_pool_with_systems().await;
        let by_hash = create_game(&pool, "Hashed", "gba", "filename").await.unwrap();
        add_rom(&pool, by_hash.id, "/r/hashed.gba", "abcd1234").await;
        let by_name = create_game(&pool, "Named Game", "gba", "filename").await.unwrap();

        let m = GameMatch { name: "named game", crc32: "ABCD1234", ..Default::default() };
        let found = find_existing_game(&pool, "gba", &m).await.unwrap().unwrap();
        assert_eq!(found.id, by_hash.id);

        let m = GameMatch { name: "NAMED GAME", crc32: "ffffffff", ..Default::default() };
        let found = find_existing_game(&pool, "gba", &m).await.unwrap().unwrap();
        assert_eq!(found.id, by_name.id);

        let m = GameMatch { name: "Named Game", ..Default::default() };
        assert!(find_existing_game(&pool, "gb", &m).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_game_by_rom_file_name() {
        let pool = memory_pool_with_systems().await;
        let game = create_game(&pool, "Tetris", "gba", "filename").await.unwrap();
        add_rom(&pool, game.id, "/r/gba/Tetris (USA).gba", "").await;

        let found = find_game_by_rom_file_name(&pool, "gba", "tetris (usa).GBA").await.unwrap().unwrap();
        assert_eq!(found.id, game.id);
        assert!(find_game_by_rom_file_name(&pool, "gb", "Tetris (USA).gba").await.unwrap().is_none());
        assert_eq!(
            find_any_game_by_rom_file_name(&pool, "Tetris (USA).gba").await.unwrap().map(|g| g.id),
            Some(game.id)
        );
        assert!(find_any_game_by_rom_file_name(&pool, "Other.gba").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_games_filters_and_paging() {
        let pool = memory_pool_with_systems().await;
        for (name, rating) in [("Alpha", Some(90)), ("Beta", Some(40)), ("Gamma", None)] {
            let mut game = create_game(&pool, name, "gba", "filename").await.unwrap();
            game.rating = rating;
            save_game(&pool, &game).await.unwrap();
        }
        create_game(&pool, "Alpha", "snes", "filename").await.unwrap();

        let filter = GameFilter {
            system: Some("gba".into()),
            limit: 2,
            ..Default::default()
        };
        let (items, total) = query_games(&pool, &filter).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(), vec!["Alpha", "Beta"]);

        let filter = GameFilter {
            system: Some("gba".into()),
            sort: GameSort::Rating,
            descending: false,
            limit: 10,
            ..Default::default()
        };
        let (items, _) = query_games(&pool, &filter).await.unwrap();
        assert_eq!(items.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(), vec!["Beta", "Alpha", "Gamma"]);

        let filter = GameFilter {
            rating: Some(RatingFilter::Gte(50)),
            limit: 10,
            ..Default::default()
        };
        let (items, total) = query_games(&pool, &filter).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].name, "Alpha");
        assert_eq!(items[0].system_name, "Game Boy Advance");

        let filter = GameFilter {
            query: Some("alp".into()),
            sort: GameSort::SystemThenName,
            limit: 10,
            ..Default::default()
        };
        let (items, _) = query_games(&pool, &filter).await.unwrap();
        assert_eq!(
            items.iter().map(|i| i.system_slug.as_str()).collect::<Vec<_>>(),
            vec!["gba", "snes"]
        );
    }
}
