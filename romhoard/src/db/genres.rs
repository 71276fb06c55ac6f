//! Genre persistence

use romhoard_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::library::genres::{normalize_genres, parent_name, slugify};
use crate::models::Genre;

pub async fn find_genre_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Genre>> {
    Ok(sqlx::query_as::<_, Genre>("SELECT id, name, slug, parent_id FROM genres WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?)
}

/// Get a genre by exact name, creating it and its ancestors as needed
///
/// `"Sports / Golf"` gets the parent `"Sports"`.
pub async fn get_or_create_genre(pool: &SqlitePool, name: &str) -> Result<Genre> {
    // Root first, so each level can point at the one above it
    let mut chain = vec![name];
    let mut current = name;
    while let Some(parent) = parent_name(current) {
        chain.push(parent);
        current = parent;
    }
    chain.reverse();

    let mut parent_id: Option<i64> = None;
    let mut genre: Option<Genre> = None;
    for level in chain {
        let found = match find_genre_by_name(pool, level).await? {
            Some(existing) => existing,
            None => {
                let id = sqlx::query("INSERT INTO genres (name, slug, parent_id) VALUES (?, ?, ?)")
                    .bind(level)
                    .bind(slugify(level))
                    .bind(parent_id)
                    .execute(pool)
                    .await?
                    .last_insert_rowid();
                Genre {
                    id,
                    name: level.to_string(),
                    slug: slugify(level),
                    parent_id,
                }
            }
        };
        parent_id = Some(found.id);
        genre = Some(found);
    }

    genre.ok_or_else(|| romhoard_common::Error::InvalidInput("Empty genre name".to_string()))
}

pub async fn genres_for_game(pool: &SqlitePool, game_id: i64) -> Result<Vec<Genre>> {
    Ok(sqlx::query_as::<_, Genre>(
        r#"
        SELECT ge.id, ge.name, ge.slug, ge.parent_id
        FROM genres ge JOIN game_genres gg ON gg.genre_id = ge.id
        WHERE gg.game_id = ?
        ORDER BY ge.name
        "#,
    )
    .bind(game_id)
    .fetch_all(pool)
    .await?)
}

/// Attach normalized genres to a game (existing links are kept)
pub async fn add_game_genres<S: AsRef<str>>(pool: &SqlitePool, game_id: i64, names: &[S]) -> Result<usize> {
    let mut added = 0;
    for name in normalize_genres(names) {
        let genre = get_or_create_genre(pool, &name).await?;
        let result = sqlx::query("INSERT OR IGNORE INTO game_genres (game_id, genre_id) VALUES (?, ?)")
            .bind(game_id)
            .bind(genre.id)
            .execute(pool)
            .await?;
        added += result.rows_affected() as usize;
    }
    Ok(added)
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GenreCount {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<i64>,
    pub game_count: i64,
}

/// Genres with at least one game, with their game counts
pub async fn list_genres_with_counts(pool: &SqlitePool) -> Result<Vec<GenreCount>> {
    Ok(sqlx::query_as::<_, GenreCount>(
        r#"
        SELECT ge.id, ge.name, ge.slug, ge.parent_id, COUNT(gg.game_id) AS game_count
        FROM genres ge JOIN game_genres gg ON gg.genre_id = ge.id
        GROUP BY ge.id
        ORDER BY ge.name
        "#,
    )
    .fetch_all(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool_with_systems;

    #[tokio::test]
    async fn test_hierarchical_genres_create_parents_once() {
        let pool = memory_pool_with_systems().await;
        let golf = get_or_create_genre(&pool, "Sports / Golf").await.unwrap();
        let tennis = get_or_create_genre(&pool, "Sports / Tennis").await.unwrap();
        let sports = find_genre_by_name(&pool, "Sports").await.unwrap().unwrap();

        assert_eq!(golf.parent_id, Some(sports.id));
        assert_eq!(tennis.parent_id, Some(sports.id));
        assert_eq!(golf.slug, "sports-golf");
        assert_eq!(sports.parent_id, None);

        let again = get_or_create_genre(&pool, "Sports / Golf").await.unwrap();
        assert_eq!(again.id, golf.id);
    }

    #[tokio::test]
    async fn test_add_game_genres_normalizes() {
        let pool = memory_pool_with_systems().await;
        let game = crate::db::games::create_game(&pool, "Bass", "snes", "filename").await.unwrap();

        let added = add_game_genres(&pool, game.id, &["Fishing", "Hunting", "Sports"]).await.unwrap();
        assert_eq!(added, 2);

        let names: Vec<String> = genres_for_game(&pool, game.id)
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["Hunting and Fishing", "Sports"]);

        let counts = list_genres_with_counts(&pool).await.unwrap();
        assert_eq!(counts.len(), 2);
        assert!(counts.iter().all(|c| c.game_count == 1));
    }
}
