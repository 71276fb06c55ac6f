//! Game artwork persistence

use std::collections::HashSet;

use chrono::Utc;
use romhoard_common::Result;
use sqlx::SqlitePool;

use crate::models::GameImage;

const IMAGE_COLUMNS: &str = "id, game_id, file_path, file_name, file_size, image_type, source, created_at";

pub struct NewImage<'a> {
    pub game_id: i64,
    pub file_path: &'a str,
    pub file_name: &'a str,
    pub file_size: i64,
    pub image_type: &'a str,
    pub source: &'a str,
}

/// Insert an image; an already-known path is left untouched
///
/// Returns whether a row was added.
pub async fn insert_image(pool: &SqlitePool, image: &NewImage<'_>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO game_images (game_id, file_path, file_name, file_size, image_type, source, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(file_path) DO NOTHING
        "#,
    )
    .bind(image.game_id)
    .bind(image.file_path)
    .bind(image.file_name)
    .bind(image.file_size)
    .bind(image.image_type)
    .bind(image.source)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_image(pool: &SqlitePool, id: i64) -> Result<Option<GameImage>> {
    let sql = format!("SELECT {} FROM game_images WHERE id = ?", IMAGE_COLUMNS);
    Ok(sqlx::query_as::<_, GameImage>(&sql).bind(id).fetch_optional(pool).await?)
}

pub async fn list_images_for_game(pool: &SqlitePool, game_id: i64) -> Result<Vec<GameImage>> {
    let sql = format!(
        "SELECT {} FROM game_images WHERE game_id = ? ORDER BY image_type, id",
        IMAGE_COLUMNS
    );
    Ok(sqlx::query_as::<_, GameImage>(&sql).bind(game_id).fetch_all(pool).await?)
}

pub async fn count_images_for_game(pool: &SqlitePool, game_id: i64) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM game_images WHERE game_id = ?")
        .bind(game_id)
        .fetch_one(pool)
        .await?)
}

/// Every stored image path, for skipping known files during a scan
pub async fn all_image_paths(pool: &SqlitePool) -> Result<HashSet<String>> {
    let paths: Vec<String> = sqlx::query_scalar("SELECT file_path FROM game_images")
        .fetch_all(pool)
        .await?;
    Ok(paths.into_iter().collect())
}
