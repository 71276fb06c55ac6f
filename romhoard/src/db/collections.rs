//! Collection and collection entry persistence

use chrono::{DateTime, Utc};
use romhoard_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::models::{Collection, CollectionEntry};

const COLLECTION_COLUMNS: &str = "id, slug, name, description, creator, is_public, is_community, \
    is_favorites, tags, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, collection_id, game_name, system_slug, position, notes, added_at";

/// Row values for a new collection
#[derive(Debug, Clone)]
pub struct NewCollection<'a> {
    pub slug: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub creator: &'a str,
    pub is_public: bool,
    pub is_community: bool,
    pub is_favorites: bool,
    pub tags: &'a [String],
    pub created_at: Option<DateTime<Utc>>,
}

/// Collection with its entry count, for listings
#[derive(Debug, Clone, Serialize)]
pub struct CollectionSummary {
    #[serde(flatten)]
    pub collection: Collection,
    pub entry_count: i64,
}

pub async fn list_collections(pool: &SqlitePool) -> Result<Vec<CollectionSummary>> {
    let sql = format!(
        "SELECT {} FROM collections ORDER BY is_favorites DESC, LOWER(name), id",
        COLLECTION_COLUMNS
    );
    let collections = sqlx::query_as::<_, Collection>(&sql).fetch_all(pool).await?;

    let mut summaries = Vec::with_capacity(collections.len());
    for collection in collections {
        let entry_count = count_entries(pool, collection.id).await?;
        summaries.push(CollectionSummary { collection, entry_count });
    }
    Ok(summaries)
}

pub async fn get_collection(pool: &SqlitePool, id: i64) -> Result<Option<Collection>> {
    let sql = format!("SELECT {} FROM collections WHERE id = ?", COLLECTION_COLUMNS);
    Ok(sqlx::query_as::<_, Collection>(&sql).bind(id).fetch_optional(pool).await?)
}

pub async fn get_collection_by_slug(pool: &SqlitePool, creator: &str, slug: &str) -> Result<Option<Collection>> {
    let sql = format!(
        "SELECT {} FROM collections WHERE creator = ? AND slug = ?",
        COLLECTION_COLUMNS
    );
    Ok(sqlx::query_as::<_, Collection>(&sql)
        .bind(creator)
        .bind(slug)
        .fetch_optional(pool)
        .await?)
}

pub async fn get_favorites_collection(pool: &SqlitePool) -> Result<Option<Collection>> {
    let sql = format!("SELECT {} FROM collections WHERE is_favorites = 1", COLLECTION_COLUMNS);
    Ok(sqlx::query_as::<_, Collection>(&sql).fetch_optional(pool).await?)
}

pub async fn insert_collection(pool: &SqlitePool, new: &NewCollection<'_>) -> Result<Collection> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO collections (slug, name, description, creator, is_public, is_community,
                                 is_favorites, tags, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.slug)
    .bind(new.name)
    .bind(new.description)
    .bind(new.creator)
    .bind(new.is_public)
    .bind(new.is_community)
    .bind(new.is_favorites)
    .bind(serde_json::to_string(new.tags)?)
    .bind(new.created_at.unwrap_or(now))
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_collection(pool, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Collection {} vanished after insert", id)))
}

/// Write back the editable fields of a collection
pub async fn save_collection(pool: &SqlitePool, collection: &Collection) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE collections SET
            slug = ?, name = ?, description = ?, creator = ?, is_public = ?,
            is_community = ?, tags = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&collection.slug)
    .bind(&collection.name)
    .bind(&collection.description)
    .bind(&collection.creator)
    .bind(collection.is_public)
    .bind(collection.is_community)
    .bind(serde_json::to_string(&collection.tags)?)
    .bind(Utc::now())
    .bind(collection.id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn touch_collection(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE collections SET updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_collection(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM collections WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_entries(pool: &SqlitePool, collection_id: i64) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM collection_entries WHERE collection_id = ?")
        .bind(collection_id)
        .fetch_one(pool)
        .await?)
}

/// Entries in display order
pub async fn list_entries(pool: &SqlitePool, collection_id: i64) -> Result<Vec<CollectionEntry>> {
    let sql = format!(
        "SELECT {} FROM collection_entries WHERE collection_id = ? ORDER BY position, id",
        ENTRY_COLUMNS
    );
    Ok(sqlx::query_as::<_, CollectionEntry>(&sql)
        .bind(collection_id)
        .fetch_all(pool)
        .await?)
}

pub async fn get_entry(pool: &SqlitePool, collection_id: i64, entry_id: i64) -> Result<Option<CollectionEntry>> {
    let sql = format!(
        "SELECT {} FROM collection_entries WHERE collection_id = ? AND id = ?",
        ENTRY_COLUMNS
    );
    Ok(sqlx::query_as::<_, CollectionEntry>(&sql)
        .bind(collection_id)
        .bind(entry_id)
        .fetch_optional(pool)
        .await?)
}

/// Entry for a game in a collection, matching the name case-insensitively
pub async fn find_entry(
    pool: &SqlitePool,
    collection_id: i64,
    game_name: &str,
    system_slug: &str,
) -> Result<Option<CollectionEntry>> {
    let sql = format!(
        "SELECT {} FROM collection_entries \
         WHERE collection_id = ? AND LOWER(game_name) = LOWER(?) AND system_slug = ?",
        ENTRY_COLUMNS
    );
    Ok(sqlx::query_as::<_, CollectionEntry>(&sql)
        .bind(collection_id)
        .bind(game_name)
        .bind(system_slug)
        .fetch_optional(pool)
        .await?)
}

/// Position after the current last entry, 0 for an empty collection
pub async fn next_position(pool: &SqlitePool, collection_id: i64) -> Result<i64> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(position) FROM collection_entries WHERE collection_id = ?")
            .bind(collection_id)
            .fetch_one(pool)
            .await?;
    Ok(max.map(|p| p + 1).unwrap_or(0))
}

pub async fn insert_entry(
    pool: &SqlitePool,
    collection_id: i64,
    game_name: &str,
    system_slug: &str,
    position: i64,
    notes: &str,
) -> Result<CollectionEntry> {
    let id = sqlx::query(
        r#"
        INSERT INTO collection_entries (collection_id, game_name, system_slug, position, notes, added_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(collection_id)
    .bind(game_name)
    .bind(system_slug)
    .bind(position)
    .bind(notes)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_entry(pool, collection_id, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Collection entry {} vanished after insert", id)))
}

pub async fn delete_entry(pool: &SqlitePool, collection_id: i64, entry_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM collection_entries WHERE collection_id = ? AND id = ?")
        .bind(collection_id)
        .bind(entry_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_all_entries(pool: &SqlitePool, collection_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM collection_entries WHERE collection_id = ?")
        .bind(collection_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Rewrite positions so `entry_ids` come first in the given order
///
/// Entries not listed keep their relative order after the listed ones.
pub async fn reorder_entries(pool: &SqlitePool, collection_id: i64, entry_ids: &[i64]) -> Result<()> {
    let existing = list_entries(pool, collection_id).await?;
    let mut ordered: Vec<i64> = entry_ids
        .iter()
        .copied()
        .filter(|id| existing.iter().any(|e| e.id == *id))
        .collect();
    ordered.dedup();
    for entry in &existing {
        if !ordered.contains(&entry.id) {
            ordered.push(entry.id);
        }
    }

    let mut tx = pool.begin().await?;
    for (position, entry_id) in ordered.iter().enumerate() {
        sqlx::query("UPDATE collection_entries SET position = ? WHERE id = ? AND collection_id = ?")
            .bind(position as i64)
            .bind(entry_id)
            .bind(collection_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Collections holding an entry for the game
pub async fn collections_containing_game(
    pool: &SqlitePool,
    game_name: &str,
    system_slug: &str,
) -> Result<Vec<Collection>> {
    let columns: Vec<String> = COLLECTION_COLUMNS.split(", ").map(|c| format!("c.{}", c.trim())).collect();
    let sql = format!(
        r#"
        SELECT {} FROM collections c
        WHERE EXISTS (SELECT 1 FROM collection_entries e
                      WHERE e.collection_id = c.id AND LOWER(e.game_name) = LOWER(?) AND e.system_slug = ?)
        ORDER BY c.is_favorites DESC, LOWER(c.name)
        "#,
        columns.join(", ")
    );
    Ok(sqlx::query_as::<_, Collection>(&sql)
        .bind(game_name)
        .bind(system_slug)
        .fetch_all(pool)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_collection<'a>(slug: &'a str, tags: &'a [String]) -> NewCollection<'a> {
        NewCollection {
            slug,
            name: "Best Of",
            description: "",
            creator: "local",
            is_public: true,
            is_community: false,
            is_favorites: false,
            tags,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_entries_positions_and_reorder() {
        let pool = romhoard_common::db::init_memory_database().await.unwrap();
        let tags = vec!["rpg".to_string()];
        let collection = insert_collection(&pool, &new_collection("best-of", &tags)).await.unwrap();
        assert_eq!(collection.tags, tags);
        assert!(collection.is_public);

        assert_eq!(next_position(&pool, collection.id).await.unwrap(), 0);
        let a = insert_entry(&pool, collection.id, "Alpha", "gba", 0, "").await.unwrap();
        let b = insert_entry(&pool, collection.id, "Beta", "gba", 1, "").await.unwrap();
        let c = insert_entry(&pool, collection.id, "Gamma", "snes", 2, "note").await.unwrap();
        assert_eq!(next_position(&pool, collection.id).await.unwrap(), 3);

        reorder_entries(&pool, collection.id, &[c.id, a.id]).await.unwrap();
        let order: Vec<i64> = list_entries(&pool, collection.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(order, vec![c.id, a.id, b.id]);

        assert!(find_entry(&pool, collection.id, "alpha", "gba").await.unwrap().is_some());
        assert!(find_entry(&pool, collection.id, "alpha", "snes").await.unwrap().is_none());

        let holding = collections_containing_game(&pool, "GAMMA", "snes").await.unwrap();
        assert_eq!(holding.len(), 1);

        assert!(delete_entry(&pool, collection.id, b.id).await.unwrap());
        assert_eq!(count_entries(&pool, collection.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_creator_slug_unique_and_cascade() {
        let pool = romhoard_common::db::init_memory_database().await.unwrap();
        let collection = insert_collection(&pool, &new_collection("dupe", &[])).await.unwrap();
        assert!(insert_collection(&pool, &new_collection("dupe", &[])).await.is_err());

        insert_entry(&pool, collection.id, "Alpha", "gba", 0, "").await.unwrap();
        assert!(delete_collection(&pool, collection.id).await.unwrap());
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collection_entries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
