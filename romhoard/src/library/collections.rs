//! Collection management, favorites and JSON export/import

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};

use super::genres::slugify;
use crate::db;
use crate::db::collections::NewCollection;
use crate::db::games::GameMatch;
use crate::models::collection::{DEFAULT_CREATOR, FAVORITES_NAME, FAVORITES_SLUG, MAX_DESCRIPTION_LEN};
use crate::models::{name_source, Collection, CollectionEntry, CollectionInput, Game};

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] romhoard_common::Error),
}

impl From<sqlx::Error> for CollectionError {
    fn from(e: sqlx::Error) -> Self {
        CollectionError::Database(e.into())
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] romhoard_common::Error),
}

fn invalid(message: impl Into<String>) -> ImportError {
    ImportError::Invalid(message.into())
}

fn validate_input(input: &CollectionInput) -> Result<(String, String), CollectionError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(CollectionError::InvalidInput("Collection name is required".into()));
    }
    if input.description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(CollectionError::InvalidInput(format!(
            "Description must be at most {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    let slug = match input.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slugify(slug),
        None => slugify(name),
    };
    if slug.is_empty() {
        return Err(CollectionError::InvalidInput("Collection slug cannot be empty".into()));
    }
    Ok((name.to_string(), slug))
}

fn creator_of(input: &CollectionInput) -> String {
    input
        .creator
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CREATOR)
        .to_string()
}

fn slug_taken(creator: &str, slug: &str) -> CollectionError {
    CollectionError::Conflict(format!("Collection '{}/{}' already exists", creator, slug))
}

pub async fn create_collection(pool: &SqlitePool, input: &CollectionInput) -> Result<Collection, CollectionError> {
    let (name, slug) = validate_input(input)?;
    let creator = creator_of(input);
    if db::collections::get_collection_by_slug(pool, &creator, &slug).await?.is_some() {
        return Err(slug_taken(&creator, &slug));
    }

    let collection = db::collections::insert_collection(
        pool,
        &NewCollection {
            slug: &slug,
            name: &name,
            description: &input.description,
            creator: &creator,
            is_public: input.is_public,
            is_community: input.is_community,
            is_favorites: false,
            tags: &input.tags,
            created_at: None,
        },
    )
    .await?;
    info!(collection_id = collection.id, slug = %collection.slug, "Created collection");
    Ok(collection)
}

pub async fn update_collection(
    pool: &SqlitePool,
    id: i64,
    input: &CollectionInput,
) -> Result<Collection, CollectionError> {
    let mut collection = require_collection(pool, id).await?;
    let (name, slug) = validate_input(input)?;
    let creator = creator_of(input);

    if let Some(other) = db::collections::get_collection_by_slug(pool, &creator, &slug).await? {
        if other.id != id {
            return Err(slug_taken(&creator, &slug));
        }
    }

    // The favorites collection keeps its identity
    if !collection.is_favorites {
        collection.slug = slug;
        collection.creator = creator;
    }
    collection.name = name;
    collection.description = input.description.clone();
    collection.is_public = input.is_public;
    collection.is_community = input.is_community;
    collection.tags = input.tags.clone();
    db::collections::save_collection(pool, &collection).await?;

    require_collection(pool, id).await
}

pub async fn delete_collection(pool: &SqlitePool, id: i64) -> Result<(), CollectionError> {
    if !db::collections::delete_collection(pool, id).await? {
        return Err(CollectionError::NotFound(format!("Collection {} not found", id)));
    }
    info!(collection_id = id, "Deleted collection");
    Ok(())
}

pub async fn require_collection(pool: &SqlitePool, id: i64) -> Result<Collection, CollectionError> {
    db::collections::get_collection(pool, id)
        .await?
        .ok_or_else(|| CollectionError::NotFound(format!("Collection {} not found", id)))
}

/// Append an entry at the end of the collection
pub async fn add_entry(
    pool: &SqlitePool,
    collection_id: i64,
    game_name: &str,
    system_slug: &str,
    notes: &str,
) -> Result<CollectionEntry, CollectionError> {
    require_collection(pool, collection_id).await?;
    let game_name = game_name.trim();
    if game_name.is_empty() || system_slug.trim().is_empty() {
        return Err(CollectionError::InvalidInput(
            "game_name and system_slug are required".into(),
        ));
    }
    if db::collections::find_entry(pool, collection_id, game_name, system_slug)
        .await?
        .is_some()
    {
        return Err(CollectionError::Conflict(format!(
            "'{}' ({}) is already in this collection",
            game_name, system_slug
        )));
    }

    let position = db::collections::next_position(pool, collection_id).await?;
    let entry = db::collections::insert_entry(pool, collection_id, game_name, system_slug, position, notes).await?;
    db::collections::touch_collection(pool, collection_id).await?;
    debug!(collection_id, game = %game_name, position, "Added collection entry");
    Ok(entry)
}

pub async fn remove_entry(pool: &SqlitePool, collection_id: i64, entry_id: i64) -> Result<(), CollectionError> {
    require_collection(pool, collection_id).await?;
    if !db::collections::delete_entry(pool, collection_id, entry_id).await? {
        return Err(CollectionError::NotFound(format!("Entry {} not found", entry_id)));
    }
    db::collections::touch_collection(pool, collection_id).await?;
    Ok(())
}

pub async fn reorder_entries(
    pool: &SqlitePool,
    collection_id: i64,
    entry_ids: &[i64],
) -> Result<Vec<CollectionEntry>, CollectionError> {
    require_collection(pool, collection_id).await?;
    db::collections::reorder_entries(pool, collection_id, entry_ids).await?;
    db::collections::touch_collection(pool, collection_id).await?;
    Ok(db::collections::list_entries(pool, collection_id).await?)
}

/// The favorites collection, created on first use
pub async fn favorites_collection(pool: &SqlitePool) -> Result<Collection, CollectionError> {
    if let Some(existing) = db::collections::get_favorites_collection(pool).await? {
        return Ok(existing);
    }
    let collection = db::collections::insert_collection(
        pool,
        &NewCollection {
            slug: FAVORITES_SLUG,
            name: FAVORITES_NAME,
            description: "",
            creator: DEFAULT_CREATOR,
            is_public: false,
            is_community: false,
            is_favorites: true,
            tags: &[],
            created_at: None,
        },
    )
    .await?;
    info!(collection_id = collection.id, "Created favorites collection");
    Ok(collection)
}

pub async fn is_favorite(pool: &SqlitePool, game: &Game) -> Result<bool, CollectionError> {
    let Some(favorites) = db::collections::get_favorites_collection(pool).await? else {
        return Ok(false);
    };
    Ok(db::collections::find_entry(pool, favorites.id, &game.name, &game.system_slug)
        .await?
        .is_some())
}

/// Add or remove a game from favorites, returning whether it is now a favorite
pub async fn toggle_favorite(pool: &SqlitePool, game: &Game) -> Result<bool, CollectionError> {
    let favorites = favorites_collection(pool).await?;
    match db::collections::find_entry(pool, favorites.id, &game.name, &game.system_slug).await? {
        Some(entry) => {
            db::collections::delete_entry(pool, favorites.id, entry.id).await?;
            db::collections::touch_collection(pool, favorites.id).await?;
            Ok(false)
        }
        None => {
            add_entry(pool, favorites.id, &game.name, &game.system_slug, "").await?;
            Ok(true)
        }
    }
}

/// Library game an entry refers to, by case-insensitive name within the system
pub async fn matched_game(pool: &SqlitePool, entry: &CollectionEntry) -> Result<Option<Game>, CollectionError> {
    Ok(db::games::find_game_by_name(pool, &entry.system_slug, &entry.game_name).await?)
}

/// Portable JSON document for a collection
pub async fn export_collection(pool: &SqlitePool, id: i64) -> Result<Value, CollectionError> {
    let collection = require_collection(pool, id).await?;
    let entries = db::collections::list_entries(pool, id).await?;

    let mut exported = Vec::with_capacity(entries.len());
    for entry in &entries {
        let mut item = json!({
            "game_name": entry.game_name,
            "system_slug": entry.system_slug,
            "position": entry.position,
            "notes": entry.notes,
        });
        if let Some(ss_id) = matched_game(pool, entry).await?.and_then(|g| g.screenscraper_id) {
            item["screenscraper_id"] = json!(ss_id);
        }
        exported.push(item);
    }

    Ok(json!({
        "romhoard_collection": {
            "version": EXPORT_VERSION,
            "exported_at": Utc::now().to_rfc3339(),
        },
        "collection": {
            "slug": collection.slug,
            "name": collection.name,
            "description": collection.description,
            "creator": collection.creator,
            "is_public": collection.is_public,
            "is_community": collection.is_community,
            "tags": collection.tags,
            "created_at": collection.created_at.to_rfc3339(),
            "updated_at": collection.updated_at.to_rfc3339(),
        },
        "entries": exported,
    }))
}

/// Check the structure of an import document
pub fn validate_import_data(data: &Value) -> Result<(), ImportError> {
    let Some(root) = data.as_object() else {
        return Err(invalid("Invalid format: expected JSON object"));
    };

    let Some(header) = root.get("romhoard_collection") else {
        return Err(invalid("Invalid format: missing 'romhoard_collection' header"));
    };
    if !header.as_object().is_some_and(|h| h.contains_key("version")) {
        return Err(invalid("Invalid format: invalid header"));
    }

    let Some(collection) = root.get("collection") else {
        return Err(invalid("Invalid format: missing 'collection' data"));
    };
    for field in ["slug", "name"] {
        if collection.get(field).is_none() {
            return Err(invalid(format!("Invalid format: missing required field '{}'", field)));
        }
    }

    let Some(entries) = root.get("entries") else {
        return Err(invalid("Invalid format: missing 'entries' array"));
    };
    let Some(entries) = entries.as_array() else {
        return Err(invalid("Invalid format: 'entries' must be an array"));
    };
    for (i, entry) in entries.iter().enumerate() {
        let Some(entry) = entry.as_object() else {
            return Err(invalid(format!("Invalid format: entry {} is not an object", i)));
        };
        for field in ["game_name", "system_slug"] {
            match entry.get(field) {
                None => return Err(invalid(format!("Invalid format: entry {} missing '{}'", i, field))),
                Some(value) if value.as_str().map_or(true, |v| v.trim().is_empty()) => {
                    return Err(invalid(format!("Invalid format: entry {} has empty '{}'", i, field)));
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub collection_id: i64,
    pub entries_imported: i64,
    pub games_created: i64,
    pub warnings: Vec<String>,
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn bool_field(obj: &Map<String, Value>, key: &str, default: bool) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Ids arrive as numbers or numeric strings
fn screenscraper_id(entry: &Map<String, Value>) -> Option<i64> {
    match entry.get("screenscraper_id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

async fn fill_screenscraper_id(pool: &SqlitePool, game: &Game, ss_id: Option<i64>) -> Result<(), ImportError> {
    if let (Some(ss_id), None) = (ss_id, game.screenscraper_id) {
        db::games::set_screenscraper_id(pool, game.id, ss_id).await?;
    }
    Ok(())
}

/// Import a collection document
///
/// Entries whose game is missing from the library create placeholder games
/// when the system is known.
pub async fn import_collection(
    pool: &SqlitePool,
    data: &Value,
    overwrite: bool,
    creator_override: Option<&str>,
) -> Result<ImportSummary, ImportError> {
    validate_import_data(data)?;

    let empty = Map::new();
    let meta = data["collection"].as_object().unwrap_or(&empty);
    let slug = text(&data["collection"]["slug"]);
    let name = text(&data["collection"]["name"]);
    if slug.trim().is_empty() || name.trim().is_empty() {
        return Err(invalid("Invalid format: collection slug and name cannot be empty"));
    }

    let creator = creator_override
        .filter(|c| !c.is_empty())
        .or_else(|| str_field(meta, "creator").filter(|c| !c.is_empty()))
        .unwrap_or(DEFAULT_CREATOR)
        .to_string();
    let description: String = str_field(meta, "description")
        .unwrap_or_default()
        .chars()
        .take(MAX_DESCRIPTION_LEN)
        .collect();
    let tags: Vec<String> = meta
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();
    let is_public = bool_field(meta, "is_public", true);
    let is_community = bool_field(meta, "is_community", true);

    let collection_id = match db::collections::get_collection_by_slug(pool, &creator, &slug).await? {
        Some(_) if !overwrite => {
            return Err(ImportError::Conflict(format!(
                "Collection '{}/{}' already exists. Use overwrite=True to replace it.",
                creator, slug
            )));
        }
        Some(mut existing) => {
            db::collections::delete_all_entries(pool, existing.id).await?;
            existing.name = name.clone();
            existing.description = description.clone();
            existing.is_public = is_public;
            existing.is_community = is_community;
            existing.tags = tags.clone();
            db::collections::save_collection(pool, &existing).await?;
            existing.id
        }
        None => {
            let created_at = str_field(meta, "created_at")
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc));
            db::collections::insert_collection(
                pool,
                &NewCollection {
                    slug: &slug,
                    name: &name,
                    description: &description,
                    creator: &creator,
                    is_public,
                    is_community,
                    is_favorites: false,
                    tags: &tags,
                    created_at,
                },
            )
            .await?
            .id
        }
    };

    let mut entries_imported = 0;
    let mut games_created = 0;
    let mut unknown_systems = BTreeSet::new();

    for entry in data["entries"].as_array().map(Vec::as_slice).unwrap_or_default() {
        let Some(entry) = entry.as_object() else {
            continue;
        };
        let game_name = text(&entry["game_name"]);
        let system_slug = text(&entry["system_slug"]);
        if db::collections::find_entry(pool, collection_id, &game_name, &system_slug)
            .await?
            .is_some()
        {
            debug!(game = %game_name, "Skipping duplicate import entry");
            continue;
        }

        let position = entry.get("position").and_then(Value::as_i64).unwrap_or(entries_imported);
        let notes = entry.get("notes").map(text).unwrap_or_default();
        db::collections::insert_entry(pool, collection_id, &game_name, &system_slug, position, &notes).await?;
        entries_imported += 1;

        let ss_id = screenscraper_id(entry);
        if let Some(game) = db::games::find_game_by_name(pool, &system_slug, &game_name).await? {
            fill_screenscraper_id(pool, &game, ss_id).await?;
            continue;
        }
        if db::systems::get_system(pool, &system_slug).await?.is_none() {
            unknown_systems.insert(system_slug);
            continue;
        }

        let lookup = GameMatch {
            name: &game_name,
            crc32: "",
            sha1: "",
            screenscraper_id: ss_id,
        };
        match db::games::find_existing_game(pool, &system_slug, &lookup).await? {
            Some(game) => fill_screenscraper_id(pool, &game, ss_id).await?,
            None => {
                let game = db::games::create_game(pool, &game_name, &system_slug, name_source::COLLECTION).await?;
                if let Some(ss_id) = ss_id {
                    db::games::set_screenscraper_id(pool, game.id, ss_id).await?;
                }
                games_created += 1;
            }
        }
    }

    let mut warnings = Vec::new();
    if !unknown_systems.is_empty() {
        let systems: Vec<String> = unknown_systems.into_iter().collect();
        warnings.push(format!(
            "Could not create games for unknown systems: {}",
            systems.join(", ")
        ));
    }

    info!(
        collection_id,
        creator = %creator,
        slug = %slug,
        entries_imported,
        games_created,
        "Imported collection"
    );
    Ok(ImportSummary {
        collection_id,
        entries_imported,
        games_created,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool_with_systems;

    fn input(name: &str) -> CollectionInput {
        CollectionInput {
            name: name.into(),
            slug: None,
            description: String::new(),
            creator: None,
            is_public: true,
            is_community: false,
            tags: vec![],
        }
    }

    fn message(err: ImportError) -> String {
        err.to_string()
    }

    #[test]
    fn test_validate_import_data_messages() {
        let cases = [
            (json!([]), "Invalid format: expected JSON object"),
            (json!({}), "Invalid format: missing 'romhoard_collection' header"),
            (json!({"romhoard_collection": "1.0"}), "Invalid format: invalid header"),
            (json!({"romhoard_collection": {}}), "Invalid format: invalid header"),
            (json!({"romhoard_collection": {"version": "1.0"}}), "Invalid format: missing 'collection' data"),
            (
                json!({"romhoard_collection": {"version": "1.0"}, "collection": {"name": "x"}}),
                "Invalid format: missing required field 'slug'",
            ),
            (
                json!({"romhoard_collection": {"version": "1.0"}, "collection": {"slug": "x"}}),
                "Invalid format: missing required field 'name'",
            ),
            (
                json!({"romhoard_collection": {"version": "1.0"}, "collection": {"slug": "x", "name": "X"}}),
                "Invalid format: missing 'entries' array",
            ),
            (
                json!({"romhoard_collection": {"version": "1.0"}, "collection": {"slug": "x", "name": "X"}, "entries": {}}),
                "Invalid format: 'entries' must be an array",
            ),
            (
                json!({"romhoard_collection": {"version": "1.0"}, "collection": {"slug": "x", "name": "X"}, "entries": [1]}),
                "Invalid format: entry 0 is not an object",
            ),
            (
                json!({"romhoard_collection": {"version": "1.0"}, "collection": {"slug": "x", "name": "X"},
                       "entries": [{"game_name": "a", "system_slug": "gba"}, {"system_slug": "gba"}]}),
                "Invalid format: entry 1 missing 'game_name'",
            ),
            (
                json!({"romhoard_collection": {"version": "1.0"}, "collection": {"slug": "x", "name": "X"},
                       "entries": [{"game_name": "a"}]}),
                "Invalid format: entry 0 missing 'system_slug'",
            ),
            (
                json!({"romhoard_collection": {"version": "1.0"}, "collection": {"slug": "x", "name": "X"},
                       "entries": [{"game_name": "a", "system_slug": "gba"}, {"game_name": "  ", "system_slug": "gba"}]}),
                "Invalid format: entry 1 has empty 'game_name'",
            ),
            (
                json!({"romhoard_collection": {"version": "1.0"}, "collection": {"slug": "x", "name": "X"},
                       "entries": [{"game_name": "a", "system_slug": ""}]}),
                "Invalid format: entry 0 has empty 'system_slug'",
            ),
        ];
        for (data, expected) in cases {
            assert_eq!(message(validate_import_data(&data).unwrap_err()), expected);
        }
    }

    #[tokio::test]
    async fn test_entries_append_and_reject_duplicates() {
        let pool = memory_pool_with_systems().await;
        let collection = create_collection(&pool, &input("Best of GBA")).await.unwrap();
        assert_eq!(collection.slug, "best-of-gba");
        assert_eq!(collection.creator, "local");

        let first = add_entry(&pool, collection.id, "Golden Sun", "gba", "").await.unwrap();
        let second = add_entry(&pool, collection.id, "Advance Wars", "gba", "").await.unwrap();
        assert_eq!((first.position, second.position), (0, 1));

        let dup = add_entry(&pool, collection.id, "golden sun", "gba", "").await;
        assert!(matches!(dup, Err(CollectionError::Conflict(_))));

        let reordered = reorder_entries(&pool, collection.id, &[second.id, first.id]).await.unwrap();
        assert_eq!(reordered[0].game_name, "Advance Wars");
        assert_eq!(reordered[1].position, 1);

        let again = create_collection(&pool, &input("Best of GBA")).await;
        assert!(matches!(again, Err(CollectionError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_toggle_favorite() {
        let pool = memory_pool_with_systems().await;
        let game = db::games::create_game(&pool, "Tetris", "gb", "filename").await.unwrap();

        assert!(!is_favorite(&pool, &game).await.unwrap());
        assert!(toggle_favorite(&pool, &game).await.unwrap());
        assert!(is_favorite(&pool, &game).await.unwrap());

        let favorites = db::collections::get_favorites_collection(&pool).await.unwrap().unwrap();
        assert_eq!(favorites.slug, FAVORITES_SLUG);
        assert!(!toggle_favorite(&pool, &game).await.unwrap());
        assert_eq!(db::collections::count_entries(&pool, favorites.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_export_then_import_elsewhere() {
        let pool = memory_pool_with_systems().await;
        let game = db::games::create_game(&pool, "Golden Sun", "gba", "filename").await.unwrap();
        db::games::set_screenscraper_id(&pool, game.id, 4242).await.unwrap();

        let collection = create_collection(&pool, &input("RPGs")).await.unwrap();
        add_entry(&pool, collection.id, "Golden Sun", "gba", "classic").await.unwrap();
        add_entry(&pool, collection.id, "Chrono Trigger", "snes", "").await.unwrap();
        add_entry(&pool, collection.id, "Mystery", "nosuchsystem", "").await.unwrap();

        let exported = export_collection(&pool, collection.id).await.unwrap();
        assert_eq!(exported["romhoard_collection"]["version"], "1.0");
        assert_eq!(exported["entries"][0]["screenscraper_id"], 4242);
        assert!(exported["entries"][1].get("screenscraper_id").is_none());

        let conflict = import_collection(&pool, &exported, false, None).await.unwrap_err();
        assert_eq!(
            conflict.to_string(),
            "Collection 'local/rpgs' already exists. Use overwrite=True to replace it."
        );

        let summary = import_collection(&pool, &exported, false, Some("friend")).await.unwrap();
        assert_eq!(summary.entries_imported, 3);
        assert_eq!(summary.games_created, 1);
        assert_eq!(
            summary.warnings,
            vec!["Could not create games for unknown systems: nosuchsystem".to_string()]
        );

        let created = db::games::find_game_by_name(&pool, "snes", "Chrono Trigger").await.unwrap().unwrap();
        assert_eq!(created.name_source, name_source::COLLECTION);

        let imported = db::collections::get_collection(&pool, summary.collection_id).await.unwrap().unwrap();
        assert_eq!(imported.creator, "friend");

        let replaced = import_collection(&pool, &exported, true, None).await.unwrap();
        assert_eq!(replaced.collection_id, collection.id);
        assert_eq!(replaced.games_created, 0);
        assert_eq!(db::collections::count_entries(&pool, collection.id).await.unwrap(), 3);
    }
}
