//! Collection archives
//!
//! A zip holding `collection.json` (the export document), one
//! `games/<key>.json` per matched library game with its metadata, and
//! artwork under `images/<key>/<type><ext>`. `<key>` is the sanitized
//! `<name>_<system>` of the game.
//!
//! Importing never overwrites metadata or artwork a game already has.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::{ZipArchive, ZipWriter};

use super::archive::check_entry_path;
use super::collections::{
    export_collection, import_collection, matched_game, require_collection, validate_import_data, CollectionError,
    ImportError, ImportSummary,
};
use super::download::{sanitize_filename, zip_options};
use super::extensions::simple_suffix;
use super::genres::normalize_genres;
use super::upload::unique_destination;
use crate::db;
use crate::db::images::NewImage;
use crate::models::{image_type, Game};

pub const COLLECTION_JSON: &str = "collection.json";
pub const MAX_ARCHIVE_SIZE: u64 = 1 << 30;
pub const MAX_UNCOMPRESSED_SIZE: u64 = 2 << 30;
const MAX_JSON_SIZE: u64 = 64 << 20;
const SUSPICIOUS_RATIO: u64 = 100;
const ARCHIVE_IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg"];
const UNTYPED_IMAGE_NAME: &str = "image";
const IMPORTED_IMAGE_SOURCE: &str = "uploaded";

#[derive(Debug, Error)]
pub enum CollectionArchiveError {
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Database(#[from] romhoard_common::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

async fn blocking<T, F>(f: F) -> Result<T, CollectionArchiveError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CollectionArchiveError::Task(e.to_string()))
}

/// Archive key of a game: `<name>_<system>`, safe as a file name
pub fn game_key(name: &str, system_slug: &str) -> String {
    sanitize_filename(&format!("{}_{}", name, system_slug))
}

fn image_type_name(image_type: &str) -> &str {
    if image_type.is_empty() {
        UNTYPED_IMAGE_NAME
    } else {
        image_type
    }
}

fn image_type_from_name(name: &str) -> &'static str {
    image_type::ALL
        .iter()
        .copied()
        .find(|t| !t.is_empty() && *t == name)
        .unwrap_or(image_type::NONE)
}

async fn game_metadata(pool: &SqlitePool, game: &Game) -> Result<Value, CollectionArchiveError> {
    let genres: Vec<String> = db::genres::genres_for_game(pool, game.id)
        .await?
        .into_iter()
        .map(|g| g.name)
        .collect();
    Ok(json!({
        "name": game.name,
        "system_slug": game.system_slug,
        "description": game.description,
        "genres": genres,
        "release_date": game.release_date,
        "developer": game.developer,
        "publisher": game.publisher,
        "players": game.players,
        "rating": game.rating,
        "rating_source": game.rating_source,
        "screenscraper_id": game.screenscraper_id,
    }))
}

/// A written collection archive
#[derive(Debug)]
pub struct CollectionArchive {
    pub path: TempPath,
    pub filename: String,
    pub games: i64,
    pub images: i64,
    pub warnings: Vec<String>,
}

struct ArchiveGame {
    key: String,
    metadata: Value,
    /// (file on disk, name inside the archive)
    images: Vec<(PathBuf, String)>,
}

/// Zip a collection with the metadata and first image of each type of
/// every matched game
///
/// Artwork missing from disk is left out with a warning.
pub async fn export_collection_archive(pool: &SqlitePool, id: i64) -> Result<CollectionArchive, CollectionArchiveError> {
    let collection = require_collection(pool, id).await?;
    let document = export_collection(pool, id).await?;

    let mut games = Vec::new();
    let mut seen = BTreeSet::new();
    for entry in db::collections::list_entries(pool, id).await? {
        let Some(game) = matched_game(pool, &entry).await? else {
            continue;
        };
        let key = game_key(&game.name, &game.system_slug);
        if !seen.insert(key.clone()) {
            continue;
        }

        let mut images = Vec::new();
        let mut types = BTreeSet::new();
        for image in db::images::list_images_for_game(pool, game.id).await? {
            let extension = simple_suffix(&image.file_name);
            if !ARCHIVE_IMAGE_EXTENSIONS.contains(&extension.as_str()) || !types.insert(image.image_type.clone()) {
                continue;
            }
            let name = format!("images/{}/{}{}", key, image_type_name(&image.image_type), extension);
            images.push((PathBuf::from(&image.file_path), name));
        }

        games.push(ArchiveGame {
            metadata: game_metadata(pool, &game).await?,
            key,
            images,
        });
    }

    let filename = format!("{}.zip", collection.slug);
    let game_count = games.len() as i64;
    let (path, images, warnings) = blocking(move || -> Result<_, CollectionArchiveError> {
        let temp = tempfile::Builder::new()
            .prefix("romhoard-collection-")
            .suffix(".zip")
            .tempfile()?;
        let (file, path) = temp.into_parts();
        let mut zip = ZipWriter::new(file);

        zip.start_file(COLLECTION_JSON, zip_options())?;
        zip.write_all(&serde_json::to_vec_pretty(&document).map_err(romhoard_common::Error::from)?)?;

        let mut images: i64 = 0;
        let mut warnings = Vec::new();
        for game in &games {
            zip.start_file(format!("games/{}.json", game.key), zip_options())?;
            zip.write_all(&serde_json::to_vec_pretty(&game.metadata).map_err(romhoard_common::Error::from)?)?;

            for (source, name) in &game.images {
                match File::open(source) {
                    Ok(file) => {
                        zip.start_file(name.as_str(), zip_options())?;
                        std::io::copy(&mut BufReader::new(file), &mut zip)?;
                        images += 1;
                    }
                    Err(e) => warnings.push(format!("Image {} not included: {}", source.display(), e)),
                }
            }
        }
        zip.finish()?;
        Ok((path, images, warnings))
    })
    .await??;

    for warning in &warnings {
        warn!(collection_id = id, "{}", warning);
    }
    info!(collection_id = id, games = game_count, images, "Exported collection archive");
    Ok(CollectionArchive {
        path,
        filename,
        games: game_count,
        images,
        warnings,
    })
}

/// Result of checking an uploaded collection archive
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArchiveValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub has_collection_json: bool,
    /// Entries listed in `collection.json`
    pub game_count: i64,
    pub metadata_count: i64,
    pub image_count: i64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// An artwork entry inside an archive
#[derive(Debug, Clone, PartialEq)]
struct ArchiveImage {
    entry: String,
    key: String,
    image_type: &'static str,
    extension: String,
}

#[derive(Debug, Default)]
struct ArchiveContents {
    document: Option<Value>,
    metadata: HashMap<String, Value>,
    images: Vec<ArchiveImage>,
}

/// `games/<key>.json` to `<key>`
fn metadata_key(entry: &str) -> Option<&str> {
    let key = entry.strip_prefix("games/")?.strip_suffix(".json")?;
    (!key.is_empty() && !key.contains('/')).then_some(key)
}

/// `images/<key>/<file>` to `(<key>, <file>)`
fn image_parts(entry: &str) -> Option<(&str, &str)> {
    let (key, file) = entry.strip_prefix("images/")?.split_once('/')?;
    (!key.is_empty() && !file.is_empty() && !file.contains('/')).then_some((key, file))
}

fn read_json<R: Read>(reader: R, size: u64) -> Result<Value, String> {
    if size > MAX_JSON_SIZE {
        return Err(format!("{} bytes exceeds the {} byte limit", size, MAX_JSON_SIZE));
    }
    serde_json::from_reader(reader.take(MAX_JSON_SIZE)).map_err(|e| e.to_string())
}

fn read_archive(path: &Path) -> Result<(ArchiveValidation, ArchiveContents), CollectionArchiveError> {
    let mut report = ArchiveValidation {
        compressed_size: std::fs::metadata(path)?.len(),
        ..Default::default()
    };
    let mut contents = ArchiveContents::default();

    if report.compressed_size > MAX_ARCHIVE_SIZE {
        report.errors.push(format!(
            "Archive too large: {} bytes (max {} bytes)",
            report.compressed_size, MAX_ARCHIVE_SIZE
        ));
        return Ok((report, contents));
    }

    let mut archive = match ZipArchive::new(File::open(path)?) {
        Ok(archive) => archive,
        Err(e) => {
            report.errors.push(format!("Not a valid zip archive: {}", e));
            return Ok((report, contents));
        }
    };

    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name().replace('\\', "/");
        report.uncompressed_size += entry.size();

        if check_entry_path(&name).is_err() {
            report.errors.push(format!("Suspicious path in archive: {}", name));
            continue;
        }
        if entry.is_dir() {
            continue;
        }

        let size = entry.size();
        if name == COLLECTION_JSON {
            report.has_collection_json = true;
            match read_json(entry, size) {
                Ok(document) => contents.document = Some(document),
                Err(e) => report.errors.push(format!("Invalid collection data: {}", e)),
            }
        } else if let Some(key) = metadata_key(&name) {
            let key = key.to_string();
            match read_json(entry, size) {
                Ok(metadata) => {
                    report.metadata_count += 1;
                    contents.metadata.insert(key, metadata);
                }
                Err(e) => report.warnings.push(format!("Skipping unreadable metadata {}: {}", name, e)),
            }
        } else if let Some((key, file)) = image_parts(&name) {
            let extension = simple_suffix(file);
            if !ARCHIVE_IMAGE_EXTENSIONS.contains(&extension.as_str()) {
                report.errors.push(format!("Unsupported image type: {}", name));
                continue;
            }
            let stem = &file[..file.len() - extension.len()];
            report.image_count += 1;
            contents.images.push(ArchiveImage {
                key: key.to_string(),
                image_type: image_type_from_name(stem),
                extension,
                entry: name.clone(),
            });
        } else {
            debug!(entry = %name, "Ignoring unknown archive entry");
        }
    }

    if report.uncompressed_size > MAX_UNCOMPRESSED_SIZE {
        report.errors.push(format!(
            "Uncompressed size too large: {} bytes (max {} bytes)",
            report.uncompressed_size, MAX_UNCOMPRESSED_SIZE
        ));
    }
    if report.uncompressed_size > report.compressed_size.max(1) * SUSPICIOUS_RATIO {
        report.warnings.push(format!(
            "Unusually high compression ratio ({} bytes from {})",
            report.uncompressed_size, report.compressed_size
        ));
    }

    match &contents.document {
        Some(document) => match validate_import_data(document) {
            Ok(()) => {
                report.game_count = document["entries"].as_array().map_or(0, |e| e.len() as i64);
            }
            Err(e) => report.errors.push(format!("Invalid collection data: {}", e)),
        },
        None if !report.has_collection_json => {
            report.errors.push(format!("Missing required file: {}", COLLECTION_JSON));
        }
        None => {}
    }

    report.is_valid = report.errors.is_empty();
    Ok((report, contents))
}

/// Check an archive without importing anything
pub async fn validate_collection_archive(path: &Path) -> Result<ArchiveValidation, CollectionArchiveError> {
    let path = path.to_path_buf();
    let (report, _) = blocking(move || read_archive(&path)).await??;
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveImportSummary {
    #[serde(flatten)]
    pub collection: ImportSummary,
    pub metadata_applied: i64,
    pub images_imported: i64,
}

fn fill_text(field: &mut String, value: &Value) -> bool {
    match value.as_str().map(str::trim) {
        Some(text) if field.trim().is_empty() && !text.is_empty() => {
            *field = text.to_string();
            true
        }
        _ => false,
    }
}

/// Fill the game's empty fields from archive metadata; true when anything changed
async fn apply_metadata(pool: &SqlitePool, mut game: Game, metadata: &Value) -> Result<bool, CollectionArchiveError> {
    let mut changed = false;
    changed |= fill_text(&mut game.description, &metadata["description"]);
    changed |= fill_text(&mut game.developer, &metadata["developer"]);
    changed |= fill_text(&mut game.publisher, &metadata["publisher"]);
    changed |= fill_text(&mut game.players, &metadata["players"]);
    changed |= fill_text(&mut game.rating_source, &metadata["rating_source"]);

    if game.release_date.as_deref().map_or(true, |d| d.trim().is_empty()) {
        if let Some(date) = metadata["release_date"].as_str().filter(|d| !d.trim().is_empty()) {
            game.release_date = Some(date.trim().to_string());
            changed = true;
        }
    }
    if game.rating.is_none() {
        if let Some(rating) = metadata["rating"].as_i64().filter(|r| (0..=100).contains(r)) {
            game.rating = Some(rating);
            changed = true;
        }
    }
    if game.screenscraper_id.is_none() {
        if let Some(ss_id) = metadata["screenscraper_id"].as_i64() {
            game.screenscraper_id = Some(ss_id);
            changed = true;
        }
    }

    if changed {
        if game.metadata_updated_at.is_none() {
            game.metadata_updated_at = Some(Utc::now());
        }
        db::games::save_game(pool, &game).await?;
    }

    let genres: Vec<&str> = metadata["genres"]
        .as_array()
        .map(|g| g.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !genres.is_empty()
        && !normalize_genres(&genres).is_empty()
        && db::genres::genres_for_game(pool, game.id).await?.is_empty()
    {
        changed |= db::genres::add_game_genres(pool, game.id, &genres).await? > 0;
    }
    Ok(changed)
}

/// Import a collection archive: the collection document first, then
/// metadata and artwork for the library games it names
///
/// Artwork is copied to `images_dir/<system>/`.
pub async fn import_collection_archive(
    pool: &SqlitePool,
    path: &Path,
    images_dir: &Path,
    overwrite: bool,
    creator_override: Option<&str>,
) -> Result<ArchiveImportSummary, CollectionArchiveError> {
    let archive_path = path.to_path_buf();
    let (report, contents) = blocking(move || read_archive(&archive_path)).await??;
    if !report.is_valid {
        return Err(CollectionArchiveError::Invalid(report.errors.join("; ")));
    }
    let document = contents
        .document
        .ok_or_else(|| CollectionArchiveError::Invalid(format!("Missing required file: {}", COLLECTION_JSON)))?;

    let mut collection = import_collection(pool, &document, overwrite, creator_override).await?;
    collection.warnings.extend(report.warnings);

    let mut games: HashMap<String, Game> = HashMap::new();
    for entry in document["entries"].as_array().map(Vec::as_slice).unwrap_or_default() {
        let (Some(name), Some(system)) = (entry["game_name"].as_str(), entry["system_slug"].as_str()) else {
            continue;
        };
        if let Some(game) = db::games::find_game_by_name(pool, system, name).await? {
            games.insert(game_key(name, system), game);
        }
    }

    let mut metadata_applied = 0;
    for (key, metadata) in &contents.metadata {
        match games.get(key) {
            Some(game) => {
                if apply_metadata(pool, game.clone(), metadata).await? {
                    metadata_applied += 1;
                }
            }
            None => debug!(key = %key, "No library game for archive metadata"),
        }
    }

    let mut extractions = Vec::new();
    let mut claimed: HashMap<i64, BTreeSet<String>> = HashMap::new();
    for image in &contents.images {
        let Some(game) = games.get(&image.key) else {
            debug!(entry = %image.entry, "No library game for archive image");
            continue;
        };
        if !claimed.contains_key(&game.id) {
            let existing = db::images::list_images_for_game(pool, game.id)
                .await?
                .into_iter()
                .map(|i| i.image_type)
                .collect();
            claimed.insert(game.id, existing);
        }
        if !claimed.entry(game.id).or_default().insert(image.image_type.to_string()) {
            continue;
        }
        extractions.push((game.id, image.clone()));
    }

    let target_dir = images_dir.to_path_buf();
    let archive_path = path.to_path_buf();
    let names: Vec<(String, String)> = extractions
        .iter()
        .map(|(_, image)| {
            let game = &games[&image.key];
            let file_name = format!(
                "{}_{}{}",
                sanitize_filename(&game.name),
                image_type_name(image.image_type),
                image.extension
            );
            (game.system_slug.clone(), file_name)
        })
        .collect();
    let entries: Vec<String> = extractions.iter().map(|(_, image)| image.entry.clone()).collect();
    let written = blocking(move || -> Result<Vec<Option<(PathBuf, u64)>>, CollectionArchiveError> {
        let mut archive = ZipArchive::new(File::open(&archive_path)?)?;
        let mut written = Vec::with_capacity(entries.len());
        for (entry, (system, file_name)) in entries.iter().zip(&names) {
            let dir = target_dir.join(system);
            std::fs::create_dir_all(&dir)?;
            let dest = unique_destination(&dir, file_name);
            let mut source = archive.by_name(entry)?;
            let mut out = File::create(&dest)?;
            match std::io::copy(&mut source, &mut out) {
                Ok(size) => written.push(Some((dest, size))),
                Err(e) => {
                    warn!(entry = %entry, "Failed to extract image: {}", e);
                    drop(out);
                    let _ = std::fs::remove_file(&dest);
                    written.push(None);
                }
            }
        }
        Ok(written)
    })
    .await??;

    let mut images_imported = 0;
    for ((game_id, image), result) in extractions.iter().zip(written) {
        let Some((dest, size)) = result else {
            collection.warnings.push(format!("Could not extract {}", image.entry));
            continue;
        };
        let file_path = dest.to_string_lossy().into_owned();
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let inserted = db::images::insert_image(
            pool,
            &NewImage {
                game_id: *game_id,
                file_path: &file_path,
                file_name: &file_name,
                file_size: size as i64,
                image_type: image.image_type,
                source: IMPORTED_IMAGE_SOURCE,
            },
        )
        .await?;
        if inserted {
            images_imported += 1;
        }
    }

    info!(
        collection_id = collection.collection_id,
        metadata_applied,
        images_imported,
        "Imported collection archive"
    );
    Ok(ArchiveImportSummary {
        collection,
        metadata_applied,
        images_imported,
    })
}
