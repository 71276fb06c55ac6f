//! ROM directory scanner
//!
//! Walks a directory tree, detects the system of every file, groups ROMs
//! into games and ROM sets, matches artwork to games, and removes ROMs that
//! disappeared from disk. Hash identification is deferred: the scan returns
//! the ids of the ROMs it added.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::archive::{self, ArchiveInfo};
use super::chd::{extract_chd_sha1, is_chd_file};
use super::extensions::{
    basename, build_exclusive_map, full_extension, is_acceptable_extension, is_archive_extension,
    is_compound_rom_extension, is_image_extension, is_non_rom_extension, simple_suffix,
};
use super::parser::{parse_rom_filename, stem_and_extension, switch_content_info};
use super::romset_scoring::recalculate_default_romset;
use crate::db;
use crate::db::games::GameMatch;
use crate::db::images::NewImage;
use crate::models::{image_type, name_source, Game, NewRom, RomSet, System};

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Scanner errors that abort the scan
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan cancelled")]
    Cancelled,

    #[error(transparent)]
    Database(#[from] romhoard_common::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Live scan counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub files_processed: i64,
    pub roms_found: i64,
    pub images_found: i64,
    pub current_directory: String,
}

/// Receives progress while a scan runs
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: &ScanProgress);
}

/// Sink that drops every report
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _progress: &ScanProgress) {}
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Report every N files (and always on the first)
    pub progress_interval: i64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { progress_interval: 10 }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub added: i64,
    pub skipped: i64,
    pub deleted_roms: i64,
    pub deleted_rom_sets: i64,
    pub deleted_games: i64,
    pub images_added: i64,
    pub images_skipped: i64,
    /// ROMs awaiting hash identification
    pub added_rom_ids: Vec<i64>,
    pub errors: Vec<String>,
}

/// Absolute, lexically normalized form of a scan path
pub fn normalize_scan_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// BIOS dumps: name starts with "bios", or any path component is "bios"
pub fn is_bios_file(file_name: &str, file_path: &Path) -> bool {
    if file_name.to_lowercase().starts_with("bios") {
        return true;
    }
    file_path
        .components()
        .any(|c| matches!(c, Component::Normal(part) if part.to_string_lossy().eq_ignore_ascii_case("bios")))
}

/// Image category from path keywords
pub fn detect_image_type(file_path: &str) -> &'static str {
    let lower = file_path.to_lowercase();
    if lower.contains("mix") {
        return image_type::MIX;
    }

    let has_cover = lower.contains("box") || lower.contains("cover");
    let has_screenshot = lower.contains("screenshot");
    match (has_cover, has_screenshot) {
        (true, true) => image_type::MIX,
        (true, false) => image_type::COVER,
        (false, true) => image_type::SCREENSHOT,
        (false, false) => image_type::NONE,
    }
}

/// First system whose folder names match a directory component of the path
pub fn match_by_folder<'a>(path: &Path, systems: &'a [System]) -> Option<&'a System> {
    let parts: Vec<String> = path
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().to_lowercase()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    systems.iter().find(|system| {
        system
            .folder_names
            .iter()
            .any(|folder| parts.contains(&folder.to_lowercase()))
    })
}

fn system_by_slug<'a>(systems: &'a [System], slug: &str) -> Option<&'a System> {
    systems.iter().find(|s| s.slug == slug)
}

/// System of a file on disk: exclusive extension, else folder match with an
/// acceptable extension
pub fn detect_system<'a>(
    path: &Path,
    systems: &'a [System],
    exclusive: &HashMap<String, String>,
) -> Option<&'a System> {
    let file_name = path.file_name()?.to_string_lossy();
    let extension = full_extension(&file_name);
    if extension.is_empty() {
        return None;
    }

    if let Some(slug) = exclusive.get(&extension) {
        return system_by_slug(systems, slug);
    }

    let system = match_by_folder(path, systems)?;
    if is_acceptable_extension(&extension, system) {
        return Some(system);
    }
    if !is_non_rom_extension(&extension) {
        debug!(
            path = %path.display(),
            extension = %extension,
            system = %system.slug,
            "Skipped unknown extension in system folder"
        );
    }
    None
}

/// System of a file inside an archive: exclusive extension, then the
/// internal folders, then the archive's own folders
pub fn detect_system_for_archived_file<'a>(
    archive_path: &Path,
    internal_path: &str,
    systems: &'a [System],
    exclusive: &HashMap<String, String>,
) -> Option<&'a System> {
    let extension = full_extension(basename(internal_path));
    if extension.is_empty() || is_non_rom_extension(&extension) {
        return None;
    }

    if let Some(slug) = exclusive.get(&extension) {
        return system_by_slug(systems, slug);
    }

    if let Some(system) = match_by_folder(Path::new(internal_path), systems) {
        return is_acceptable_extension(&extension, system).then_some(system);
    }

    let system = match_by_folder(archive_path, systems)?;
    is_acceptable_extension(&extension, system).then_some(system)
}

/// Lowercase, punctuation removed, whitespace collapsed
pub fn normalize_name_for_matching(name: &str) -> String {
    let lowered = name.to_lowercase().replace('_', " ");
    let stripped = PUNCTUATION.replace_all(&lowered, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

fn at_word_boundary(remainder: &str) -> bool {
    remainder.is_empty() || remainder.starts_with(' ')
}

/// Game an image belongs to
///
/// Exact normalized match wins. Otherwise one name must be a word-boundary
/// prefix of the other; the match covering most of the longer name wins.
pub fn match_image_to_game<'a>(image_name: &str, games: &'a [Game]) -> Option<&'a Game> {
    let image = normalize_name_for_matching(image_name);
    if image.is_empty() {
        return None;
    }

    let normalized: Vec<(&Game, String)> = games
        .iter()
        .map(|g| (g, normalize_name_for_matching(&g.name)))
        .collect();

    if let Some((game, _)) = normalized.iter().find(|(_, name)| *name == image) {
        return Some(game);
    }

    let image_len = image.chars().count() as f64;
    let mut best: Option<(&Game, f64)> = None;
    for (game, name) in &normalized {
        let name_len = name.chars().count() as f64;
        let score = if name.starts_with(image.as_str()) {
            at_word_boundary(&name[image.len()..]).then(|| image_len / name_len)
        } else if !name.is_empty() && image.starts_with(name.as_str()) {
            at_word_boundary(&image[name.len()..]).then(|| name_len / image_len)
        } else {
            None
        };

        if let Some(score) = score {
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((game, score));
            }
        }
    }
    best.map(|(game, _)| game)
}

/// ROM set grouping key
///
/// Archived ROMs group by archive plus their folder inside it; loose files
/// by parent directory.
pub fn get_source_path(file_path: &str, archive_path: &str, path_in_archive: &str) -> String {
    if !archive_path.is_empty() {
        let parent = Path::new(path_in_archive)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !parent.is_empty() {
            return format!("{}/{}", archive_path, parent);
        }
        return archive_path.to_string();
    }
    Path::new(file_path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// An archive is expanded into one ROM per entry when its entries parse to
/// more than one game name
pub fn should_expand_archive(entries: &[ArchiveInfo]) -> bool {
    if entries.len() <= 1 {
        return false;
    }
    let names: HashSet<String> = entries
        .iter()
        .map(|e| parse_rom_filename(basename(&e.name)).name.trim().to_lowercase())
        .collect();
    names.len() > 1
}

/// Find the game by hash or name, creating it if needed, then get or create
/// the ROM set for (region, revision, source path)
pub async fn get_or_create_rom_set(
    pool: &SqlitePool,
    name: &str,
    system_slug: &str,
    region: &str,
    revision: &str,
    source_path: &str,
    crc32: &str,
    sha1: &str,
) -> romhoard_common::Result<RomSet> {
    let matcher = GameMatch {
        name,
        crc32,
        sha1,
        screenscraper_id: None,
    };

    let game = match db::games::find_existing_game(pool, system_slug, &matcher).await? {
        Some(game) => game,
        None => match db::games::create_game(pool, name, system_slug, name_source::FILENAME).await {
            Ok(game) => {
                debug!(game_id = game.id, name = %game.name, system = system_slug, "Created game");
                game
            }
            Err(err) => match db::games::find_game_by_name(pool, system_slug, name).await? {
                Some(game) => game,
                None => return Err(err),
            },
        },
    };

    db::rom_sets::get_or_create_rom_set(pool, game.id, region, revision, source_path).await
}

fn switch_info(system: &System, file_name: &str) -> (String, String) {
    if system.slug == "switch" {
        switch_content_info(file_name)
    } else {
        (String::new(), String::new())
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ScanError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ScanError::Task(e.to_string()))
}

/// Record a file on disk as a ROM of `system`, then refresh the game's
/// default set
///
/// CHDs are identified by their header SHA1, everything else by CRC32.
pub async fn insert_loose_rom(
    pool: &SqlitePool,
    path: &Path,
    system: &System,
    file_size: i64,
    source_path: &str,
) -> Result<i64, ScanError> {
    let path_str = path.to_string_lossy().into_owned();
    let file_name = basename(&path_str).to_string();
    let parsed = parse_rom_filename(&file_name);

    // A CHD's container CRC is useless for lookup; its header SHA1 is not
    let owned = path.to_path_buf();
    let (crc32, sha1) = if is_chd_file(&file_name) {
        match blocking(move || extract_chd_sha1(&owned)).await? {
            Ok(sha1) => (String::new(), sha1.unwrap_or_default()),
            Err(e) => {
                warn!(path = %path_str, "Cannot read CHD header: {}", e);
                (String::new(), String::new())
            }
        }
    } else {
        match blocking(move || archive::compute_file_crc32(&owned)).await? {
            Ok(crc) => (crc, String::new()),
            Err(e) => {
                warn!(path = %path_str, "Cannot hash file: {}", e);
                (String::new(), String::new())
            }
        }
    };

    let rom_set = get_or_create_rom_set(
        pool,
        &parsed.name,
        &system.slug,
        &parsed.region,
        &parsed.revision,
        source_path,
        &crc32,
        &sha1,
    )
    .await?;

    let (switch_title_id, content_type) = switch_info(system, &file_name);
    let rom_id = db::roms::insert_rom(
        pool,
        &NewRom {
            rom_set_id: rom_set.id,
            file_path: path_str,
            file_name: file_name.clone(),
            file_size,
            crc32,
            sha1,
            tags: parsed.tags,
            rom_number: parsed.rom_number,
            disc: parsed.disc,
            content_type,
            switch_title_id,
            ..Default::default()
        },
    )
    .await?;
    recalculate_default_romset(pool, rom_set.game_id).await?;

    debug!(
        rom_id,
        file = %file_name,
        system = %system.slug,
        region = %rom_set.region,
        "Added ROM"
    );
    Ok(rom_id)
}

/// Record one archive entry as a ROM of `system`
///
/// With `display_archive_name` the ROM is listed under the archive's file
/// name, for archives holding a single game.
pub async fn insert_archived_rom(
    pool: &SqlitePool,
    archive_path: &Path,
    info: &ArchiveInfo,
    system: &System,
    display_archive_name: bool,
) -> Result<i64, ScanError> {
    let archive_str = archive_path.to_string_lossy().into_owned();
    let composite_path = format!("{}!{}", archive_str, info.name);
    let internal_name = basename(&info.name).to_string();
    let parsed = parse_rom_filename(&internal_name);
    let display_name = if display_archive_name {
        basename(&archive_str).to_string()
    } else {
        internal_name.clone()
    };

    let crc32 = if info.crc32.is_empty() {
        let owned = archive_path.to_path_buf();
        let entry = info.name.clone();
        blocking(move || archive::compute_archived_file_crc32(&owned, &entry))
            .await?
            .unwrap_or_else(|e| {
                debug!(path = %composite_path, "Cannot hash archive entry: {}", e);
                String::new()
            })
    } else {
        info.crc32.clone()
    };

    let rom_set = get_or_create_rom_set(
        pool,
        &parsed.name,
        &system.slug,
        &parsed.region,
        &parsed.revision,
        &get_source_path("", &archive_str, &info.name),
        &crc32,
        "",
    )
    .await?;

    let (switch_title_id, content_type) = switch_info(system, &internal_name);
    let rom_id = db::roms::insert_rom(
        pool,
        &NewRom {
            rom_set_id: rom_set.id,
            file_path: composite_path,
            file_name: display_name,
            file_size: info.size as i64,
            archive_path: archive_str,
            path_in_archive: info.name.clone(),
            crc32,
            tags: parsed.tags,
            rom_number: parsed.rom_number,
            disc: parsed.disc,
            content_type,
            switch_title_id,
            ..Default::default()
        },
    )
    .await?;
    recalculate_default_romset(pool, rom_set.game_id).await?;
    Ok(rom_id)
}

fn collect_files(base: &Path) -> (Vec<PathBuf>, Vec<String>) {
    let mut files = Vec::new();
    let mut errors = Vec::new();
    for entry in WalkDir::new(base).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => {
                warn!("Cannot read directory entry: {}", e);
                errors.push(format!("Cannot read directory entry: {}", e));
            }
        }
    }
    (files, errors)
}

struct Scanner<'a> {
    pool: &'a SqlitePool,
    options: &'a ScanOptions,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
    systems: Vec<System>,
    exclusive: HashMap<String, String>,
    state: ScanProgress,
    seen_paths: HashSet<String>,
    /// (image path, system slug)
    images: Vec<(PathBuf, String)>,
    result: ScanResult,
}

impl<'a> Scanner<'a> {
    async fn report(&self) -> Result<(), ScanError> {
        self.progress.report(&self.state).await;
        if self.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        Ok(())
    }

    async fn walk(&mut self, files: Vec<PathBuf>) -> Result<(), ScanError> {
        for path in files {
            self.state.current_directory = path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.state.files_processed += 1;

            if self.state.files_processed == 1
                || self.state.files_processed % self.options.progress_interval.max(1) == 0
            {
                self.state.roms_found = self.result.added;
                self.state.images_found = self.images.len() as i64;
                self.report().await?;
            }

            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let extension = simple_suffix(&file_name);
            if extension.is_empty() {
                continue;
            }

            if is_bios_file(&file_name, &path) {
                debug!(path = %path.display(), "Skipped BIOS file");
                continue;
            }

            if !is_compound_rom_extension(&file_name) && is_image_extension(&extension) {
                if let Some(system) = match_by_folder(&path, &self.systems) {
                    let slug = system.slug.clone();
                    self.images.push((path.clone(), slug));
                }
                continue;
            }

            if is_archive_extension(&extension) {
                self.state.roms_found = self.result.added;
                self.state.images_found = self.images.len() as i64;
                self.process_archive(&path).await?;
                continue;
            }

            let Some(system) = detect_system(&path, &self.systems, &self.exclusive).cloned() else {
                continue;
            };
            self.add_loose_rom(&path, &system).await?;
        }
        Ok(())
    }

    async fn add_loose_rom(&mut self, path: &Path, system: &System) -> Result<(), ScanError> {
        let path_str = path.to_string_lossy().into_owned();
        self.seen_paths.insert(path_str.clone());

        if db::roms::rom_exists_by_path(self.pool, &path_str).await? {
            self.result.skipped += 1;
            return Ok(());
        }

        let file_size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len() as i64,
            Err(e) => {
                error!(path = %path_str, "Cannot read file size: {}", e);
                self.result
                    .errors
                    .push(format!("Cannot read file size for {}: {}", path_str, e));
                return Ok(());
            }
        };

        let source_path = get_source_path(&path_str, "", "");
        let rom_id = insert_loose_rom(self.pool, path, system, file_size, &source_path).await?;
        self.result.added += 1;
        self.result.added_rom_ids.push(rom_id);
        Ok(())
    }

    async fn process_archive(&mut self, path: &Path) -> Result<(), ScanError> {
        if let Some(system) = detect_system(path, &self.systems, &self.exclusive)
            .filter(|s| s.archive_as_rom)
            .cloned()
        {
            return self.add_archive_as_rom(path, &system).await;
        }

        let owned = path.to_path_buf();
        let contents = match blocking(move || archive::list_archive_contents(&owned)).await? {
            Ok(contents) => contents,
            Err(e) => {
                error!(path = %path.display(), "Failed to read archive: {}", e);
                self.result
                    .errors
                    .push(format!("Failed to read archive {}: {}", path.display(), e));
                return Ok(());
            }
        };

        let entries: Vec<(ArchiveInfo, System)> = contents
            .into_iter()
            .filter(|info| !archive::is_nested_archive(&info.name))
            .filter_map(|info| {
                detect_system_for_archived_file(path, &info.name, &self.systems, &self.exclusive)
                    .cloned()
                    .map(|system| (info, system))
            })
            .collect();

        if entries.is_empty() {
            return Ok(());
        }

        let infos: Vec<ArchiveInfo> = entries.iter().map(|(info, _)| info.clone()).collect();
        if should_expand_archive(&infos) {
            for (info, system) in &entries {
                self.state.files_processed += 1;
                self.report().await?;
                let added = self.add_archived_rom(path, info, system, false).await?;
                self.state.roms_found += added;
            }
        } else {
            // Every entry counts as processed; one ROM represents the archive
            for _ in &entries {
                self.state.files_processed += 1;
                self.report().await?;
            }
            let (info, system) = &entries[0];
            let added = self.add_archived_rom(path, info, system, true).await?;
            self.state.roms_found += added;
        }
        Ok(())
    }

    /// Returns 1 when a ROM was added
    async fn add_archived_rom(
        &mut self,
        archive_path: &Path,
        info: &ArchiveInfo,
        system: &System,
        display_archive_name: bool,
    ) -> Result<i64, ScanError> {
        let archive_str = archive_path.to_string_lossy().into_owned();
        self.seen_paths.insert(format!("{}!{}", archive_str, info.name));

        if db::roms::archived_entry_exists(self.pool, &archive_str, &info.name).await? {
            self.result.skipped += 1;
            return Ok(0);
        }

        let rom_id = insert_archived_rom(self.pool, archive_path, info, system, display_archive_name).await?;
        self.result.added += 1;
        self.result.added_rom_ids.push(rom_id);
        Ok(1)
    }

    /// MAME-style sets: the archive file is the ROM
    async fn add_archive_as_rom(&mut self, path: &Path, system: &System) -> Result<(), ScanError> {
        let path_str = path.to_string_lossy().into_owned();
        self.seen_paths.insert(path_str.clone());

        if db::roms::rom_exists_by_path(self.pool, &path_str).await? {
            self.result.skipped += 1;
            return Ok(());
        }

        let file_size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len() as i64,
            Err(e) => {
                self.result
                    .errors
                    .push(format!("Cannot read size: {}: {}", path_str, e));
                return Ok(());
            }
        };

        let rom_id = insert_loose_rom(self.pool, path, system, file_size, &path_str).await?;
        self.result.added += 1;
        self.result.added_rom_ids.push(rom_id);
        Ok(())
    }

    async fn process_images(&mut self) -> Result<(), ScanError> {
        let known = db::images::all_image_paths(self.pool).await?;
        let mut games_by_system: HashMap<String, Vec<Game>> = HashMap::new();

        for (path, system_slug) in std::mem::take(&mut self.images) {
            let path_str = path.to_string_lossy().into_owned();
            if known.contains(&path_str) {
                self.result.images_skipped += 1;
                continue;
            }

            if !games_by_system.contains_key(&system_slug) {
                let games = db::games::list_games_in_system(self.pool, &system_slug).await?;
                games_by_system.insert(system_slug.clone(), games);
            }
            let games = games_by_system.get(&system_slug).map(Vec::as_slice).unwrap_or(&[]);

            let file_name = basename(&path_str).to_string();
            let (stem, _) = stem_and_extension(&file_name);
            let Some(game_id) = match_image_to_game(&stem, games).map(|g| g.id) else {
                self.result.images_skipped += 1;
                continue;
            };

            let file_size = tokio::fs::metadata(&path)
                .await
                .map(|m| m.len() as i64)
                .unwrap_or(0);
            let inserted = db::images::insert_image(
                self.pool,
                &NewImage {
                    game_id,
                    file_path: &path_str,
                    file_name: &file_name,
                    file_size,
                    image_type: detect_image_type(&path_str),
                    source: "scanned",
                },
            )
            .await?;

            if inserted {
                self.result.images_added += 1;
            } else {
                self.result.images_skipped += 1;
            }
        }
        Ok(())
    }

    /// Delete ROMs under the base path whose file (or archive) is gone
    async fn remove_missing(&mut self, base_path: &str) -> Result<(), ScanError> {
        let mut touched_sets = Vec::new();

        for rom in db::roms::list_roms_under_directory(self.pool, base_path).await? {
            let check_path = rom.check_path().to_string();
            if self.seen_paths.contains(&rom.file_path) || self.seen_paths.contains(&check_path) {
                continue;
            }
            // Unreadable paths are kept
            if tokio::fs::try_exists(&check_path).await.unwrap_or(true) {
                continue;
            }

            db::roms::delete_rom(self.pool, rom.id).await?;
            debug!(rom_id = rom.id, path = %rom.file_path, "Deleted missing ROM");
            self.result.deleted_roms += 1;
            if !touched_sets.contains(&rom.rom_set_id) {
                touched_sets.push(rom.rom_set_id);
            }
        }

        let cleanup = remove_orphans(self.pool, &touched_sets).await?;
        self.result.deleted_rom_sets += cleanup.deleted_rom_sets;
        self.result.deleted_games += cleanup.deleted_games;
        Ok(())
    }
}

/// Scan a directory tree into the library
pub async fn scan_directory(
    pool: &SqlitePool,
    base_path: &Path,
    options: &ScanOptions,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<ScanResult, ScanError> {
    let base = normalize_scan_path(base_path);
    let base_str = base.to_string_lossy().into_owned();
    info!(path = %base_str, "Starting scan");

    let is_dir = tokio::fs::metadata(&base).await.map(|m| m.is_dir()).unwrap_or(false);
    if !is_dir {
        error!(path = %base_str, "Directory not found");
        return Ok(ScanResult {
            errors: vec![format!("Directory not found: {}", base_str)],
            ..Default::default()
        });
    }

    let systems = db::systems::list_systems(pool).await?;
    let exclusive = build_exclusive_map(&systems);

    let mut scanner = Scanner {
        pool,
        options,
        progress,
        cancel,
        systems,
        exclusive,
        state: ScanProgress::default(),
        seen_paths: HashSet::new(),
        images: Vec::new(),
        result: ScanResult::default(),
    };

    let walk_root = base.clone();
    let (files, walk_errors) = blocking(move || collect_files(&walk_root)).await?;
    scanner.result.errors.extend(walk_errors);

    scanner.walk(files).await?;
    scanner.process_images().await?;

    scanner.state.roms_found = scanner.result.added;
    scanner.state.images_found = scanner.result.images_added;
    scanner.state.current_directory = "(cleaning up)".to_string();
    scanner.report().await?;

    scanner.remove_missing(&base_str).await?;

    let result = scanner.result;
    info!(
        path = %base_str,
        added = result.added,
        skipped = result.skipped,
        deleted_roms = result.deleted_roms,
        deleted_rom_sets = result.deleted_rom_sets,
        deleted_games = result.deleted_games,
        images_added = result.images_added,
        images_skipped = result.images_skipped,
        errors = result.errors.len(),
        "Scan complete"
    );
    Ok(result)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanCleanup {
    pub deleted_rom_sets: i64,
    pub deleted_games: i64,
}

/// Delete emptied ROM sets, then games left without sets
///
/// Surviving games get their default ROM set recalculated.
pub async fn remove_orphans(pool: &SqlitePool, rom_set_ids: &[i64]) -> romhoard_common::Result<OrphanCleanup> {
    let mut cleanup = OrphanCleanup::default();
    let mut games = Vec::new();

    for rom_set_id in rom_set_ids {
        let owners = db::rom_sets::delete_empty_rom_sets(pool, &[*rom_set_id]).await?;
        if !owners.is_empty() {
            cleanup.deleted_rom_sets += 1;
        }
        for game_id in owners {
            if !games.contains(&game_id) {
                games.push(game_id);
            }
        }
    }

    for game_id in games {
        if db::rom_sets::list_rom_sets_for_game(pool, game_id).await?.is_empty() {
            if db::games::delete_game(pool, game_id).await? {
                debug!(game_id, "Deleted orphan game");
                cleanup.deleted_games += 1;
            }
        } else {
            recalculate_default_romset(pool, game_id).await?;
        }
    }
    Ok(cleanup)
}

/// What deleting a scan path would remove
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanPathDeletePreview {
    pub rom_count: i64,
    pub rom_set_count: i64,
    pub game_count: i64,
    pub image_count: i64,
}

pub async fn scan_path_delete_preview(pool: &SqlitePool, path: &str) -> romhoard_common::Result<ScanPathDeletePreview> {
    let roms = db::roms::list_roms_under_directory(pool, path).await?;
    let rom_ids: HashSet<i64> = roms.iter().map(|r| r.id).collect();
    let mut set_ids: Vec<i64> = roms.iter().map(|r| r.rom_set_id).collect();
    set_ids.sort_unstable();
    set_ids.dedup();

    let mut orphan_sets = HashSet::new();
    let mut affected_games = Vec::new();
    for set_id in &set_ids {
        let remaining = db::roms::list_roms_for_rom_set(pool, *set_id)
            .await?
            .iter()
            .filter(|r| !rom_ids.contains(&r.id))
            .count();
        if remaining > 0 {
            continue;
        }
        orphan_sets.insert(*set_id);
        if let Some(set) = db::rom_sets::get_rom_set(pool, *set_id).await? {
            if !affected_games.contains(&set.game_id) {
                affected_games.push(set.game_id);
            }
        }
    }

    let mut preview = ScanPathDeletePreview {
        rom_count: roms.len() as i64,
        rom_set_count: orphan_sets.len() as i64,
        ..Default::default()
    };
    for game_id in affected_games {
        let sets = db::rom_sets::list_rom_sets_for_game(pool, game_id).await?;
        if sets.iter().all(|s| orphan_sets.contains(&s.id)) {
            preview.game_count += 1;
            preview.image_count += db::images::count_images_for_game(pool, game_id).await?;
        }
    }
    Ok(preview)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanPathDeletion {
    pub deleted_roms: i64,
    pub deleted_rom_sets: i64,
    pub deleted_games: i64,
}

/// Delete every ROM under a path, cascading to emptied sets and games
///
/// Image files on disk are left in place; their rows go with the game.
pub async fn delete_scan_path_roms(pool: &SqlitePool, path: &str) -> romhoard_common::Result<ScanPathDeletion> {
    let roms = db::roms::list_roms_under_directory(pool, path).await?;
    let mut touched_sets = Vec::new();
    for rom in &roms {
        db::roms::delete_rom(pool, rom.id).await?;
        if !touched_sets.contains(&rom.rom_set_id) {
            touched_sets.push(rom.rom_set_id);
        }
    }

    let cleanup = remove_orphans(pool, &touched_sets).await?;
    info!(
        path,
        deleted_roms = roms.len(),
        deleted_rom_sets = cleanup.deleted_rom_sets,
        deleted_games = cleanup.deleted_games,
        "Deleted ROMs under scan path"
    );
    Ok(ScanPathDeletion {
        deleted_roms: roms.len() as i64,
        deleted_rom_sets: cleanup.deleted_rom_sets,
        deleted_games: cleanup.deleted_games,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn system(slug: &str, extensions: &[&str], folders: &[&str], exclusive: &[&str]) -> System {
        System {
            slug: slug.into(),
            name: slug.to_uppercase(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            exclusive_extensions: exclusive.iter().map(|s| s.to_string()).collect(),
            folder_names: folders.iter().map(|s| s.to_string()).collect(),
            archive_as_rom: false,
            release_year: None,
            sort_order: 0,
        }
    }

    fn game(id: i64, name: &str) -> Game {
        let now = Utc::now();
        Game {
            id,
            name: name.into(),
            system_slug: "gba".into(),
            name_source: "filename".into(),
            default_rom_set_id: None,
            screenscraper_id: None,
            description: String::new(),
            release_date: None,
            developer: String::new(),
            publisher: String::new(),
            players: String::new(),
            rating: None,
            rating_source: String::new(),
            metadata_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_is_bios_file() {
        assert!(is_bios_file("BIOS_gba.bin", Path::new("/roms/gba/BIOS_gba.bin")));
        assert!(is_bios_file("scph1001.bin", Path::new("/roms/psx/Bios/scph1001.bin")));
        assert!(!is_bios_file("Zelda.gba", Path::new("/roms/gba/Zelda.gba")));
    }

    #[test]
    fn test_detect_image_type() {
        assert_eq!(detect_image_type("/imgs/mixrbv2/Zelda.png"), "mix");
        assert_eq!(detect_image_type("/imgs/boxart/Zelda.png"), "cover");
        assert_eq!(detect_image_type("/imgs/Screenshots/Zelda.png"), "screenshot");
        assert_eq!(detect_image_type("/covers/screenshot/Zelda.png"), "mix");
        assert_eq!(detect_image_type("/imgs/Zelda.png"), "");
    }

    #[test]
    fn test_detect_system_layers() {
        let systems = vec![
            system("gb", &[".gb"], &["gb"], &[".gb"]),
            system("ps1", &[".bin", ".cue"], &["psx"], &[]),
        ];
        let exclusive = build_exclusive_map(&systems);

        let found = detect_system(Path::new("/any/where/Tetris.gb"), &systems, &exclusive);
        assert_eq!(found.map(|s| s.slug.as_str()), Some("gb"));

        let found = detect_system(Path::new("/roms/PSX/FF7.bin"), &systems, &exclusive);
        assert_eq!(found.map(|s| s.slug.as_str()), Some("ps1"));

        assert!(detect_system(Path::new("/roms/psx/readme.txt"), &systems, &exclusive).is_none());
        assert!(detect_system(Path::new("/roms/misc/FF7.bin"), &systems, &exclusive).is_none());
        assert!(detect_system(Path::new("/roms/psx/noext"), &systems, &exclusive).is_none());
    }

    #[test]
    fn test_detect_system_for_archived_file_layers() {
        let systems = vec![
            system("gb", &[".gb"], &["gb"], &[".gb"]),
            system("ps1", &[".bin"], &["psx"], &[]),
        ];
        let exclusive = build_exclusive_map(&systems);
        let archive = Path::new("/roms/psx/pack.zip");

        let found = detect_system_for_archived_file(archive, "Tetris.gb", &systems, &exclusive);
        assert_eq!(found.map(|s| s.slug.as_str()), Some("gb"));
        let found = detect_system_for_archived_file(Path::new("/x/pack.zip"), "psx/FF7.bin", &systems, &exclusive);
        assert_eq!(found.map(|s| s.slug.as_str()), Some("ps1"));
        let found = detect_system_for_archived_file(archive, "FF7.bin", &systems, &exclusive);
        assert_eq!(found.map(|s| s.slug.as_str()), Some("ps1"));
        assert!(detect_system_for_archived_file(archive, "cover.png", &systems, &exclusive).is_none());
    }

    #[test]
    fn test_normalize_name_for_matching() {
        assert_eq!(normalize_name_for_matching("Zelda_-_Link's  Awakening!"), "zelda links awakening");
        assert_eq!(normalize_name_for_matching("  Mario  "), "mario");
    }

    #[test]
    fn test_match_image_to_game() {
        let games = vec![
            game(1, "Mario Kart"),
            game(2, "Zelda - A Link to the Past"),
            game(3, "Wario Land 4"),
            game(4, "Mario"),
        ];

        assert_eq!(match_image_to_game("wario land 4", &games).map(|g| g.id), Some(3));
        assert_eq!(match_image_to_game("Mario", &games).map(|g| g.id), Some(4));
        assert_eq!(match_image_to_game("Zelda", &games).map(|g| g.id), Some(2));
        assert_eq!(match_image_to_game("Wario Land 4 (USA)", &games).map(|g| g.id), Some(3));
        assert!(match_image_to_game("Warioware", &games).is_none());
        assert!(match_image_to_game("", &games).is_none());
    }

    #[test]
    fn test_get_source_path() {
        assert_eq!(get_source_path("/roms/gba/a.gba", "", ""), "/roms/gba");
        assert_eq!(get_source_path("", "/r/pack.zip", "a.gba"), "/r/pack.zip");
        assert_eq!(get_source_path("", "/r/pack.zip", "USA/a.gba"), "/r/pack.zip/USA");
    }

    #[test]
    fn test_should_expand_archive() {
        let entry = |name: &str| ArchiveInfo { name: name.into(), size: 1, crc32: String::new() };
        assert!(!should_expand_archive(&[entry("Game (Disc 1).bin")]));
        assert!(!should_expand_archive(&[entry("Game (Disc 1).bin"), entry("game (Disc 2).bin")]));
        assert!(should_expand_archive(&[entry("Alpha.gb"), entry("Beta.gb")]));
    }

    #[test]
    fn test_normalize_scan_path() {
        assert_eq!(normalize_scan_path(Path::new("/roms/./gba/../snes/")), PathBuf::from("/roms/snes"));
    }
}
