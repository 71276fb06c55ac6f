//! Filing uploaded ROMs into the library
//!
//! An uploaded file is moved to `<library root>/<system slug>/` and recorded
//! exactly as a scan of that folder would record it, so rescanning the
//! library root skips it. Archives stay intact: their entries become
//! archived ROMs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::archive::{self, ArchiveError, ArchiveInfo};
use super::extensions::{
    basename, build_exclusive_map, full_extension, is_acceptable_extension, is_archive_extension,
    is_non_rom_extension, simple_suffix,
};
use super::parser::stem_and_extension;
use super::scanner::{
    get_source_path, insert_archived_rom, insert_loose_rom, normalize_scan_path, should_expand_archive, ScanError,
};
use crate::db;
use crate::models::System;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Database(#[from] romhoard_common::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

async fn blocking<T, F>(f: F) -> Result<T, UploadError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| UploadError::Task(e.to_string()))
}

/// Name to store an uploaded file under
///
/// Only the final component of the client's name is kept.
pub fn sanitize_upload_name(name: &str) -> Option<String> {
    let name = basename(name.trim()).trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// What happened to one uploaded file
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// ROM ids recorded for the file
    Added(Vec<i64>),
    /// Already in the library
    Skipped(String),
    /// No system could be determined; the file stays in the upload folder
    Unidentified,
    Failed(String),
}

/// Systems and the destination shared by every file of an upload
pub struct UploadTarget {
    pub library_root: PathBuf,
    systems: Vec<System>,
    exclusive: HashMap<String, String>,
}

impl UploadTarget {
    pub async fn load(pool: &SqlitePool, library_root: &Path) -> Result<Self, UploadError> {
        let systems = db::systems::list_systems(pool).await?;
        let exclusive = build_exclusive_map(&systems);
        Ok(Self {
            library_root: normalize_scan_path(library_root),
            systems,
            exclusive,
        })
    }

    pub fn system(&self, slug: &str) -> Option<&System> {
        self.systems.iter().find(|s| s.slug == slug)
    }

    fn exclusive_system(&self, file_name: &str) -> Option<&System> {
        let slug = self.exclusive.get(&full_extension(file_name))?;
        self.system(slug)
    }

    /// Whether an archive entry can be a ROM of `system`
    fn entry_belongs_to(&self, entry: &str, system: &System) -> bool {
        let extension = full_extension(basename(entry));
        if extension.is_empty() || is_non_rom_extension(&extension) || archive::is_nested_archive(entry) {
            return false;
        }
        match self.exclusive.get(&extension) {
            Some(slug) => slug == &system.slug,
            None => is_acceptable_extension(&extension, system) && !is_archive_extension(&extension),
        }
    }

    /// System of an uploaded file
    ///
    /// Exclusive extensions decide; an archive is judged by the first entry
    /// with an exclusive extension. Folder names mean nothing for uploads.
    pub async fn detect_system(&self, path: &Path) -> Result<Option<System>, UploadError> {
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if let Some(system) = self.exclusive_system(&file_name) {
            return Ok(Some(system.clone()));
        }
        if !is_archive_extension(&simple_suffix(&file_name)) {
            return Ok(None);
        }

        let owned = path.to_path_buf();
        let contents = match blocking(move || archive::list_archive_contents(&owned)).await? {
            Ok(contents) => contents,
            Err(e) => {
                warn!(file = %file_name, "Cannot read uploaded archive: {}", e);
                return Ok(None);
            }
        };
        Ok(contents
            .iter()
            .filter(|info| !archive::is_nested_archive(&info.name))
            .find_map(|info| self.exclusive_system(&info.name))
            .cloned())
    }
}

/// `dir/name`, or `dir/<stem>_<n><ext>` with the first free `n`
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, extension) = stem_and_extension(file_name);
    let mut counter = 1;
    loop {
        let candidate = dir.join(format!("{}_{}{}", stem, counter, extension));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Rename, falling back to copy and delete across filesystems
pub async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

/// File one uploaded file into the library
///
/// `system` overrides detection. Files already known by name in the system
/// are deleted and skipped.
pub async fn file_upload(
    pool: &SqlitePool,
    target: &UploadTarget,
    path: &Path,
    system: Option<&System>,
) -> Result<FileOutcome, UploadError> {
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let system = match system {
        Some(system) => system.clone(),
        None => match target.detect_system(path).await? {
            Some(system) => system,
            None => return Ok(FileOutcome::Unidentified),
        },
    };

    if let Some(game) = db::games::find_game_by_rom_file_name(pool, &system.slug, &file_name).await? {
        tokio::fs::remove_file(path).await?;
        debug!(file = %file_name, game = %game.name, "Uploaded file already in library");
        return Ok(FileOutcome::Skipped(format!(
            "{} already in library as {} ({})",
            file_name, game.name, system.slug
        )));
    }

    // Archives of per-entry systems are checked before anything moves
    let entries: Option<Vec<ArchiveInfo>> =
        if is_archive_extension(&simple_suffix(&file_name)) && !system.archive_as_rom {
            let owned = path.to_path_buf();
            let contents = blocking(move || archive::list_archive_contents(&owned)).await??;
            let entries: Vec<ArchiveInfo> = contents
                .into_iter()
                .filter(|info| target.entry_belongs_to(&info.name, &system))
                .collect();
            if entries.is_empty() {
                return Ok(FileOutcome::Failed(format!(
                    "No {} ROMs in archive {}",
                    system.name, file_name
                )));
            }
            Some(entries)
        } else {
            None
        };

    let dest_dir = target.library_root.join(&system.slug);
    tokio::fs::create_dir_all(&dest_dir).await?;
    let dest = unique_destination(&dest_dir, &file_name);
    move_file(path, &dest).await?;
    let dest_str = dest.to_string_lossy().into_owned();

    let rom_ids = match entries {
        None => {
            let file_size = tokio::fs::metadata(&dest).await?.len() as i64;
            let source_path = if system.archive_as_rom {
                dest_str.clone()
            } else {
                get_source_path(&dest_str, "", "")
            };
            vec![insert_loose_rom(pool, &dest, &system, file_size, &source_path).await?]
        }
        Some(entries) if should_expand_archive(&entries) => {
            let mut ids = Vec::with_capacity(entries.len());
            for info in &entries {
                ids.push(insert_archived_rom(pool, &dest, info, &system, false).await?);
            }
            ids
        }
        Some(entries) => vec![insert_archived_rom(pool, &dest, &entries[0], &system, true).await?],
    };

    info!(file = %file_name, dest = %dest_str, system = %system.slug, roms = rom_ids.len(), "Filed upload");
    Ok(FileOutcome::Added(rom_ids))
}

/// Live counters while an upload is processed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub files_processed: i64,
    pub files_total: i64,
    pub current_file: String,
}

#[async_trait]
pub trait UploadProgressSink: Send + Sync {
    async fn report(&self, progress: &UploadProgress);
}

pub struct NoUploadProgress;

#[async_trait]
impl UploadProgressSink for NoUploadProgress {
    async fn report(&self, _progress: &UploadProgress) {}
}

/// Totals of one pass over uploaded files
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadPass {
    pub games_added: i64,
    pub games_skipped: i64,
    pub games_failed: i64,
    pub unidentified: Vec<String>,
    pub added_rom_ids: Vec<i64>,
    pub errors: Vec<String>,
}

/// File every upload in order; a failing file does not stop the others
pub async fn process_uploads(
    pool: &SqlitePool,
    target: &UploadTarget,
    files: &[(PathBuf, Option<System>)],
    progress: &dyn UploadProgressSink,
) -> UploadPass {
    let mut pass = UploadPass::default();
    let mut state = UploadProgress {
        files_total: files.len() as i64,
        ..Default::default()
    };

    for (path, system) in files {
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        state.current_file = file_name.clone();
        progress.report(&state).await;

        match file_upload(pool, target, path, system.as_ref()).await {
            Ok(FileOutcome::Added(ids)) => {
                pass.games_added += ids.len() as i64;
                pass.added_rom_ids.extend(ids);
            }
            Ok(FileOutcome::Skipped(reason)) => {
                pass.games_skipped += 1;
                pass.errors.push(reason);
            }
            Ok(FileOutcome::Unidentified) => pass.unidentified.push(file_name),
            Ok(FileOutcome::Failed(reason)) => {
                pass.games_failed += 1;
                pass.errors.push(reason);
            }
            Err(e) => {
                warn!(file = %file_name, "Failed to file upload: {}", e);
                pass.games_failed += 1;
                pass.errors.push(format!("{}: {}", file_name, e));
            }
        }
        state.files_processed += 1;
    }
    progress.report(&state).await;
    pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool_with_systems;
    use std::io::Write;

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn write_zip(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        for (entry, data) in files {
            zip.start_file(*entry, zip::write::FileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    #[test]
    fn test_sanitize_upload_name() {
        assert_eq!(sanitize_upload_name("Tetris (USA).gba").as_deref(), Some("Tetris (USA).gba"));
        assert_eq!(sanitize_upload_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_upload_name("C:\\roms\\Zelda.gb").as_deref(), Some("Zelda.gb"));
        assert_eq!(sanitize_upload_name("roms/.."), None);
        assert_eq!(sanitize_upload_name("  "), None);
    }

    #[test]
    fn test_unique_destination() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), "a.gba"), dir.path().join("a.gba"));
        write(dir.path(), "a.gba", b"1");
        write(dir.path(), "a_1.gba", b"2");
        assert_eq!(unique_destination(dir.path(), "a.gba"), dir.path().join("a_2.gba"));
    }

    #[tokio::test]
    async fn test_files_go_to_system_folder() {
        let pool = memory_pool_with_systems().await;
        let uploads = tempfile::tempdir().unwrap();
        let library = tempfile::tempdir().unwrap();
        let target = UploadTarget::load(&pool, library.path()).await.unwrap();

        let loose = write(uploads.path(), "Tetris (USA).gba", b"tetris");
        let outcome = file_upload(&pool, &target, &loose, None).await.unwrap();
        let FileOutcome::Added(ids) = outcome else {
            panic!("expected added, got {:?}", outcome);
        };
        assert_eq!(ids.len(), 1);
        assert!(!loose.exists());

        let rom = db::roms::get_rom(&pool, ids[0]).await.unwrap().unwrap();
        let expected = target.library_root.join("gba").join("Tetris (USA).gba");
        assert_eq!(rom.file_path, expected.to_string_lossy());
        assert!(expected.is_file());
        assert_eq!(rom.crc32, archive::compute_file_crc32(&expected).unwrap());

        // Same name again is a duplicate
        let again = write(uploads.path(), "Tetris (USA).gba", b"tetris");
        assert!(matches!(
            file_upload(&pool, &target, &again, None).await.unwrap(),
            FileOutcome::Skipped(_)
        ));
        assert!(!again.exists());
    }

    #[tokio::test]
    async fn test_archives_keep_their_entries() {
        let pool = memory_pool_with_systems().await;
        let uploads = tempfile::tempdir().unwrap();
        let library = tempfile::tempdir().unwrap();
        let target = UploadTarget::load(&pool, library.path()).await.unwrap();

        let single = write_zip(uploads.path(), "Metroid (USA).zip", &[("Metroid (USA).gba", b"metroid")]);
        let FileOutcome::Added(ids) = file_upload(&pool, &target, &single, None).await.unwrap() else {
            panic!("single-game archive not added");
        };
        let rom = db::roms::get_rom(&pool, ids[0]).await.unwrap().unwrap();
        assert_eq!(rom.file_name, "Metroid (USA).zip");
        assert_eq!(rom.path_in_archive, "Metroid (USA).gba");

        let multi = write_zip(
            uploads.path(),
            "pack.zip",
            &[("Advance Wars (USA).gba", b"aw"), ("Golden Sun (USA).gba", b"gs"), ("readme.txt", b"hi")],
        );
        let FileOutcome::Added(ids) = file_upload(&pool, &target, &multi, None).await.unwrap() else {
            panic!("multi-game archive not added");
        };
        assert_eq!(ids.len(), 2);
        assert!(db::games::find_game_by_name(&pool, "gba", "Golden Sun").await.unwrap().is_some());

        let wrong = write_zip(uploads.path(), "notes.zip", &[("readme.txt", b"hi")]);
        let gba = target.system("gba").cloned().unwrap();
        assert!(matches!(
            file_upload(&pool, &target, &wrong, Some(&gba)).await.unwrap(),
            FileOutcome::Failed(_)
        ));
        assert!(wrong.exists());
    }

    #[tokio::test]
    async fn test_process_uploads_counts() {
        let pool = memory_pool_with_systems().await;
        let uploads = tempfile::tempdir().unwrap();
        let library = tempfile::tempdir().unwrap();
        let target = UploadTarget::load(&pool, library.path()).await.unwrap();

        let files = vec![
            (write(uploads.path(), "Zelda (USA).gb", b"zelda"), None),
            (write(uploads.path(), "Mystery.bin", b"???"), None),
            (write(uploads.path(), "Sonic (USA).bin", b"sonic"), target.system("genesis").cloned()),
        ];
        let pass = process_uploads(&pool, &target, &files, &NoUploadProgress).await;
        assert_eq!(pass.games_added, 2);
        assert_eq!(pass.added_rom_ids.len(), 2);
        assert_eq!(pass.unidentified, vec!["Mystery.bin".to_string()]);
        assert!(files[1].0.exists());
        assert!(target.library_root.join("genesis").join("Sonic (USA).bin").is_file());
    }
}
