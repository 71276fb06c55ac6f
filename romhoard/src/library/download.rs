//! ROM file access and zip bundles
//!
//! Archived ROMs are extracted to temp files on demand. Bundles are zip
//! archives (deflate) written on blocking threads; the async side gathers
//! ROMs and images from the database.

use std::fs::File;
use std::io::{BufReader, Cursor, Seek, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::archive::{self, ArchiveError};
use super::extensions::basename;
use super::romset_scoring::best_romset_for_game;
use crate::db;
use crate::models::{image_type, Device, Game, GameImage, Rom};

pub const MISSING_FILES_NAME: &str = "missing_files.txt";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{0}")]
    NotFound(String),

    #[error("No available ROMs in ROM set {0}")]
    NoRoms(i64),

    #[error("All files are missing: {0}")]
    AllMissing(String),

    #[error("No games have available ROMs")]
    NoGames,

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Image error: {0}")]
    Image(String),

    #[error(transparent)]
    Database(#[from] romhoard_common::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

async fn blocking<T, F>(f: F) -> Result<T, DownloadError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DownloadError::Task(e.to_string()))
}

/// A ROM's bytes on disk and the name to present it under
///
/// Extracted files are removed when the value is dropped.
#[derive(Debug)]
pub struct RomFile {
    pub path: PathBuf,
    pub filename: String,
    pub temp: Option<TempPath>,
}

fn extract_to_temp(rom: &Rom) -> Result<RomFile, DownloadError> {
    let filename = basename(&rom.path_in_archive).to_string();
    let suffix = Path::new(&filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let temp = tempfile::Builder::new()
        .prefix("romhoard-")
        .suffix(&suffix)
        .tempfile()?
        .into_temp_path();
    archive::extract_file(Path::new(&rom.archive_path), &rom.path_in_archive, &temp)?;

    Ok(RomFile {
        path: temp.to_path_buf(),
        filename,
        temp: Some(temp),
    })
}

fn open_rom_file_blocking(rom: &Rom) -> Result<RomFile, DownloadError> {
    if !rom.is_archived() {
        let path = PathBuf::from(&rom.file_path);
        if !path.is_file() {
            return Err(DownloadError::NotFound(format!("ROM file not found: {}", rom.file_path)));
        }
        return Ok(RomFile {
            path,
            filename: rom.file_name.clone(),
            temp: None,
        });
    }
    extract_to_temp(rom)
}

/// The ROM itself: loose path, or the entry extracted from its archive
pub async fn rom_file(rom: &Rom) -> Result<RomFile, DownloadError> {
    let rom = rom.clone();
    blocking(move || open_rom_file_blocking(&rom)).await?
}

/// The ROM as stored: a single-ROM archive is served whole
pub async fn rom_file_as_stored(pool: &SqlitePool, rom: &Rom) -> Result<RomFile, DownloadError> {
    if rom.is_archived() && db::roms::count_roms_in_archive(pool, &rom.archive_path).await? == 1 {
        let path = PathBuf::from(&rom.archive_path);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DownloadError::NotFound(format!("Archive not found: {}", rom.archive_path)));
        }
        return Ok(RomFile {
            filename: basename(&rom.archive_path).to_string(),
            path,
            temp: None,
        });
    }
    rom_file(rom).await
}

/// Name of a disc inside a bundle: `"<stem> (Disc N)<ext>"`
pub fn disc_file_name(filename: &str, disc: Option<i64>) -> String {
    let Some(disc) = disc else {
        return filename.to_string();
    };
    if filename.to_lowercase().contains(&format!("(disc {})", disc)) {
        return filename.to_string();
    }
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{} (Disc {}){}", stem, disc, ext)
}

/// Make a game name safe as a file or folder name
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '/' | '\\' | '|' => out.push('-'),
            ':' => out.push_str(" -"),
            '*' | '?' | '<' | '>' => {}
            '"' => out.push('\''),
            other => out.push(other),
        }
    }
    out.trim_matches(|c| c == ' ' || c == '.').to_string()
}

pub(crate) fn zip_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true)
}

fn write_file_entry<W: Write + Seek>(zip: &mut ZipWriter<W>, source: &Path, name: &str) -> Result<u64, DownloadError> {
    let mut input = BufReader::new(File::open(source)?);
    zip.start_file(name, zip_options())?;
    Ok(std::io::copy(&mut input, zip)?)
}

fn write_missing_list<W: Write + Seek>(zip: &mut ZipWriter<W>, heading: &str, missing: &[String]) -> Result<(), DownloadError> {
    zip.start_file(MISSING_FILES_NAME, zip_options())?;
    let content = format!("{}\n\n{}", heading, missing.join("\n"));
    zip.write_all(content.as_bytes())?;
    Ok(())
}

/// A finished zip
#[derive(Debug)]
pub struct Bundle {
    pub path: TempPath,
    pub filename: String,
}

/// Zip every ROM of a set into a temp file named after the game
///
/// Unreadable ROMs are listed in `missing_files.txt`.
pub async fn create_romset_bundle(pool: &SqlitePool, rom_set_id: i64) -> Result<Bundle, DownloadError> {
    let rom_set = db::rom_sets::get_rom_set(pool, rom_set_id)
        .await?
        .ok_or_else(|| DownloadError::NotFound(format!("ROM set {} not found", rom_set_id)))?;
    let game = db::games::get_game(pool, rom_set.game_id)
        .await?
        .ok_or_else(|| DownloadError::NotFound(format!("Game {} not found", rom_set.game_id)))?;
    let roms = db::roms::list_roms_for_rom_set(pool, rom_set_id).await?;
    if roms.is_empty() {
        return Err(DownloadError::NoRoms(rom_set_id));
    }

    let filename = format!("{}.zip", game.name);
    let path = blocking(move || -> Result<TempPath, DownloadError> {
        let temp = tempfile::Builder::new().prefix("romhoard-set-").suffix(".zip").tempfile()?;
        let (file, path) = temp.into_parts();
        let mut zip = ZipWriter::new(file);

        let mut missing = Vec::new();
        let mut added = 0;
        for rom in &roms {
            let result = open_rom_file_blocking(rom)
                .and_then(|f| write_file_entry(&mut zip, &f.path, &disc_file_name(&f.filename, rom.disc)));
            match result {
                Ok(_) => added += 1,
                Err(e) => missing.push(format!("{}: {}", rom.file_name, e)),
            }
        }

        if added == 0 {
            return Err(DownloadError::AllMissing(missing.join(", ")));
        }
        if !missing.is_empty() {
            write_missing_list(&mut zip, "The following files could not be included:", &missing)?;
        }
        zip.finish()?;
        Ok(path)
    })
    .await??;

    info!(rom_set_id, file = %filename, "Created ROM set bundle");
    Ok(Bundle { path, filename })
}

/// Live counters while a multi-game bundle is written
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BundleProgress {
    pub games_total: i64,
    pub games_processed: i64,
    pub current_game: String,
    pub bytes_written: i64,
    pub images_added: i64,
}

#[async_trait]
pub trait BundleProgressSink: Send + Sync {
    async fn report(&self, progress: &BundleProgress);
}

pub struct NoBundleProgress;

#[async_trait]
impl BundleProgressSink for NoBundleProgress {
    async fn report(&self, _progress: &BundleProgress) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiGameBundle {
    pub path: PathBuf,
    pub filename: String,
    pub file_size: i64,
    pub games_included: i64,
    pub games_failed: i64,
    pub errors: Vec<String>,
}

/// Image for a device: the requested type, then cover, mix, screenshot
pub fn preferred_image<'a>(images: &'a [GameImage], requested: &str) -> Option<&'a GameImage> {
    let mut order = vec![requested];
    for fallback in [image_type::COVER, image_type::MIX, image_type::SCREENSHOT] {
        if !order.contains(&fallback) {
            order.push(fallback);
        }
    }
    order
        .into_iter()
        .find_map(|wanted| images.iter().find(|i| i.image_type == wanted))
}

/// Re-encode an image no wider than `max_width`, keeping its aspect ratio
///
/// JPEG stays JPEG; everything else becomes PNG.
pub fn resize_image(source: &Path, max_width: Option<i64>) -> Result<Vec<u8>, DownloadError> {
    let img = image::open(source).map_err(|e| DownloadError::Image(e.to_string()))?;

    let img = match max_width.filter(|w| *w > 0).map(|w| w as u32) {
        Some(max) if img.width() > max => {
            let height = ((img.height() as u64 * max as u64) / img.width() as u64).max(1) as u32;
            img.resize_exact(max, height, image::imageops::FilterType::Lanczos3)
        }
        _ => img,
    };

    let is_jpeg = matches!(
        source.extension().map(|e| e.to_string_lossy().to_lowercase()).as_deref(),
        Some("jpg") | Some("jpeg")
    );

    let mut out = Cursor::new(Vec::new());
    if is_jpeg {
        image::DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut out, image::ImageOutputFormat::Jpeg(90))
            .map_err(|e| DownloadError::Image(e.to_string()))?;
    } else {
        img.write_to(&mut out, image::ImageOutputFormat::Png)
            .map_err(|e| DownloadError::Image(e.to_string()))?;
    }
    Ok(out.into_inner())
}

struct GamePlan {
    name: String,
    system_slug: String,
    roms: Vec<Rom>,
    image: Option<PathBuf>,
}

struct GameWritten {
    bytes: u64,
    image_added: bool,
}

fn write_game<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    plan: &GamePlan,
    device: Option<&Device>,
) -> Result<GameWritten, DownloadError> {
    let folder = sanitize_filename(&plan.name);
    let mut bytes = 0;
    let mut first_filename: Option<String> = None;

    // Every file must be readable before the game's first entry is written
    let files = plan
        .roms
        .iter()
        .map(|rom| open_rom_file_blocking(rom).map(|file| (rom, file)))
        .collect::<Result<Vec<_>, _>>()?;

    for (rom, file) in files {
        let filename = disc_file_name(&file.filename, rom.disc);
        let entry_name = match device {
            Some(device) => device.rom_path(&plan.system_slug, &folder, &filename),
            None => format!("{}/{}", folder, filename),
        };
        bytes += write_file_entry(zip, &file.path, &entry_name)?;
        first_filename.get_or_insert(filename);
    }

    let mut image_added = false;
    if let (Some(device), Some(first), Some(image)) = (device, &first_filename, &plan.image) {
        if let Some(image_path) = device.image_path(&plan.system_slug, first) {
            match resize_image(image, device.image_max_width) {
                Ok(data) => {
                    zip.start_file(image_path, zip_options())?;
                    zip.write_all(&data)?;
                    image_added = true;
                }
                Err(e) => warn!(image = %image.display(), "Skipping image: {}", e),
            }
        }
    }

    Ok(GameWritten { bytes, image_added })
}

/// Bundle several games into `<dest_dir>/<bundle_name>.zip`
///
/// Each game goes under its own folder, or the device layout when a device
/// is given. Games that fail are listed in `missing_files.txt`.
pub async fn create_multi_game_bundle(
    pool: &SqlitePool,
    games: &[Game],
    bundle_name: &str,
    device: Option<&Device>,
    dest_dir: &Path,
    progress: &dyn BundleProgressSink,
) -> Result<MultiGameBundle, DownloadError> {
    let mut plans = Vec::new();
    for game in games {
        let Some(best) = best_romset_for_game(pool, game.id).await? else {
            debug!(game_id = game.id, "No ROMs available; left out of bundle");
            continue;
        };

        let image = match device.filter(|d| d.include_images) {
            Some(device) => {
                let images = db::images::list_images_for_game(pool, game.id).await?;
                preferred_image(&images, &device.image_type).map(|i| PathBuf::from(&i.file_path))
            }
            None => None,
        };

        plans.push(GamePlan {
            name: game.name.clone(),
            system_slug: game.system_slug.clone(),
            roms: best.roms,
            image,
        });
    }
    if plans.is_empty() {
        return Err(DownloadError::NoGames);
    }

    tokio::fs::create_dir_all(dest_dir).await?;
    let filename = format!("{}.zip", bundle_name);
    let path = dest_dir.join(&filename);

    let mut state = BundleProgress {
        games_total: plans.len() as i64,
        ..Default::default()
    };
    let mut zip = ZipWriter::new(File::create(&path)?);
    let mut missing = Vec::new();
    let mut included = 0;

    for plan in plans {
        state.current_game = plan.name.clone();
        let owned_device = device.cloned();
        let (returned, outcome) = blocking(move || {
            let mut zip = zip;
            let outcome = write_game(&mut zip, &plan, owned_device.as_ref());
            (zip, outcome.map_err(|e| format!("{}: {}", plan.name, e)))
        })
        .await?;
        zip = returned;

        match outcome {
            Ok(written) => {
                included += 1;
                state.bytes_written += written.bytes as i64;
                if written.image_added {
                    state.images_added += 1;
                }
            }
            Err(line) => {
                warn!("Game left out of bundle: {}", line);
                missing.push(line);
            }
        }
        state.games_processed += 1;
        progress.report(&state).await;
    }

    let heading_missing = missing.clone();
    blocking(move || -> Result<(), DownloadError> {
        let mut zip = zip;
        if !heading_missing.is_empty() {
            write_missing_list(&mut zip, "The following games could not be included:", &heading_missing)?;
        }
        zip.finish()?;
        Ok(())
    })
    .await??;

    if included == 0 {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(DownloadError::AllMissing(missing.join(", ")));
    }

    let file_size = tokio::fs::metadata(&path).await?.len() as i64;
    info!(
        file = %filename,
        games_included = included,
        games_failed = missing.len(),
        file_size,
        "Created multi-game bundle"
    );
    Ok(MultiGameBundle {
        path,
        filename,
        file_size,
        games_included: included,
        games_failed: missing.len() as i64,
        errors: missing,
    })
}

/// Delete expired bundles and their job rows
pub async fn cleanup_expired_downloads(pool: &SqlitePool) -> Result<usize, DownloadError> {
    let now = Utc::now();
    let mut removed = 0;

    for job in db::download_jobs::list_download_jobs(pool).await? {
        if !job.is_expired(now) {
            continue;
        }
        if !job.file_path.is_empty() {
            let path = PathBuf::from(&job.file_path);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %job.file_path, "Cannot delete expired bundle: {}", e);
                }
            }
            // Per-job directory, when empty
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
        db::download_jobs::delete_download_job(pool, job.job_id).await?;
        removed += 1;
    }

    if removed > 0 {
        info!(removed, "Cleaned up expired downloads");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Zelda: Minish Cap"), "Zelda - Minish Cap");
        assert_eq!(sanitize_filename("AC/DC | Live"), "AC-DC - Live");
        assert_eq!(sanitize_filename("What? <Now>*"), "What Now");
        assert_eq!(sanitize_filename("Say \"Hi\""), "Say 'Hi'");
        assert_eq!(sanitize_filename(" ..Trailing dots.. "), "Trailing dots");
    }

    #[test]
    fn test_disc_file_name() {
        assert_eq!(disc_file_name("Final Fantasy VII.chd", Some(2)), "Final Fantasy VII (Disc 2).chd");
        assert_eq!(disc_file_name("Tetris.gb", None), "Tetris.gb");
        assert_eq!(disc_file_name("Myst (USA) (Disc 1).chd", Some(1)), "Myst (USA) (Disc 1).chd");
    }

    fn image(id: i64, kind: &str) -> GameImage {
        GameImage {
            id,
            game_id: 1,
            file_path: format!("/img/{}.png", id),
            file_name: format!("{}.png", id),
            file_size: 1,
            image_type: kind.into(),
            source: "scanned".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_preferred_image_fallbacks() {
        let images = vec![image(1, "screenshot"), image(2, "mix"), image(3, "wheel")];
        assert_eq!(preferred_image(&images, "screenshot").map(|i| i.id), Some(1));
        assert_eq!(preferred_image(&images, "cover").map(|i| i.id), Some(2));
        assert!(preferred_image(&[image(4, "wheel")], "cover").is_none());
    }

    #[test]
    fn test_resize_image_keeps_aspect() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cover.png");
        image::RgbaImage::new(400, 200).save(&source).unwrap();

        let data = resize_image(&source, Some(100)).unwrap();
        let resized = image::load_from_memory(&data).unwrap();
        assert_eq!((resized.width(), resized.height()), (100, 50));

        let data = resize_image(&source, Some(1000)).unwrap();
        let same = image::load_from_memory(&data).unwrap();
        assert_eq!(same.width(), 400);
    }
}
