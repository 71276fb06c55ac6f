//! Archive reading for `.zip` and `.7z`
//!
//! Only listing, CRC lookup and single-entry extraction are needed: ROMs stay
//! inside their archives and are pulled out on demand.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path};

use sevenz_rust::{Password, SevenZReader};
use thiserror::Error;

use super::extensions::{full_extension, is_archive_extension};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("7z error: {0}")]
    SevenZ(String),

    #[error("Unsupported archive format: {0}")]
    Unsupported(String),

    #[error("Unsafe path in archive: {0}")]
    UnsafePath(String),

    #[error("File not found in archive: {0}")]
    EntryNotFound(String),
}

/// One file entry of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub name: String,
    pub size: u64,
    /// Lowercase 8-digit hex, or empty when the archive has no CRC
    pub crc32: String,
}

enum Format {
    Zip,
    SevenZ,
}

fn format_of(path: &Path) -> Result<Format, ArchiveError> {
    match full_extension(&path.to_string_lossy()).as_str() {
        ".zip" => Ok(Format::Zip),
        ".7z" => Ok(Format::SevenZ),
        other => Err(ArchiveError::Unsupported(other.to_string())),
    }
}

fn open_seven_z(path: &Path) -> Result<SevenZReader<File>, ArchiveError> {
    SevenZReader::open(path, Password::empty()).map_err(|e| ArchiveError::SevenZ(e.to_string()))
}

/// List file entries, skipping directories
pub fn list_archive_contents(path: &Path) -> Result<Vec<ArchiveInfo>, ArchiveError> {
    match format_of(path)? {
        Format::Zip => {
            let mut archive = zip::ZipArchive::new(BufReader::new(File::open(path)?))?;
            let mut entries = Vec::with_capacity(archive.len());
            for i in 0..archive.len() {
                let entry = archive.by_index(i)?;
                if entry.is_dir() {
                    continue;
                }
                entries.push(ArchiveInfo {
                    name: entry.name().to_string(),
                    size: entry.size(),
                    crc32: format!("{:08x}", entry.crc32()),
                });
            }
            Ok(entries)
        }
        Format::SevenZ => {
            let reader = open_seven_z(path)?;
            Ok(reader
                .archive()
                .files
                .iter()
                .filter(|entry| !entry.is_directory)
                .map(|entry| ArchiveInfo {
                    name: entry.name.clone(),
                    size: entry.size,
                    crc32: if entry.has_crc {
                        format!("{:08x}", entry.crc as u32)
                    } else {
                        String::new()
                    },
                })
                .collect())
        }
    }
}

/// Reject absolute entry names and parent-directory components
pub fn check_entry_path(internal_path: &str) -> Result<(), ArchiveError> {
    let normalized = internal_path.replace('\\', "/");
    let unsafe_path = normalized.is_empty()
        || normalized.starts_with('/')
        || normalized.contains(':')
        || Path::new(&normalized)
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));

    if unsafe_path {
        Err(ArchiveError::UnsafePath(internal_path.to_string()))
    } else {
        Ok(())
    }
}

/// Extract one entry to `dest`
pub fn extract_file(archive_path: &Path, internal_path: &str, dest: &Path) -> Result<(), ArchiveError> {
    check_entry_path(internal_path)?;

    match format_of(archive_path)? {
        Format::Zip => {
            let mut archive = zip::ZipArchive::new(BufReader::new(File::open(archive_path)?))?;
            let mut entry = match archive.by_name(internal_path) {
                Ok(entry) => entry,
                Err(zip::result::ZipError::FileNotFound) => {
                    return Err(ArchiveError::EntryNotFound(internal_path.to_string()))
                }
                Err(e) => return Err(e.into()),
            };
            let mut out = File::create(dest)?;
            std::io::copy(&mut entry, &mut out)?;
            Ok(())
        }
        Format::SevenZ => {
            let mut reader = open_seven_z(archive_path)?;
            let mut found = false;
            let mut copy_error: Option<std::io::Error> = None;

            reader
                .for_each_entries(|entry, data| {
                    if entry.name != internal_path {
                        return Ok(true);
                    }
                    found = true;
                    if let Err(e) = File::create(dest).and_then(|mut out| std::io::copy(data, &mut out)) {
                        copy_error = Some(e);
                    }
                    Ok(false)
                })
                .map_err(|e| ArchiveError::SevenZ(e.to_string()))?;

            if let Some(e) = copy_error {
                return Err(e.into());
            }
            if !found {
                return Err(ArchiveError::EntryNotFound(internal_path.to_string()));
            }
            Ok(())
        }
    }
}

/// True for archives nested inside archives (not descended into)
pub fn is_nested_archive(name: &str) -> bool {
    is_archive_extension(&full_extension(name))
}

fn crc32_of_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:08x}", hasher.finalize()))
}

/// CRC32 of a file on disk, lowercase hex
pub fn compute_file_crc32(path: &Path) -> std::io::Result<String> {
    crc32_of_reader(BufReader::new(File::open(path)?))
}

/// CRC32 of an archive entry: the stored header value when available,
/// otherwise computed from the entry's bytes
pub fn compute_archived_file_crc32(archive_path: &Path, internal_path: &str) -> Result<String, ArchiveError> {
    if let Some(info) = list_archive_contents(archive_path)?
        .into_iter()
        .find(|info| info.name == internal_path)
    {
        if !info.crc32.is_empty() {
            return Ok(info.crc32);
        }
    } else {
        return Err(ArchiveError::EntryNotFound(internal_path.to_string()));
    }

    match format_of(archive_path)? {
        Format::Zip => {
            let mut archive = zip::ZipArchive::new(BufReader::new(File::open(archive_path)?))?;
            let entry = archive.by_name(internal_path)?;
            Ok(crc32_of_reader(entry)?)
        }
        Format::SevenZ => {
            let mut reader = open_seven_z(archive_path)?;
            let mut result: Option<std::io::Result<String>> = None;
            reader
                .for_each_entries(|entry, data| {
                    if entry.name != internal_path {
                        return Ok(true);
                    }
                    result = Some(crc32_of_reader(data));
                    Ok(false)
                })
                .map_err(|e| ArchiveError::SevenZ(e.to_string()))?;

            match result {
                Some(crc) => Ok(crc?),
                None => Err(ArchiveError::EntryNotFound(internal_path.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in files {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_list_zip_contents_with_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("games.zip");
        write_zip(&path, &[("a.gba", b"hello"), ("sub/b.gba", b"world")]);

        let entries = list_archive_contents(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.gba");
        assert_eq!(entries[0].size, 5);
        // crc32("hello")
        assert_eq!(entries[0].crc32, "3610a686");
        assert_eq!(entries[1].name, "sub/b.gba");
    }

    #[test]
    fn test_extract_zip_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("games.zip");
        write_zip(&path, &[("a.gba", b"hello")]);
        let dest = dir.path().join("out.gba");

        extract_file(&path, "a.gba", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

        assert!(matches!(
            extract_file(&path, "missing.gba", &dest),
            Err(ArchiveError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_unsafe_entry_paths_rejected() {
        assert!(check_entry_path("sub/game.gba").is_ok());
        for bad in ["../evil.gba", "/etc/passwd", "a/../../b", "C:\\x.gba", "..\\x.gba", ""] {
            assert!(matches!(check_entry_path(bad), Err(ArchiveError::UnsafePath(_))), "{}", bad);
        }
    }

    #[test]
    fn test_unsupported_format() {
        assert!(matches!(
            list_archive_contents(Path::new("/tmp/x.rar")),
            Err(ArchiveError::Unsupported(_))
        ));
    }

    #[test]
    fn test_crc_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let loose = dir.path().join("a.gba");
        std::fs::write(&loose, b"hello").unwrap();
        assert_eq!(compute_file_crc32(&loose).unwrap(), "3610a686");

        let zip_path = dir.path().join("a.zip");
        write_zip(&zip_path, &[("a.gba", b"hello")]);
        assert_eq!(compute_archived_file_crc32(&zip_path, "a.gba").unwrap(), "3610a686");

        assert!(is_nested_archive("inner.7z"));
        assert!(!is_nested_archive("game.gba"));
    }
}
