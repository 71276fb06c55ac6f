//! File extension categories and system acceptance rules
//!
//! Extensions are always handled lowercase with the leading dot (`.gba`).

use std::collections::HashMap;

use crate::models::System;

/// Archive formats that may contain ROMs
pub const COMPRESSED_EXTENSIONS: &[&str] = &[".zip", ".7z"];

/// Artwork formats
pub const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp"];

/// Extensions that end in an image suffix but are ROMs (PICO-8 carts)
pub const COMPOUND_ROM_EXTENSIONS: &[&str] = &[".p8.png"];

/// Extensions that are never ROMs, even inside archives
pub const NON_ROM_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp", ".txt", ".nfo", ".pdf", ".mp3", ".exe",
    ".dat", ".xml", ".md",
];

/// Split a file name into its final suffix (lowercased, with dot)
///
/// Only the final path component is considered. Dotfiles and names ending
/// in a dot have no extension.
pub fn simple_suffix(filename: &str) -> String {
    let basename = basename(filename);
    match basename.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < basename.len() => basename[idx..].to_lowercase(),
        _ => String::new(),
    }
}

/// Final path component, accepting both separators
pub fn basename(path: &str) -> &str {
    path.rsplit(&['/', '\\'][..]).next().unwrap_or(path)
}

/// Get extension, handling compound extensions like `.p8.png`
pub fn full_extension(filename: &str) -> String {
    let lower = basename(filename).to_lowercase();
    for compound in COMPOUND_ROM_EXTENSIONS {
        if lower.ends_with(compound) && lower.len() > compound.len() {
            return (*compound).to_string();
        }
    }
    simple_suffix(filename)
}

pub fn is_archive_extension(ext: &str) -> bool {
    COMPRESSED_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

pub fn is_non_rom_extension(ext: &str) -> bool {
    NON_ROM_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// True when the file name carries a compound ROM extension
pub fn is_compound_rom_extension(filename: &str) -> bool {
    let lower = basename(filename).to_lowercase();
    COMPOUND_ROM_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(ext) && lower.len() > ext.len())
}

/// An extension is acceptable for a system when it is an archive format or
/// one of the system's own extensions
pub fn is_acceptable_extension(ext: &str, system: &System) -> bool {
    if is_archive_extension(ext) {
        return true;
    }
    let ext = ext.to_lowercase();
    system.extensions.iter().any(|e| e.to_lowercase() == ext)
}

/// Map each exclusive extension to the slug of the first system claiming it
///
/// Compressed extensions are never exclusive.
pub fn build_exclusive_map(systems: &[System]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for system in systems {
        for ext in &system.exclusive_extensions {
            let ext = ext.to_lowercase();
            if is_archive_extension(&ext) {
                continue;
            }
            map.entry(ext).or_insert_with(|| system.slug.clone());
        }
    }
    map
}
