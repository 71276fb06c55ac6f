//! Library catalogue records: systems, games, ROM sets, ROMs, images, genres

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a game's current name came from
pub mod name_source {
    pub const FILENAME: &str = "filename";
    pub const HASHEOUS: &str = "hasheous";
    pub const SCREENSCRAPER: &str = "screenscraper";
    pub const COLLECTION: &str = "collection";
    pub const MANUAL: &str = "manual";
    pub const NO_INTROS: &str = "NoIntros";
    pub const REDUMP: &str = "Redump";

    /// Sources that already come from a hash database
    pub const HASH_BASED: &[&str] = &[HASHEOUS, NO_INTROS, REDUMP];

    /// Authority of a name source when choosing between duplicates
    pub fn priority(source: &str) -> i32 {
        match source {
            NO_INTROS => 100,
            REDUMP => 90,
            HASHEOUS => 80,
            SCREENSCRAPER => 70,
            COLLECTION => 60,
            FILENAME => 50,
            MANUAL => 40,
            _ => 0,
        }
    }
}

/// Artwork categories
pub mod image_type {
    pub const NONE: &str = "";
    pub const COVER: &str = "cover";
    pub const SCREENSHOT: &str = "screenshot";
    pub const SCREENSHOT_TITLE: &str = "screenshot_title";
    pub const MIX: &str = "mix";
    pub const WHEEL: &str = "wheel";
    pub const WHEEL_MINI: &str = "wheel_mini";

    pub const ALL: &[&str] = &[NONE, COVER, SCREENSHOT, SCREENSHOT_TITLE, MIX, WHEEL, WHEEL_MINI];
}

/// A console or platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct System {
    pub slug: String,
    pub name: String,
    #[sqlx(json)]
    pub extensions: Vec<String>,
    #[sqlx(json)]
    #[serde(default)]
    pub exclusive_extensions: Vec<String>,
    #[sqlx(json)]
    #[serde(default)]
    pub folder_names: Vec<String>,
    /// The whole archive is one ROM (MAME-style sets)
    #[serde(default)]
    pub archive_as_rom: bool,
    #[serde(default)]
    pub release_year: Option<i64>,
    #[serde(default)]
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Game {
    pub id: i64,
    pub name: String,
    pub system_slug: String,
    pub name_source: String,
    pub default_rom_set_id: Option<i64>,
    pub screenscraper_id: Option<i64>,
    pub description: String,
    pub release_date: Option<String>,
    pub developer: String,
    pub publisher: String,
    pub players: String,
    /// 0-100
    pub rating: Option<i64>,
    pub rating_source: String,
    pub metadata_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    pub fn has_metadata(&self) -> bool {
        self.metadata_updated_at.is_some()
    }
}

/// One variant of a game: a region/revision found in one source folder
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RomSet {
    pub id: i64,
    pub game_id: i64,
    pub region: String,
    pub revision: String,
    pub source_path: String,
    pub created_at: DateTime<Utc>,
}

/// A single ROM file, loose or inside an archive
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Rom {
    pub id: i64,
    pub rom_set_id: i64,
    /// Loose path, or `archive!internal` for expanded archive entries
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub archive_path: String,
    pub path_in_archive: String,
    pub crc32: String,
    pub sha1: String,
    #[sqlx(json)]
    pub tags: Vec<String>,
    pub rom_number: String,
    pub disc: Option<i64>,
    pub content_type: String,
    pub switch_title_id: String,
    pub created_at: DateTime<Utc>,
}

impl Rom {
    pub fn is_archived(&self) -> bool {
        !self.archive_path.is_empty()
    }

    /// Path that must exist on disk for this ROM to still be present
    pub fn check_path(&self) -> &str {
        if self.is_archived() {
            &self.archive_path
        } else {
            &self.file_path
        }
    }
}

/// Fields for inserting a ROM
#[derive(Debug, Clone, Default)]
pub struct NewRom {
    pub rom_set_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub archive_path: String,
    pub path_in_archive: String,
    pub crc32: String,
    pub sha1: String,
    pub tags: Vec<String>,
    pub rom_number: String,
    pub disc: Option<i64>,
    pub content_type: String,
    pub switch_title_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameImage {
    pub id: i64,
    pub game_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub image_type: String,
    /// scanned, downloaded or uploaded
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Genre {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<i64>,
}

impl Genre {
    /// Last segment of a hierarchical name ("Action / Platformer" → "Platformer")
    pub fn short_name(&self) -> &str {
        crate::library::genres::short_name(&self.name)
    }
}
