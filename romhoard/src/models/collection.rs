//! User collections
//!
//! Entries are declarative: they name a game and a system instead of pointing
//! at a library row, so a collection survives rescans and can be shared
//! between libraries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CREATOR: &str = "local";
pub const FAVORITES_SLUG: &str = "favorites";
pub const FAVORITES_NAME: &str = "Favorites";
pub const MAX_DESCRIPTION_LEN: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Collection {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub creator: String,
    pub is_public: bool,
    pub is_community: bool,
    pub is_favorites: bool,
    #[sqlx(json)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CollectionEntry {
    pub id: i64,
    pub collection_id: i64,
    pub game_name: String,
    pub system_slug: String,
    pub position: i64,
    pub notes: String,
    pub added_at: DateTime<Utc>,
}

/// Fields for creating or updating a collection
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionInput {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub is_community: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}
