//! ROM filename parser
//!
//! Splits No-Intro / Redump style names such as
//! `"012 - Advance Wars (USA) (Rev 1).gba"` into the game name plus region,
//! revision, disc number and free-form tags.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::extensions::{basename, COMPOUND_ROM_EXTENSIONS};

static REVISION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(rev\s*[a-z0-9]+|v\d+(\.\d+)*)$").unwrap());

/// `"123 - Name"` or `"123. Name"`
static ROM_NUMBER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*(?:[-.])\s+").unwrap());

/// `(Disc 1)`, `(Track 2)`, `(Disc 1 of 2)`
static DISC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:disc|track)\s*(\d+)").unwrap());

/// `" - CD1"`, `" - Disc 2"` at the end of the stem
static DASH_DISC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*-\s*(?:cd|disc|track)\s*(\d+)\s*$").unwrap());

static TAG_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\(\[]").unwrap());

static TAG_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\(\[]([^\)\]]+)[\)\]]").unwrap());

static SWITCH_TITLE_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([0-9A-Fa-f]{16})\]").unwrap());

/// Lowercase alias to canonical region name
const REGION_ALIASES: &[(&str, &str)] = &[
    ("usa", "USA"),
    ("us", "USA"),
    ("america", "USA"),
    ("europe", "Europe"),
    ("eu", "Europe"),
    ("eur", "Europe"),
    ("japan", "Japan"),
    ("jp", "Japan"),
    ("jpn", "Japan"),
    ("world", "World"),
    ("asia", "Asia"),
    ("australia", "Australia"),
    ("brazil", "Brazil"),
    ("canada", "Canada"),
    ("china", "China"),
    ("france", "France"),
    ("germany", "Germany"),
    ("hong kong", "Hong Kong"),
    ("italy", "Italy"),
    ("korea", "Korea"),
    ("netherlands", "Netherlands"),
    ("spain", "Spain"),
    ("sweden", "Sweden"),
    ("taiwan", "Taiwan"),
    ("uk", "UK"),
];

/// Canonical region for an alias, case-insensitive
pub fn normalize_region(alias: &str) -> Option<&'static str> {
    let lower = alias.to_lowercase();
    REGION_ALIASES
        .iter()
        .find(|(key, _)| *key == lower)
        .map(|(_, region)| *region)
}

/// Components parsed from a ROM filename
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRom {
    pub name: String,
    pub region: String,
    pub revision: String,
    pub tags: Vec<String>,
    pub extension: String,
    pub rom_number: String,
    pub disc: Option<i64>,
}

/// Stem and lowercase extension of the final path component
pub fn stem_and_extension(filename: &str) -> (String, String) {
    let base = basename(filename);
    let lower = base.to_lowercase();

    for compound in COMPOUND_ROM_EXTENSIONS {
        if lower.ends_with(compound) && lower.len() > compound.len() {
            return (base[..base.len() - compound.len()].to_string(), compound.to_string());
        }
    }

    match base.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < base.len() => {
            (base[..idx].to_string(), base[idx..].to_lowercase())
        }
        _ => (base.to_string(), String::new()),
    }
}

/// Parse a ROM filename into its components
pub fn parse_rom_filename(filename: &str) -> ParsedRom {
    let (mut stem, extension) = stem_and_extension(filename);

    let mut rom_number = String::new();
    if let Some(caps) = ROM_NUMBER_PATTERN.captures(&stem) {
        rom_number = caps[1].to_string();
        stem = stem[caps[0].len()..].trim().to_string();
    }

    let mut disc: Option<i64> = None;
    let base_name: String;
    let remainder: String;

    if let Some(caps) = DASH_DISC_PATTERN.captures(&stem) {
        let start = caps.get(0).map(|m| m.start()).unwrap_or(stem.len());
        base_name = stem[..start].trim().to_string();
        disc = caps[1].parse().ok();
        remainder = String::new();
    } else if let Some(open) = TAG_OPEN.find(&stem) {
        let prefix = stem[..open.start()].trim();
        remainder = stem[open.start()..].to_string();

        if !prefix.is_empty() {
            base_name = prefix.to_string();
        } else {
            // Name starts with a tag, e.g. "[BIOS] Game Name"
            let stripped = TAG_GROUP.replace_all(&stem, "").trim().to_string();
            base_name = if stripped.is_empty() { stem.clone() } else { stripped };
        }
    } else {
        base_name = stem.trim().to_string();
        remainder = String::new();
    }

    let name = base_name
        .replace('_', " ")
        .trim_matches(|c| c == ' ' || c == '-')
        .to_string();

    let mut regions: Vec<&'static str> = Vec::new();
    let mut revision = String::new();
    let mut tags: Vec<String> = Vec::new();

    for caps in TAG_GROUP.captures_iter(&remainder) {
        let tag = caps[1].trim();

        if disc.is_none() {
            if let Some(d) = DISC_PATTERN.captures(tag) {
                disc = d[1].parse().ok();
                continue;
            }
        }

        if REVISION_PATTERN.is_match(tag) {
            revision = tag.to_string();
            continue;
        }

        // Only a region list when every part is a region: "(En,Fr,De)" stays tags
        let parts: Vec<&str> = tag.split(',').map(str::trim).collect();
        let matched: Vec<&'static str> = parts.iter().filter_map(|p| normalize_region(p)).collect();
        if !matched.is_empty() && matched.len() == parts.len() {
            regions.extend(matched);
            continue;
        }

        tags.extend(parts.into_iter().map(String::from));
    }

    let parsed = ParsedRom {
        name,
        region: regions.first().map(|r| r.to_string()).unwrap_or_default(),
        revision,
        tags,
        extension,
        rom_number,
        disc,
    };

    debug!(
        filename,
        name = %parsed.name,
        region = %parsed.region,
        revision = %parsed.revision,
        disc = ?parsed.disc,
        "Parsed ROM filename"
    );

    parsed
}

/// Nintendo Switch Title ID (16 hex digits in brackets), uppercased
pub fn extract_switch_title_id(filename: &str) -> Option<String> {
    SWITCH_TITLE_ID_PATTERN
        .captures(filename)
        .map(|caps| caps[1].to_uppercase())
}

/// Content type from a Switch Title ID: `base` (…000), `update` (…800) or `dlc`
pub fn switch_content_type(title_id: &str) -> &'static str {
    if title_id.len() != 16 {
        return "";
    }
    match title_id.get(13..).map(str::to_uppercase).as_deref() {
        Some("000") => "base",
        Some("800") => "update",
        Some(_) => "dlc",
        None => "",
    }
}

/// Title ID and content type, or empty strings when the name has no ID
pub fn switch_content_info(filename: &str) -> (String, String) {
    match extract_switch_title_id(filename) {
        Some(id) => {
            let content_type = switch_content_type(&id).to_string();
            (id, content_type)
        }
        None => (String::new(), String::new()),
    }
}
