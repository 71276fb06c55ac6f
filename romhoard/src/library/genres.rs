//! Genre name normalization
//!
//! Metadata services disagree on genre spelling; names are mapped onto one
//! canonical vocabulary before they are stored. Hierarchical names use
//! `"Parent / Child"`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Separator between hierarchy levels
pub const HIERARCHY_SEPARATOR: &str = " / ";

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

const GENRE_MAP: &[(&str, &str)] = &[
    ("Role Playing Game", "RPG"),
    ("Japanese RPG", "JRPG"),
    ("Dungeon Crawler RPG", "Dungeon Crawler"),
    ("Shooter / FPV", "FPS"),
    ("Shooter / TPV", "Third Person Shooter"),
    ("Shooter / Run and Gun", "Run and Gun"),
    ("Asiatic board game", "Board Game"),
    ("Board game", "Board Game"),
    ("Adventure / Point and Click", "Point and Click"),
    ("Adventure / Survival Horror", "Survival Horror"),
    ("Adventure / Visual Novel", "Visual Novel"),
    ("Adventure / Text", "Text Adventure"),
    ("Fishing", "Hunting and Fishing"),
    ("Hunting", "Hunting and Fishing"),
    ("Music and Dancing", "Rhythm"),
    ("Various", "Misc"),
    ("Various / Electro- Mechanical", "Misc"),
    ("Various / Print Club", "Misc"),
    ("Various / Utilities", "Misc"),
    ("Horse racing", "Racing"),
    ("Racing, Driving", "Racing"),
    ("Racing FPV", "Racing"),
    ("Racing TPV", "Racing"),
    ("Motorcycle race FPV", "Racing"),
    ("Motorcycle race TPV", "Racing"),
];

/// Canonical name for a genre; unknown names pass through unchanged
pub fn normalize_genre(name: &str) -> String {
    let name = name.trim();
    GENRE_MAP
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Normalize a list, keeping the first occurrence of each canonical name
pub fn normalize_genres<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let normalized = normalize_genre(name.as_ref());
        if normalized.is_empty() {
            continue;
        }
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

/// Last hierarchy segment
pub fn short_name(name: &str) -> &str {
    match name.rfind(HIERARCHY_SEPARATOR) {
        Some(idx) => &name[idx + HIERARCHY_SEPARATOR.len()..],
        None => name,
    }
}

/// Parent name of a hierarchical genre
pub fn parent_name(name: &str) -> Option<&str> {
    name.rfind(HIERARCHY_SEPARATOR).map(|idx| &name[..idx])
}

/// Names to show for a game: a parent is hidden when one of its children is
/// also present
pub fn display_genres<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| {
            let prefix = format!("{}{}", name, HIERARCHY_SEPARATOR);
            !names.iter().any(|other| other.as_ref().starts_with(&prefix))
        })
        .map(String::from)
        .collect()
}

/// URL slug: lowercase, runs of other characters collapsed to `-`
pub fn slugify(name: &str) -> String {
    NON_ALNUM
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}
