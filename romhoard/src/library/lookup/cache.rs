//! Persistent cache of Hasheous lookups, including known misses

use romhoard_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{LookupResult, RomHashes};
use crate::models::System;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub hash_type: String,
    pub hash_value: String,
    pub matched: bool,
    pub raw_name: String,
    pub platform_name: String,
    pub source: String,
    pub game_name: String,
    pub region: String,
    pub revision: String,
    pub tags: Vec<String>,
}

fn map_entry(row: &SqliteRow) -> Result<CacheEntry> {
    let tags: String = row.get("tags");
    Ok(CacheEntry {
        hash_type: row.get("hash_type"),
        hash_value: row.get("hash_value"),
        matched: row.get("matched"),
        raw_name: row.get("raw_name"),
        platform_name: row.get("platform_name"),
        source: row.get("source"),
        game_name: row.get("game_name"),
        region: row.get("region"),
        revision: row.get("revision"),
        tags: serde_json::from_str(&tags)?,
    })
}

pub async fn get_entry(pool: &SqlitePool, hash_type: &str, hash_value: &str) -> Result<Option<CacheEntry>> {
    let row = sqlx::query(
        r#"
        SELECT hash_type, hash_value, matched, raw_name, platform_name, source,
               game_name, region, revision, tags
        FROM hasheous_cache
        WHERE hash_type = ? AND hash_value = ?
        "#,
    )
    .bind(hash_type)
    .bind(hash_value.to_lowercase())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(map_entry).transpose()
}

/// Record that a hash is unknown to the service
pub async fn save_miss(pool: &SqlitePool, hash_type: &str, hash_value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO hasheous_cache (hash_type, hash_value, matched)
        VALUES (?, ?, 0)
        ON CONFLICT(hash_type, hash_value) DO UPDATE SET matched = 0
        "#,
    )
    .bind(hash_type)
    .bind(hash_value.to_lowercase())
    .execute(pool)
    .await?;
    debug!(hash_type, hash = %hash_value, "Cached lookup miss");
    Ok(())
}

/// Record a raw match; parsed game fields are only written when given
pub async fn save_match(
    pool: &SqlitePool,
    hash_type: &str,
    hash_value: &str,
    raw_name: &str,
    platform_name: &str,
    source: &str,
    parsed: Option<&LookupResult>,
) -> Result<()> {
    let hash_value = hash_value.to_lowercase();
    match parsed {
        Some(parsed) => {
            sqlx::query(
                r#"
                INSERT INTO hasheous_cache (hash_type, hash_value, matched, raw_name, platform_name,
                                            source, game_name, region, revision, tags)
                VALUES (?, ?, 1, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(hash_type, hash_value) DO UPDATE SET
                    matched = 1,
                    raw_name = excluded.raw_name,
                    platform_name = excluded.platform_name,
                    source = excluded.source,
                    game_name = excluded.game_name,
                    region = excluded.region,
                    revision = excluded.revision,
                    tags = excluded.tags
                "#,
            )
            .bind(hash_type)
            .bind(&hash_value)
            .bind(raw_name)
            .bind(platform_name)
            .bind(source)
            .bind(&parsed.name)
            .bind(&parsed.region)
            .bind(&parsed.revision)
            .bind(serde_json::to_string(&parsed.tags)?)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO hasheous_cache (hash_type, hash_value, matched, raw_name, platform_name, source)
                VALUES (?, ?, 1, ?, ?, ?)
                ON CONFLICT(hash_type, hash_value) DO UPDATE SET
                    matched = 1,
                    raw_name = excluded.raw_name,
                    platform_name = excluded.platform_name,
                    source = excluded.source
                "#,
            )
            .bind(hash_type)
            .bind(&hash_value)
            .bind(raw_name)
            .bind(platform_name)
            .bind(source)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

/// Cached match for any of the hashes, most reliable hash first
///
/// Known misses and matches without a parsed game name fall through to the
/// next hash.
pub async fn lookup_cache(pool: &SqlitePool, system: &System, hashes: &RomHashes<'_>) -> Result<Option<LookupResult>> {
    for (hash_type, hash_value) in hashes.preferred() {
        let Some(entry) = get_entry(pool, hash_type, &hash_value).await? else {
            continue;
        };
        if !entry.matched || entry.game_name.is_empty() {
            continue;
        }

        debug!(
            system = %system.slug,
            hash_type,
            name = %entry.game_name,
            "Lookup cache hit"
        );
        let source = if entry.source.is_empty() {
            "hasheous".to_string()
        } else {
            entry.source
        };
        return Ok(Some(LookupResult {
            name: entry.game_name,
            region: entry.region,
            revision: entry.revision,
            tags: entry.tags,
            source,
            confidence: 0.9,
            raw_name: entry.raw_name,
        }));
    }
    Ok(None)
}
