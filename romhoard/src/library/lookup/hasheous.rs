//! Hasheous API client
//!
//! `POST {base}/Lookup/ByHash` with one hash per request. A 404 is cached as
//! a known miss; other failures are not cached.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::cache;
use super::{LookupError, LookupResult, LookupService, RomHashes};
use crate::library::parser::parse_rom_filename;
use crate::models::System;

const API_TIMEOUT: Duration = Duration::from_secs(30);
const API_RETRIES: u32 = 1;
const REQUEST_SPACING: Duration = Duration::from_millis(500);
const USER_AGENT: &str = concat!("RomHoard/", env!("CARGO_PKG_VERSION"));

static CATALOGUE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{3,4}\s*-\s*").unwrap());

/// Hasheous platform names mapped to system slugs
const PLATFORM_TO_SLUG: &[(&str, &str)] = &[
    ("Nintendo Super Nintendo Entertainment System", "snes"),
    ("Nintendo Game Boy", "gb"),
    ("Nintendo Game Boy Color", "gbc"),
    ("Nintendo Game Boy Advance", "gba"),
    ("Nintendo Entertainment System", "nes"),
    ("Super Nintendo Entertainment System", "snes"),
    ("Nintendo 64", "n64"),
    ("Nintendo DS", "nds"),
    ("Nintendo 3DS", "3ds"),
    ("Nintendo GameCube", "gc"),
    ("Nintendo Wii", "wii"),
    ("Nintendo Wii U", "wiiu"),
    ("Nintendo Switch", "switch"),
    ("Nintendo Virtual Boy", "vb"),
    ("Pokemon Mini", "pokemini"),
    ("Sega Master System", "sms"),
    ("Sega Genesis", "genesis"),
    ("Sega Mega Drive", "genesis"),
    ("Sega Game Gear", "gg"),
    ("Sega CD", "segacd"),
    ("Sega 32X", "32x"),
    ("Sega Saturn", "saturn"),
    ("Sega Dreamcast", "dreamcast"),
    ("Sega SG-1000", "sg1000"),
    ("Sony PlayStation", "ps1"),
    ("Sony PlayStation 2", "ps2"),
    ("Sony PlayStation 3", "ps3"),
    ("Sony PlayStation Portable", "psp"),
    ("Sony PlayStation Vita", "psvita"),
    ("Atari 2600", "2600"),
    ("Atari 5200", "5200"),
    ("Atari 7800", "7800"),
    ("Atari Lynx", "lynx"),
    ("Atari Jaguar", "jaguar"),
    ("Atari ST", "atarist"),
    ("NEC PC Engine", "pce"),
    ("TurboGrafx-16", "pce"),
    ("NEC PC Engine SuperGrafx", "sgfx"),
    ("NEC PC-FX", "pcfx"),
    ("Neo Geo Pocket", "ngp"),
    ("Neo Geo Pocket Color", "ngpc"),
    ("Neo Geo CD", "neogeocd"),
    ("Neo Geo", "neogeo"),
    ("Arcade", "arcade"),
    ("MSX", "msx"),
    ("MSX2", "msx"),
    ("ColecoVision", "coleco"),
    ("Intellivision", "intv"),
    ("Vectrex", "vectrex"),
    ("WonderSwan", "ws"),
    ("WonderSwan Color", "wsc"),
    ("Bandai WonderSwan", "ws"),
    ("Bandai WonderSwan Color", "wsc"),
    ("Watara Supervision", "supervision"),
    ("Tiger Game.com", "gamecom"),
    ("Commodore 64", "c64"),
    ("Commodore Amiga", "amiga"),
    ("3DO", "3do"),
    ("Philips CD-i", "cdi"),
];

pub fn platform_slug(platform_name: &str) -> Option<&'static str> {
    PLATFORM_TO_SLUG
        .iter()
        .find(|(name, _)| *name == platform_name)
        .map(|(_, slug)| *slug)
}

/// Strip No-Intro catalogue numbers such as "0983 - "
pub fn clean_name(name: &str) -> String {
    CATALOGUE_PREFIX.replace(name, "").trim().to_string()
}

fn str_at<'v>(value: &'v Value, path: &[&str]) -> &'v str {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return "",
        }
    }
    current.as_str().unwrap_or("")
}

fn platform_matches(platform_name: &str, system: &System) -> bool {
    if platform_name.is_empty() || platform_name.eq_ignore_ascii_case("arcade") {
        return true;
    }
    match platform_slug(platform_name) {
        Some(slug) => slug == system.slug,
        None => {
            warn!(platform = %platform_name, "Hasheous returned unknown platform");
            false
        }
    }
}

fn response_source(response: &Value) -> String {
    let source = str_at(response, &["signature", "rom", "signatureSource"]);
    if source.is_empty() {
        "hasheous".to_string()
    } else {
        source.to_string()
    }
}

/// Turn a Hasheous response into a match for the system
///
/// `None` when there is no name or the platform belongs to another system.
pub fn parse_response(response: &Value, system: &System) -> Option<LookupResult> {
    let mut raw_name = str_at(response, &["name"]);
    if raw_name.is_empty() {
        raw_name = str_at(response, &["signature", "game", "name"]);
    }
    if raw_name.is_empty() {
        return None;
    }

    let platform_name = str_at(response, &["platform", "name"]);
    if !platform_matches(platform_name, system) {
        debug!(platform = %platform_name, system = %system.slug, "Hasheous platform mismatch");
        return None;
    }

    let (region, revision, tags) = match str_at(response, &["signature", "rom", "name"]) {
        "" => (String::new(), String::new(), Vec::new()),
        rom_name => {
            let parsed = parse_rom_filename(rom_name);
            (parsed.region, parsed.revision, parsed.tags)
        }
    };

    Some(LookupResult {
        name: clean_name(raw_name),
        region,
        revision,
        tags,
        source: response_source(response),
        confidence: 0.9,
        raw_name: raw_name.to_string(),
    })
}

/// Minimum spacing between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct HasheousService {
    pool: SqlitePool,
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: RateLimiter,
}

impl HasheousService {
    pub fn new(pool: SqlitePool, base_url: &str) -> Result<Self, LookupError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;

        Ok(Self {
            pool,
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::new(REQUEST_SPACING),
        })
    }

    fn request_body(hash_type: &str, hash_value: &str) -> Value {
        let key = match hash_type {
            "sha1" => "shA1",
            "md5" => "mD5",
            _ => "crc",
        };
        json!({ key: hash_value })
    }

    /// Raw response for one hash: cache, then the API
    async fn fetch(&self, hash_type: &str, hash_value: &str) -> Result<Option<Value>, LookupError> {
        if let Some(entry) = cache::get_entry(&self.pool, hash_type, hash_value).await? {
            if !entry.matched {
                return Ok(None);
            }
            return Ok(Some(json!({
                "name": entry.raw_name,
                "platform": { "name": entry.platform_name },
                "signature": { "rom": { "signatureSource": entry.source } },
            })));
        }

        let url = format!("{}/Lookup/ByHash", self.base_url);
        let body = Self::request_body(hash_type, hash_value);

        let mut attempt = 0;
        let response = loop {
            self.rate_limiter.wait().await;
            debug!(hash_type, hash = %hash_value, "Querying Hasheous");
            match self.http_client.post(&url).json(&body).send().await {
                Ok(response) => break response,
                Err(e) if e.is_timeout() && attempt < API_RETRIES => {
                    attempt += 1;
                    info!("Hasheous request timed out, retrying ({}/{})", attempt, API_RETRIES);
                }
                Err(e) => return Err(LookupError::Network(e.to_string())),
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            cache::save_miss(&self.pool, hash_type, hash_value).await?;
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text.chars().take(200).collect::<String>(), "Hasheous API error");
            return Ok(None);
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| LookupError::Parse(e.to_string()))?;
        cache::save_match(
            &self.pool,
            hash_type,
            hash_value,
            str_at(&value, &["name"]),
            str_at(&value, &["platform", "name"]),
            &response_source(&value),
            None,
        )
        .await?;
        Ok(Some(value))
    }
}

#[async_trait]
impl LookupService for HasheousService {
    fn name(&self) -> &str {
        "hasheous"
    }

    fn is_available(&self, _system: &System) -> bool {
        true
    }

    /// MAME-style sets are never looked up: their chip CRCs are shared
    /// between games
    async fn lookup(&self, system: &System, hashes: &RomHashes<'_>) -> Result<Option<LookupResult>, LookupError> {
        if system.archive_as_rom {
            return Ok(None);
        }

        for (hash_type, hash_value) in hashes.preferred() {
            let Some(response) = self.fetch(hash_type, &hash_value).await? else {
                continue;
            };

            let parsed = parse_response(&response, system);
            if let Some(parsed) = &parsed {
                cache::save_match(
                    &self.pool,
                    hash_type,
                    &hash_value,
                    &parsed.raw_name,
                    str_at(&response, &["platform", "name"]),
                    &parsed.source,
                    Some(parsed),
                )
                .await?;
            }
            return Ok(parsed);
        }
        Ok(None)
    }
}
