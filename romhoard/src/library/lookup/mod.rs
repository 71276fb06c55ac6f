//! Hash-based ROM identification
//!
//! Lookup services turn ROM hashes into canonical game names. Results from
//! the Hasheous service are cached in `hasheous_cache`; the cache is always
//! consulted first, even when network lookups are disabled.

pub mod cache;
pub mod hasheous;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::System;

pub use cache::lookup_cache;
pub use hasheous::HasheousService;

/// Standardized match from any lookup service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupResult {
    /// Game name without region tags
    pub name: String,
    pub region: String,
    pub revision: String,
    pub tags: Vec<String>,
    /// Matching database, e.g. "NoIntros", "Redump" or "hasheous"
    pub source: String,
    /// 0.0-1.0
    pub confidence: f64,
    /// Name as the service returned it
    pub raw_name: String,
}

/// Hashes known for a ROM; empty strings are absent
#[derive(Debug, Clone, Copy, Default)]
pub struct RomHashes<'a> {
    pub crc32: &'a str,
    pub sha1: &'a str,
    pub md5: &'a str,
}

impl<'a> RomHashes<'a> {
    pub fn is_empty(&self) -> bool {
        self.crc32.is_empty() && self.sha1.is_empty() && self.md5.is_empty()
    }

    /// Present hashes, most reliable first (sha1, md5, crc32), lowercased
    pub fn preferred(&self) -> Vec<(&'static str, String)> {
        [("sha1", self.sha1), ("md5", self.md5), ("crc32", self.crc32)]
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(kind, value)| (kind, value.to_lowercase()))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Database(#[from] romhoard_common::Error),
}

#[async_trait]
pub trait LookupService: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self, system: &System) -> bool;

    async fn lookup(&self, system: &System, hashes: &RomHashes<'_>) -> Result<Option<LookupResult>, LookupError>;
}

/// Look a ROM up: cache first, then each available service in order
///
/// Service errors are logged and the next service is tried. With
/// `use_network` false only the cache is consulted.
pub async fn lookup_rom(
    pool: &SqlitePool,
    services: &[Arc<dyn LookupService>],
    system: &System,
    hashes: &RomHashes<'_>,
    use_network: bool,
) -> Result<Option<LookupResult>, LookupError> {
    if let Some(cached) = lookup_cache(pool, system, hashes).await? {
        return Ok(Some(cached));
    }
    if !use_network {
        return Ok(None);
    }

    for service in services {
        if !service.is_available(system) {
            debug!(service = service.name(), system = %system.slug, "Lookup service not available");
            continue;
        }

        match service.lookup(system, hashes).await {
            Ok(Some(result)) => {
                info!(
                    service = service.name(),
                    system = %system.slug,
                    name = %result.name,
                    region = %result.region,
                    "Lookup matched"
                );
                return Ok(Some(result));
            }
            Ok(None) => {}
            Err(e) => warn!(service = service.name(), "Lookup failed: {}", e),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        calls: AtomicUsize,
        result: Option<LookupResult>,
        fail: bool,
    }

    #[async_trait]
    impl LookupService for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn is_available(&self, _system: &System) -> bool {
            true
        }

        async fn lookup(&self, _system: &System, _hashes: &RomHashes<'_>) -> Result<Option<LookupResult>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LookupError::Network("unreachable".into()));
            }
            Ok(self.result.clone())
        }
    }

    fn result(name: &str) -> LookupResult {
        LookupResult {
            name: name.into(),
            region: "USA".into(),
            revision: String::new(),
            tags: vec![],
            source: "test".into(),
            confidence: 0.9,
            raw_name: name.into(),
        }
    }

    #[test]
    fn test_preferred_hash_order() {
        let hashes = RomHashes { crc32: "ABCD1234", sha1: "FFEE", md5: "" };
        assert_eq!(
            hashes.preferred(),
            vec![("sha1", "ffee".to_string()), ("crc32", "abcd1234".to_string())]
        );
        assert!(RomHashes::default().is_empty());
    }

    #[tokio::test]
    async fn test_failing_service_is_skipped() {
        let pool = crate::db::test_support::memory_pool_with_systems().await;
        let system = crate::db::systems::get_system(&pool, "gba").await.unwrap().unwrap();

        let failing = Arc::new(Fixed { calls: AtomicUsize::new(0), result: None, fail: true });
        let matching = Arc::new(Fixed { calls: AtomicUsize::new(0), result: Some(result("Metroid Fusion")), fail: false });
        let services: Vec<Arc<dyn LookupService>> = vec![failing.clone(), matching.clone()];

        let hashes = RomHashes { crc32: "12345678", ..Default::default() };
        let found = lookup_rom(&pool, &services, &system, &hashes, true).await.unwrap();
        assert_eq!(found.unwrap().name, "Metroid Fusion");
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);

        // Network disabled: services are never called
        let none = lookup_rom(&pool, &services, &system, &hashes, false).await.unwrap();
        assert!(none.is_none());
        assert_eq!(matching.calls.load(Ordering::SeqCst), 1);
    }
}
