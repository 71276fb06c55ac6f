//! Database access layer
//!
//! One module per table group. Functions take the pool and return
//! `romhoard_common::Result`.

pub mod collections;
pub mod devices;
pub mod download_jobs;
pub mod games;
pub mod genres;
pub mod images;
pub mod presets;
pub mod rom_sets;
pub mod roms;
pub mod scan_jobs;
pub mod scan_paths;
pub mod settings;
pub mod systems;
pub mod upload_jobs;

use chrono::{DateTime, NaiveDateTime, Utc};
use romhoard_common::{Error, Result};

/// Parse a stored timestamp
///
/// Accepts RFC 3339 (written by the service) and SQLite's
/// `CURRENT_TIMESTAMP` form.
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| parse_timestamp(&v))
        .transpose()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let a = parse_timestamp("2024-03-01T10:20:30+00:00").unwrap();
        let b = parse_timestamp("2024-03-01 10:20:30").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_err());
        assert_eq!(parse_optional_timestamp(None).unwrap(), None);
        assert_eq!(parse_optional_timestamp(Some(String::new())).unwrap(), None);
    }
}
