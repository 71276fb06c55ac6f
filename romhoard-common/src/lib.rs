//! # RomHoard Common Library
//!
//! Shared code for the RomHoard service:
//! - Error type
//! - Configuration loading and root folder resolution
//! - SQLite initialization and schema migrations
//! - Event types and the broadcast event bus
//! - SSE helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
