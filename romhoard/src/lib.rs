//! romhoard library interface
//!
//! The binary wires these pieces together; integration tests drive the router
//! directly.

pub mod api;
pub mod db;
pub mod error;
pub mod library;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use romhoard_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::library::lookup::LookupService;

/// Application state shared across handlers and background jobs
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Cancellation tokens for running scans
    pub scan_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Serializes the active-scan check with job creation
    pub scan_start_lock: Arc<Mutex<()>>,
    /// Hash lookup services, in order of preference
    pub lookup_services: Arc<Vec<Arc<dyn LookupService>>>,
    /// Where multi-game bundles are written
    pub downloads_dir: PathBuf,
    /// Upload jobs receive their files in `<uploads_dir>/<job id>/`
    pub uploads_dir: PathBuf,
    /// Artwork imported from collection archives
    pub images_dir: PathBuf,
    /// Cancelled when the process shuts down
    pub shutdown: CancellationToken,
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Uploads and imported images default to subfolders of `downloads_dir`
    pub fn new(db: SqlitePool, event_bus: EventBus, downloads_dir: PathBuf) -> Self {
        Self {
            uploads_dir: downloads_dir.join("uploads"),
            images_dir: downloads_dir.join("images"),
            db,
            event_bus,
            scan_tokens: Arc::new(RwLock::new(HashMap::new())),
            scan_start_lock: Arc::new(Mutex::new(())),
            lookup_services: Arc::new(Vec::new()),
            downloads_dir,
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_media_dirs(mut self, uploads_dir: PathBuf, images_dir: PathBuf) -> Self {
        self.uploads_dir = uploads_dir;
        self.images_dir = images_dir;
        self
    }

    pub fn with_lookup_services(mut self, services: Vec<Arc<dyn LookupService>>) -> Self {
        self.lookup_services = Arc::new(services);
        self
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::event_routes())
        .merge(api::system_routes())
        .merge(api::game_routes())
        .merge(api::download_routes())
        .merge(api::scan_routes())
        .merge(api::settings_routes())
        .merge(api::device_routes())
        .merge(api::collection_routes())
        .merge(api::upload_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
