//! romhoard - ROM library service
//!
//! Scans ROM folders into a SQLite catalogue, identifies files by hash,
//! and serves the library, downloads and collections over HTTP + SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use romhoard_common::config::{load_toml_config, resolve_root_folder, RootFolderInitializer};
use romhoard_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use romhoard::library::lookup::hasheous::HasheousService;
use romhoard::library::lookup::LookupService;
use romhoard::AppState;

const DEFAULT_PORT: u16 = 5780;
const DEFAULT_BIND: &str = "127.0.0.1";

/// Command-line arguments for romhoard
#[derive(Parser, Debug)]
#[command(name = "romhoard")]
#[command(about = "ROM library manager")]
#[command(version)]
struct Args {
    /// Port to listen on [default: 5780]
    #[arg(short, long, env = "ROMHOARD_PORT")]
    port: Option<u16>,

    /// Address to bind [default: 127.0.0.1]
    #[arg(short, long, env = "ROMHOARD_BIND")]
    bind: Option<String>,

    /// Folder holding the database and generated downloads
    #[arg(short, long, env = "ROMHOARD_ROOT_FOLDER")]
    root_folder: Option<String>,

    /// TOML configuration file
    #[arg(short, long, env = "ROMHOARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_toml_config(args.config.as_deref()).context("Failed to load configuration")?;

    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("romhoard={level},romhoard_common={level},tower_http={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting romhoard {}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), "ROMHOARD_ROOT_FOLDER", Some(&config));
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", initializer.root().display());

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = romhoard_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    romhoard::library::systems::sync_systems(&pool).await?;
    romhoard::library::presets::sync_presets(&pool).await?;
    let interrupted = romhoard::db::scan_jobs::fail_interrupted_jobs(&pool).await?;
    if interrupted > 0 {
        warn!(count = interrupted, "Marked scans interrupted by the last shutdown as failed");
    }
    let interrupted = romhoard::db::upload_jobs::fail_interrupted_uploads(&pool).await?;
    if interrupted > 0 {
        warn!(count = interrupted, "Marked uploads interrupted by the last shutdown as failed");
    }

    let mut lookup_services: Vec<Arc<dyn LookupService>> = Vec::new();
    if config.hasheous.enabled {
        match HasheousService::new(pool.clone(), &config.hasheous.base_url) {
            Ok(service) => {
                info!("Hasheous lookups enabled ({})", config.hasheous.base_url);
                lookup_services.push(Arc::new(service));
            }
            Err(e) => warn!("Hasheous lookups disabled: {}", e),
        }
    }

    let event_bus = EventBus::new(100);
    let state = AppState::new(pool, event_bus, initializer.downloads_dir())
        .with_media_dirs(initializer.uploads_dir(), initializer.images_dir())
        .with_lookup_services(lookup_services);

    let scheduler = tokio::spawn(romhoard::services::run_scheduler(
        state.clone(),
        config.scheduler.interval_secs,
    ));

    let app = romhoard::build_router(state.clone());

    let port = args.port.or(config.port).unwrap_or(DEFAULT_PORT);
    let bind = args
        .bind
        .or_else(|| config.bind.clone())
        .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    state.shutdown.cancel();
    if let Err(e) = scheduler.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
