//! Database initialization
//!
//! Creates the database on first run, applies the full schema with
//! `CREATE TABLE IF NOT EXISTS`, runs versioned migrations for older
//! databases, and seeds default runtime settings.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Per-connection pragmas; the pool hands out several connections
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers while a scan writes
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema, for tests
///
/// Limited to a single connection: every `:memory:` connection would
/// otherwise see its own empty database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table, run migrations and seed default settings
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;

    // Library catalogue
    create_systems_table(pool).await?;
    create_genres_table(pool).await?;
    create_games_table(pool).await?;
    create_game_genres_table(pool).await?;
    create_rom_sets_table(pool).await?;
    create_roms_table(pool).await?;
    create_game_images_table(pool).await?;
    create_hasheous_cache_table(pool).await?;

    // Jobs
    create_scan_paths_table(pool).await?;
    create_scan_jobs_table(pool).await?;
    create_download_jobs_table(pool).await?;
    create_upload_jobs_table(pool).await?;

    // Devices and collections
    create_devices_table(pool).await?;
    create_device_presets_table(pool).await?;
    create_collections_table(pool).await?;
    create_collection_entries_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Values are stored as JSON text.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "region_priorities", r#"["USA", "Europe", "Japan", "World"]"#).await?;
    ensure_setting(pool, "download_expiry_hours", "1").await?;
    ensure_setting(pool, "scan_schedule_check_secs", "600").await?;
    ensure_setting(pool, "database_max_lock_wait_ms", "5000").await?;
    ensure_setting(pool, "library_root", "\"\"").await?;

    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// A missing setting is created; a NULL value is reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value {
        None => {
            // INSERT OR IGNORE: concurrent initializers may race past the check
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;

            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some(None) => {
            sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;

            warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
        }
        Some(Some(_)) => {}
    }

    Ok(())
}

/// Create the systems table
///
/// Extension and folder lists are JSON arrays.
pub async fn create_systems_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS systems (
            slug TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            extensions TEXT NOT NULL DEFAULT '[]',
            exclusive_extensions TEXT NOT NULL DEFAULT '[]',
            folder_names TEXT NOT NULL DEFAULT '[]',
            archive_as_rom INTEGER NOT NULL DEFAULT 0,
            release_year INTEGER,
            sort_order INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_genres_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS genres (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            slug TEXT NOT NULL,
            parent_id INTEGER REFERENCES genres(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the games table
///
/// `default_rom_set_id` points into `rom_sets`, which is created afterwards;
/// SQLite resolves foreign keys when rows are written.
pub async fn create_games_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS games (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            system_slug TEXT NOT NULL REFERENCES systems(slug),
            name_source TEXT NOT NULL DEFAULT 'filename',
            default_rom_set_id INTEGER REFERENCES rom_sets(id) ON DELETE SET NULL,
            screenscraper_id INTEGER,
            description TEXT NOT NULL DEFAULT '',
            release_date TEXT,
            developer TEXT NOT NULL DEFAULT '',
            publisher TEXT NOT NULL DEFAULT '',
            players TEXT NOT NULL DEFAULT '',
            rating INTEGER,
            rating_source TEXT NOT NULL DEFAULT '',
            metadata_updated_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            UNIQUE (name, system_slug),
            CHECK (rating IS NULL OR (rating >= 0 AND rating <= 100))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_games_system ON games(system_slug)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_game_genres_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS game_genres (
            game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
            genre_id INTEGER NOT NULL REFERENCES genres(id) ON DELETE CASCADE,
            PRIMARY KEY (game_id, genre_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_rom_sets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rom_sets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
            region TEXT NOT NULL DEFAULT '',
            revision TEXT NOT NULL DEFAULT '',
            source_path TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMP NOT NULL,
            UNIQUE (game_id, region, revision, source_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the roms table
///
/// Archived ROMs carry `archive_path` and `path_in_archive`; loose ROMs leave
/// both empty.
pub async fn create_roms_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS roms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rom_set_id INTEGER NOT NULL REFERENCES rom_sets(id) ON DELETE CASCADE,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            archive_path TEXT NOT NULL DEFAULT '',
            path_in_archive TEXT NOT NULL DEFAULT '',
            crc32 TEXT NOT NULL DEFAULT '',
            sha1 TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '[]',
            rom_number TEXT NOT NULL DEFAULT '',
            disc INTEGER,
            content_type TEXT NOT NULL DEFAULT '',
            switch_title_id TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMP NOT NULL,
            CHECK (file_size >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for sql in [
        "CREATE INDEX IF NOT EXISTS idx_roms_file_path ON roms(file_path)",
        "CREATE INDEX IF NOT EXISTS idx_roms_archive_path ON roms(archive_path)",
        "CREATE INDEX IF NOT EXISTS idx_roms_crc32 ON roms(crc32)",
        "CREATE INDEX IF NOT EXISTS idx_roms_sha1 ON roms(sha1)",
        "CREATE INDEX IF NOT EXISTS idx_roms_rom_set ON roms(rom_set_id)",
    ] {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}

pub async fn create_game_images_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS game_images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
            file_path TEXT NOT NULL UNIQUE,
            file_name TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            image_type TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT 'scanned',
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_game_images_game ON game_images(game_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the hash lookup cache
///
/// Stores both matches and known misses (`matched = 0`).
pub async fn create_hasheous_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hasheous_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hash_type TEXT NOT NULL CHECK (hash_type IN ('crc32', 'sha1', 'md5')),
            hash_value TEXT NOT NULL,
            matched INTEGER NOT NULL DEFAULT 0,
            raw_name TEXT NOT NULL DEFAULT '',
            platform_name TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT '',
            game_name TEXT NOT NULL DEFAULT '',
            region TEXT NOT NULL DEFAULT '',
            revision TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (hash_type, hash_value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_scan_paths_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_paths (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            use_hasheous INTEGER NOT NULL DEFAULT 1,
            schedule_enabled INTEGER NOT NULL DEFAULT 0,
            schedule_interval TEXT NOT NULL DEFAULT 'daily'
                CHECK (schedule_interval IN ('hourly', 'daily', 'weekly', 'monthly')),
            last_scanned TIMESTAMP,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the scan jobs table
///
/// Live counters are written while the scan runs; result counters once it
/// completes.
pub async fn create_scan_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_jobs (
            job_id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled')),
            use_hasheous INTEGER NOT NULL DEFAULT 1,
            files_processed INTEGER NOT NULL DEFAULT 0,
            roms_found INTEGER NOT NULL DEFAULT 0,
            images_found INTEGER NOT NULL DEFAULT 0,
            current_directory TEXT NOT NULL DEFAULT '',
            added INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            deleted_roms INTEGER NOT NULL DEFAULT 0,
            images_added INTEGER NOT NULL DEFAULT 0,
            images_skipped INTEGER NOT NULL DEFAULT 0,
            identified INTEGER NOT NULL DEFAULT 0,
            errors TEXT NOT NULL DEFAULT '[]',
            started_at TIMESTAMP NOT NULL,
            scan_started_at TIMESTAMP,
            completed_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_jobs_status ON scan_jobs(status)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_download_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS download_jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled')),
            game_ids TEXT NOT NULL DEFAULT '[]',
            system_slug TEXT NOT NULL,
            device_id INTEGER REFERENCES devices(id) ON DELETE SET NULL,
            games_total INTEGER NOT NULL DEFAULT 0,
            games_processed INTEGER NOT NULL DEFAULT 0,
            current_game TEXT NOT NULL DEFAULT '',
            bytes_written INTEGER NOT NULL DEFAULT 0,
            file_path TEXT NOT NULL DEFAULT '',
            file_name TEXT NOT NULL DEFAULT '',
            file_size INTEGER NOT NULL DEFAULT 0,
            games_included INTEGER NOT NULL DEFAULT 0,
            games_failed INTEGER NOT NULL DEFAULT 0,
            errors TEXT NOT NULL DEFAULT '[]',
            created_at TIMESTAMP NOT NULL,
            completed_at TIMESTAMP,
            expires_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the upload_jobs table
///
/// `unidentified` holds the names of uploaded files still waiting for a
/// system assignment.
pub async fn create_upload_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL
                CHECK (status IN ('uploading', 'processing', 'awaiting', 'completed', 'failed')),
            use_hasheous INTEGER NOT NULL DEFAULT 1,
            files_total INTEGER NOT NULL DEFAULT 0,
            files_uploaded INTEGER NOT NULL DEFAULT 0,
            bytes_total INTEGER NOT NULL DEFAULT 0,
            bytes_uploaded INTEGER NOT NULL DEFAULT 0,
            files_processed INTEGER NOT NULL DEFAULT 0,
            current_file TEXT NOT NULL DEFAULT '',
            games_added INTEGER NOT NULL DEFAULT 0,
            games_skipped INTEGER NOT NULL DEFAULT 0,
            games_failed INTEGER NOT NULL DEFAULT 0,
            unidentified TEXT NOT NULL DEFAULT '[]',
            errors TEXT NOT NULL DEFAULT '[]',
            created_at TIMESTAMP NOT NULL,
            completed_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the devices table
///
/// `system_paths` maps a system slug to either a folder name or an object
/// `{"folder": ..., "game_folders": bool}`.
pub async fn create_devices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            root_path TEXT NOT NULL DEFAULT 'Roms/',
            system_paths TEXT NOT NULL DEFAULT '{}',
            include_images INTEGER NOT NULL DEFAULT 0,
            image_type TEXT NOT NULL DEFAULT 'cover'
                CHECK (image_type IN ('cover', 'screenshot')),
            image_path_template TEXT NOT NULL DEFAULT '',
            image_max_width INTEGER,
            applied_preset TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_device_presets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS device_presets (
            slug TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '[]',
            is_builtin INTEGER NOT NULL DEFAULT 0,
            folders TEXT,
            images TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_collections_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            creator TEXT NOT NULL DEFAULT 'local',
            is_public INTEGER NOT NULL DEFAULT 1,
            is_community INTEGER NOT NULL DEFAULT 0,
            is_favorites INTEGER NOT NULL DEFAULT 0,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            UNIQUE (creator, slug),
            CHECK (length(description) <= 1000)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one favorites collection
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_collections_favorites ON collections(is_favorites) WHERE is_favorites = 1",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_collection_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collection_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
            game_name TEXT NOT NULL,
            system_slug TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            notes TEXT NOT NULL DEFAULT '',
            added_at TIMESTAMP NOT NULL,
            UNIQUE (collection_id, game_name, system_slug)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
