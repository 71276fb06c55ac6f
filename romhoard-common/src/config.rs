//! Configuration loading and root folder resolution
//!
//! Two tiers of configuration:
//! 1. **TOML bootstrap**: root folder, listen address, logging, external
//!    service endpoints. Read once at startup.
//! 2. **Database runtime**: everything else lives in the `settings` table
//!    and can change while the service runs.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "ROMHOARD_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "romhoard.db";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Root folder holding the database and generated downloads
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port
    #[serde(default)]
    pub port: Option<u16>,

    /// HTTP bind address
    #[serde(default)]
    pub bind: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub hasheous: HasheousConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Hash lookup service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HasheousConfig {
    /// API base, without trailing slash
    #[serde(default = "default_hasheous_base_url")]
    pub base_url: String,

    /// Master switch for network lookups (cache is always consulted)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for HasheousConfig {
    fn default() -> Self {
        Self {
            base_url: default_hasheous_base_url(),
            enabled: true,
        }
    }
}

/// Background scheduler configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SchedulerConfig {
    /// Overrides the `scan_schedule_check_secs` setting when present
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_hasheous_base_url() -> String {
    "https://hasheous.org/api/v1".to_string()
}

fn default_true() -> bool {
    true
}

/// Load the TOML bootstrap configuration
///
/// An explicit path must exist and parse. Without one, the platform default
/// locations are tried and a missing file just yields the defaults.
pub fn load_toml_config(explicit_path: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit_path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        return parse_toml_config(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)));
    }

    match default_config_file() {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            match parse_toml_config(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    Ok(config)
                }
                Err(e) => {
                    warn!("Ignoring invalid config file {}: {}", path.display(), e);
                    Ok(TomlConfig::default())
                }
            }
        }
        None => Ok(TomlConfig::default()),
    }
}

/// Parse TOML text into a [`TomlConfig`]
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config: Option<&TomlConfig>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(root_folder) = config.and_then(|c| c.root_folder.clone()) {
        return root_folder;
    }

    default_root_folder()
}

/// Get default configuration file path for the platform, if one exists
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("romhoard").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/romhoard/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("romhoard"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/romhoard"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("romhoard"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/romhoard"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("romhoard"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\romhoard"))
    } else {
        PathBuf::from("./romhoard_data")
    }
}

/// Creates the root folder layout and names the files inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root folder and its working directories if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root.exists() {
            info!("Creating root folder: {}", self.root.display());
        }
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.downloads_dir())?;
        std::fs::create_dir_all(self.uploads_dir())?;
        std::fs::create_dir_all(self.images_dir())?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE_NAME)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Files received by upload jobs before they are filed into the library
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Artwork imported from collection archives
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }
}
