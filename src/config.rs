// Configuration for theia
// XDG directory resolution, config.toml, and environment overrides

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scanner::{ScanSettings, VIDEO_EXTENSIONS};

const APP_NAME: &str = "theia";
const CONFIG_FILENAME: &str = "config.toml";
const DATABASE_FILENAME: &str = "theia.db";

/// Shape of config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub metadata: MetadataConfig,
    pub scanner: ScannerConfig,
    /// Share roots registered on startup
    pub shares: Vec<ShareConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8097,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Enables movie lookups
    pub tmdb_api_key: Option<String>,

    /// Enables TV episode lookups
    pub tvdb_api_key: Option<String>,

    /// Language requested from both providers
    pub language: String,

    /// Minimum spacing between two requests to the same provider
    pub rate_limit_window_ms: u64,

    pub http_timeout_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            tmdb_api_key: None,
            tvdb_api_key: None,
            language: "en".to_string(),
            rate_limit_window_ms: 1000,
            http_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Periodic background rescans (default: true)
    pub enabled: bool,

    /// Minutes between scheduled rescans (default: 360, 0 to disable)
    pub rescan_interval_minutes: u64,

    /// Rescan everything once after startup (default: false).
    /// Newly registered shares are always scanned.
    pub scan_on_startup: bool,

    /// Upper bound on listing a single directory
    pub enumerate_timeout_secs: u64,

    /// Concurrent metadata lookups per scanner
    pub worker_pool_size: usize,

    /// Lowercase, without dots
    pub video_extensions: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rescan_interval_minutes: 360,
            scan_on_startup: false,
            enumerate_timeout_secs: 45,
            worker_pool_size: 16,
            video_extensions: VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl ScannerConfig {
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            enumerate_timeout: Duration::from_secs(self.enumerate_timeout_secs.max(1)),
            worker_pool_size: self.worker_pool_size.max(1),
            video_extensions: self.video_extensions.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    pub name: String,
    /// `file://` URI or absolute path
    pub uri: String,
}

/// Where theia keeps its files
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// $XDG_CONFIG_HOME/theia
    pub config_dir: PathBuf,
    /// $XDG_DATA_HOME/theia, holds the database
    pub data_dir: PathBuf,
    /// $XDG_CACHE_HOME/theia
    pub cache_dir: PathBuf,
}

fn cwd() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// env > config file > platform dir > current directory
fn resolve_dir(
    env_var: &str,
    config_override: &Option<PathBuf>,
    platform: Option<PathBuf>,
    fallback: PathBuf,
) -> PathBuf {
    if let Ok(path) = std::env::var(env_var) {
        return PathBuf::from(path);
    }
    if let Some(path) = config_override {
        return path.clone();
    }
    platform.map(|dir| dir.join(APP_NAME)).unwrap_or(fallback)
}

impl AppPaths {
    pub fn new(overrides: &PathsConfig) -> Self {
        Self {
            config_dir: resolve_dir(
                "THEIA_CONFIG_DIR",
                &overrides.config_dir,
                dirs::config_dir(),
                cwd(),
            ),
            data_dir: resolve_dir(
                "THEIA_DATA_DIR",
                &overrides.data_dir,
                dirs::data_dir(),
                cwd(),
            ),
            cache_dir: resolve_dir(
                "THEIA_CACHE_DIR",
                &overrides.cache_dir,
                dirs::cache_dir(),
                cwd().join("cache"),
            ),
        }
    }

    /// Everything under the current directory
    pub fn current_dir() -> Self {
        let cwd = cwd();
        Self {
            config_dir: cwd.clone(),
            data_dir: cwd.clone(),
            cache_dir: cwd.join("cache"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILENAME)
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database_path().display())
    }

    pub fn config_file_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILENAME)
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        Ok(())
    }

    pub fn log_paths(&self) {
        tracing::info!("Configuration file: {}", self.config_file_path().display());
        tracing::info!("Data directory: {}", self.data_dir.display());
        tracing::info!("Cache directory: {}", self.cache_dir.display());
        tracing::debug!("Database path: {}", self.database_path().display());
    }
}

/// Effective configuration: environment over config.toml over defaults
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub paths: AppPaths,
    pub port: u16,
    pub bind_address: String,
    pub metadata: MetadataConfig,
    pub scanner: ScannerConfig,
    pub shares: Vec<ShareConfig>,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

impl AppConfig {
    pub fn load() -> Self {
        if env_flag("THEIA_PORTABLE") {
            tracing::info!("Running in portable mode (using current directory)");
            let mut config = Self::build(ConfigFile::default());
            config.paths = AppPaths::current_dir();
            return config;
        }

        let config_dir = std::env::var("THEIA_CONFIG_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::config_dir().map(|d| d.join(APP_NAME)))
            .unwrap_or_else(cwd);

        Self::build(Self::load_config_file(&config_dir))
    }

    fn load_config_file(config_dir: &Path) -> ConfigFile {
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            tracing::debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return ConfigFile::default();
        }

        let parsed = std::fs::read_to_string(&config_path)
            .map_err(|e| e.to_string())
            .and_then(|contents| {
                toml::from_str::<ConfigFile>(&contents).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load config file {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                ConfigFile::default()
            }
        }
    }

    fn build(file: ConfigFile) -> Self {
        let mut metadata = file.metadata;
        if let Ok(key) = std::env::var("TMDB_API_KEY") {
            metadata.tmdb_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("TVDB_API_KEY") {
            metadata.tvdb_api_key = Some(key);
        }
        // Blank keys count as unset
        metadata.tmdb_api_key = metadata.tmdb_api_key.filter(|k| !k.trim().is_empty());
        metadata.tvdb_api_key = metadata.tvdb_api_key.filter(|k| !k.trim().is_empty());

        Self {
            paths: AppPaths::new(&file.paths),
            port: std::env::var("THEIA_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(file.server.port),
            bind_address: std::env::var("THEIA_BIND_ADDRESS")
                .unwrap_or(file.server.bind_address),
            metadata,
            scanner: file.scanner,
            shares: file.shares,
        }
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.paths.database_url())
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.metadata.rate_limit_window_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata.http_timeout_secs.max(1))
    }

    pub fn log_config(&self) {
        self.paths.log_paths();
        tracing::info!("Server listening on {}:{}", self.bind_address, self.port);

        match (&self.metadata.tvdb_api_key, &self.metadata.tmdb_api_key) {
            (Some(_), Some(_)) => tracing::info!("Metadata providers: TheTVDB + TMDB"),
            (Some(_), None) => tracing::info!("Metadata providers: TheTVDB only"),
            (None, Some(_)) => tracing::info!("Metadata providers: TMDB only"),
            (None, None) => {
                tracing::warn!("No metadata providers configured, items stay unindexed");
                tracing::info!(
                    "Hint: set TVDB_API_KEY and TMDB_API_KEY or add them to config.toml"
                );
            }
        }

        tracing::info!("{} share(s) configured", self.shares.len());
        if self.scanner.enabled && self.scanner.rescan_interval_minutes > 0 {
            tracing::debug!(
                "Rescanning every {} minutes",
                self.scanner.rescan_interval_minutes
            );
        } else {
            tracing::debug!("Scheduled rescans disabled");
        }
    }
}
