//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `PHOTOMONTHS_*` environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig as ServerConfig;
use crate::index::IndexConfig;
use crate::listener::ListenerConfig as BackoffConfig;
use crate::month::{MonthKeyError, MonthZone};
use crate::service::ServiceConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub listener: ListenerSettings,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Asset library configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_library_path")]
    pub path: String,

    /// `utc`, `local`, or a fixed offset such as `+09:00`
    #[serde(default = "default_zone")]
    pub zone: String,
}

fn default_library_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("photomonths").join("library.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./photomonths_library.db".to_string())
}

fn default_zone() -> String {
    "local".to_string()
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: default_library_path(),
            zone: default_zone(),
        }
    }
}

impl LibraryConfig {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    pub fn month_zone(&self) -> Result<MonthZone, ConfigError> {
        self.zone.parse().map_err(|e: MonthKeyError| ConfigError::Invalid {
            field: "library.zone".to_string(),
            error: e.to_string(),
        })
    }
}

/// Month index and query limits
#[derive(Debug, Clone, Deserialize)]
pub struct IndexSettings {
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    #[serde(default = "default_ingest_batch_size")]
    pub ingest_batch_size: usize,

    #[serde(default = "default_prefetch_pages")]
    pub prefetch_pages: usize,

    #[serde(default = "default_month_list_cap")]
    pub month_list_cap: usize,

    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,

    /// Seconds between background trims, 0 disables
    #[serde(default = "default_trim_interval")]
    pub trim_interval_secs: u64,
}

fn default_max_page_size() -> usize {
    500
}

fn default_ingest_batch_size() -> usize {
    200
}

fn default_prefetch_pages() -> usize {
    1
}

fn default_month_list_cap() -> usize {
    240
}

fn default_max_buckets() -> usize {
    48
}

fn default_trim_interval() -> u64 {
    300
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            max_page_size: default_max_page_size(),
            ingest_batch_size: default_ingest_batch_size(),
            prefetch_pages: default_prefetch_pages(),
            month_list_cap: default_month_list_cap(),
            max_buckets: default_max_buckets(),
            trim_interval_secs: default_trim_interval(),
        }
    }
}

/// Change listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerSettings {
    #[serde(default = "default_listener_enabled")]
    pub enabled: bool,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// How long a removal suppresses late duplicates of earlier events
    #[serde(default = "default_tombstone_ttl")]
    pub tombstone_ttl_ms: u64,
}

fn default_listener_enabled() -> bool {
    true
}

fn default_initial_backoff() -> u64 {
    250
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_tombstone_ttl() -> u64 {
    30_000
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            enabled: default_listener_enabled(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            tombstone_ttl_ms: default_tombstone_ttl(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Page size when a request omits `limit`
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8086
}

fn default_page_size() -> i64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            default_page_size: default_page_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("photomonths").join("config.toml")),
            Some(PathBuf::from("/etc/photomonths/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("PHOTOMONTHS_LIBRARY_PATH") {
            self.library.path = path;
        }
        if let Ok(zone) = std::env::var("PHOTOMONTHS_ZONE") {
            self.library.zone = zone;
        }

        if let Ok(max) = std::env::var("PHOTOMONTHS_MAX_BUCKETS") {
            if let Ok(m) = max.parse() {
                self.index.max_buckets = m;
            }
        }

        if let Ok(host) = std::env::var("PHOTOMONTHS_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("PHOTOMONTHS_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        if let Ok(level) = std::env::var("PHOTOMONTHS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PHOTOMONTHS_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject settings the components cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.library.month_zone()?;

        let positive = [
            ("index.max_page_size", self.index.max_page_size),
            ("index.ingest_batch_size", self.index.ingest_batch_size),
            ("index.month_list_cap", self.index.month_list_cap),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    error: "must be greater than zero".to_string(),
                });
            }
        }

        if self.api.default_page_size < 1
            || self.api.default_page_size as usize > self.index.max_page_size
        {
            return Err(ConfigError::Invalid {
                field: "api.default_page_size".to_string(),
                error: format!("must be in 1..={}", self.index.max_page_size),
            });
        }

        if self.listener.initial_backoff_ms > self.listener.max_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "listener.initial_backoff_ms".to_string(),
                error: "must not exceed max_backoff_ms".to_string(),
            });
        }

        Ok(())
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            batch_size: self.index.ingest_batch_size,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            max_page_size: self.index.max_page_size,
            prefetch_pages: self.index.prefetch_pages,
            month_list_cap: self.index.month_list_cap,
            max_buckets: self.index.max_buckets,
        }
    }

    pub fn listener_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial_backoff: Duration::from_millis(self.listener.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.listener.max_backoff_ms),
            tombstone_ttl: Duration::from_millis(self.listener.tombstone_ttl_ms),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.api.host.clone(),
            port: self.api.port,
            default_page_size: self.api.default_page_size,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid setting {field}: {error}")]
    Invalid { field: String, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Photomonths Configuration
#
# Environment variables override these settings:
# - PHOTOMONTHS_LIBRARY_PATH
# - PHOTOMONTHS_ZONE
# - PHOTOMONTHS_MAX_BUCKETS
# - PHOTOMONTHS_API_HOST
# - PHOTOMONTHS_API_PORT
# - PHOTOMONTHS_LOG_LEVEL
# - PHOTOMONTHS_LOG_FORMAT

[library]
# SQLite file holding the media table
path = "~/.local/share/photomonths/library.db"

# Zone month boundaries are computed in: utc, local, or an offset like +09:00
zone = "local"

[index]
# Largest page a caller may request
max_page_size = 500

# Records read from the library per backfill step
ingest_batch_size = 200

# Pages loaded ahead of a served page (0 disables)
prefetch_pages = 1

# Most months returned by the month listing
month_list_cap = 240

# Month buckets kept in memory after a trim
max_buckets = 48

# Seconds between background trims (0 disables)
trim_interval_secs = 300

[listener]
# Keep the index current from the library's change feed
enabled = true

# Resubscription backoff (ms)
initial_backoff_ms = 250
max_backoff_ms = 30000

# How long a removal hides late duplicate events for the same asset (ms)
tombstone_ttl_ms = 30000

[api]
# API server host
host = "127.0.0.1"

# API server port
port = 8086

# Page size when a request omits limit
default_page_size = 60

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.index.max_page_size, 500);
        assert_eq!(config.index.ingest_batch_size, 200);
        assert_eq!(config.index.month_list_cap, 240);
        assert_eq!(config.library.zone, "local");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_template_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.api.port, 8086);
        assert_eq!(config.listener.max_backoff_ms, 30_000);
        assert_eq!(config.listener.tombstone_ttl_ms, 30_000);
        assert_eq!(config.index.trim_interval_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[library]\nzone = \"+09:00\"\n\n[index]\nmax_buckets = 4").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.index.max_buckets, 4);
        assert_eq!(config.index.max_page_size, 500);
        assert_eq!(
            config.library.month_zone().unwrap(),
            MonthZone::Fixed(FixedOffset::east_opt(9 * 3600).unwrap())
        );
        assert_eq!(config.service_config().max_buckets, 4);
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/nonexistent/photomonths.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[index\nmax_buckets = ").unwrap();
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = Config::default();
        config.library.zone = "mars".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = Config::default();
        config.api.default_page_size = 501;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.index.ingest_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_component_configs() {
        let config = Config::default();
        assert_eq!(config.index_config().batch_size, 200);
        assert_eq!(config.listener_config().initial_backoff, Duration::from_millis(250));
        assert_eq!(config.listener_config().tombstone_ttl, Duration::from_secs(30));
        assert_eq!(config.server_config().addr(), "127.0.0.1:8086");
    }
}
