//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (TELECHAT_*), used as defaults
//! - TOML configuration file
//! - Command line arguments (`--config`)

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use telechat_core::{DistributorConfig, IgnoredBroadcastPolicy};
use telechat_protocol::DEFAULT_MAX_LINE_LENGTH;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "telechat", version, about = "Telnet chat server")]
pub struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, short, env = "TELECHAT_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Telnet port.
    #[serde(default = "default_telnet_port")]
    pub telnet_port: u16,

    /// HTTP facade configuration.
    #[serde(default)]
    pub http: HttpConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Delivery behaviour.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Chat history storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP facade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Serve `/chat` and `/health`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP port.
    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent telnet connections.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Maximum input line length in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// Delivery configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// What happens to broadcasts from ignored users.
    #[serde(default)]
    pub ignored_broadcasts: IgnoredBroadcastPolicy,
}

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite file.
    Sqlite,
    /// In-process, lost on exit.
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend to use.
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// SQLite database path.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives, overridden by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Base path of the daily log file, e.g. `logs/telechat`. Console only
    /// when unset.
    #[serde(default = "default_log_file")]
    pub file: Option<String>,
}

// Default value functions
fn default_host() -> String {
    std::env::var("TELECHAT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_telnet_port() -> u16 {
    env_parse("TELECHAT_TELNET_PORT").unwrap_or(5555)
}

fn default_http_port() -> u16 {
    env_parse("TELECHAT_HTTP_PORT").unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_max_clients() -> usize {
    env_parse("TELECHAT_MAX_CLIENTS").unwrap_or(100)
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_storage_path() -> String {
    std::env::var("TELECHAT_DB_PATH").unwrap_or_else(|_| "telechat.db".to_string())
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_log_filter() -> String {
    "telechat=info".to_string()
}

fn default_log_file() -> Option<String> {
    std::env::var("TELECHAT_LOG_FILE").ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            telnet_port: default_telnet_port(),
            http: HttpConfig::default(),
            limits: LimitsConfig::default(),
            delivery: DeliveryConfig::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_http_port(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_clients: default_max_clients(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            file: default_log_file(),
        }
    }
}

impl Config {
    /// Load configuration from the explicit path, the default paths, or
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// an explicit path cannot be read.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let config_paths = [
            "telechat.toml",
            "/etc/telechat/telechat.toml",
            "~/.config/telechat/telechat.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Telnet listener address.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn telnet_addr(&self) -> Result<SocketAddr> {
        self.addr(self.telnet_port)
    }

    /// HTTP listener address.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn http_addr(&self) -> Result<SocketAddr> {
        self.addr(self.http.port)
    }

    fn addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, port))
    }

    /// Expanded SQLite path.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.storage.path).as_ref())
    }

    /// Distributor settings.
    #[must_use]
    pub fn distributor(&self) -> DistributorConfig {
        DistributorConfig {
            ignored_broadcasts: self.delivery.ignored_broadcasts,
        }
    }
}
