//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (first found of `huddle.toml`,
//!   `/etc/huddle/huddle.toml`, `~/.config/huddle/huddle.toml`)
//! - Environment variables (`HUDDLE_PORT`, `HUDDLE_LIMITS__MAX_CONNECTIONS`, ...)

use anyhow::{Context, Result};
use huddle_core::{BrokerConfig, DEFAULT_HISTORY_LIMIT, DEFAULT_ROOM};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Config file search path, in priority order.
const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Message history configuration.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of open connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum username length in characters.
    #[serde(default = "default_max_username_length")]
    pub max_username_length: usize,

    /// Maximum chat message length in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Maximum room name length in characters.
    #[serde(default = "default_max_room_name_length")]
    pub max_room_name_length: usize,
}

/// Message history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages sent on join and returned by `get-history` without a limit.
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,

    /// Keep at most this many messages. Unset keeps everything.
    #[serde(default)]
    pub retention: Option<usize>,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Close connections silent for longer than this, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
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

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_username_length() -> usize {
    32
}

fn default_max_message_length() -> usize {
    4096
}

fn default_max_room_name_length() -> usize {
    64
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    90_000 // 90 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            history: HistoryConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            max_username_length: default_max_username_length(),
            max_message_length: default_max_message_length(),
            max_room_name_length: default_max_room_name_length(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            retention: None,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
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

impl Config {
    /// Load configuration from the first config file found, then apply
    /// `HUDDLE_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|p| shellexpand::tilde(p).into_owned())
            .find(|p| Path::new(p).exists());

        Self::from_sources(path.as_deref().map(Path::new))
    }

    /// Load configuration from a specific file plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_sources(Some(path.as_ref()))
    }

    fn from_sources(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            tracing::debug!("Loading config file {}", path.display());
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("HUDDLE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let source = match path {
            Some(path) => path.display().to_string(),
            None => "environment".to_string(),
        };

        builder
            .build()
            .with_context(|| format!("Failed to read config from {source}"))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse config from {source}"))
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Broker settings derived from this configuration.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            default_room: DEFAULT_ROOM.to_string(),
            history_limit: self.history.default_limit,
            max_username_length: self.limits.max_username_length,
            max_message_length: self.limits.max_message_length,
            max_room_name_length: self.limits.max_room_name_length,
            history_retention: self.history.retention,
        }
    }
}
