//! Configuration module for the lenframe host.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::wire::{ByteOrder, FrameLimits, DEFAULT_MAX_FRAME_SIZE};

/// Application served on accepted connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AppKind {
    /// Reply with each received frame.
    #[default]
    Echo,
    /// Echo, with replies produced on the offload pool.
    EchoOffload,
    /// Broadcast each frame to every connection.
    Relay,
    /// Reply with a timestamped greeting.
    Greet,
}

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "lenframe")]
#[command(version)]
#[command(about = "Length-prefixed frame server and client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8899)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Largest accepted payload in bytes
    #[arg(short = 'm', long)]
    pub max_frame_size: Option<usize>,

    /// Maximum number of open connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(short = 't', long)]
    pub idle_timeout: Option<u64>,

    /// Number of offload worker threads
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Application to serve
    #[arg(long, value_enum)]
    pub app: Option<AppKind>,

    /// Byte order of the length prefix
    #[arg(long, value_enum)]
    pub byte_order: Option<ByteOrder>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Run as a client: connect to this address, send one frame, print the reply
    #[arg(long)]
    pub connect: Option<String>,

    /// Payload sent in client mode
    #[arg(long, default_value = "hello")]
    pub message: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub offload: OffloadConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Housekeeping poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Idle eviction threshold in seconds (0 = disabled)
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_timeout: 0,
        }
    }
}

/// Wire format configuration
#[derive(Debug, Deserialize)]
pub struct FramingConfig {
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default)]
    pub byte_order: ByteOrder,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            byte_order: ByteOrder::Big,
        }
    }
}

/// Offload pool configuration
#[derive(Debug, Deserialize)]
pub struct OffloadConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub kind: AppKind,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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

fn default_listen() -> String {
    "127.0.0.1:8899".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_workers() -> usize {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_connections: usize,
    /// Bounded poll timeout used when idle eviction is enabled.
    pub poll_interval: Duration,
    pub idle_timeout: Option<Duration>,
    pub limits: FrameLimits,
    pub offload_workers: usize,
    pub app: AppKind,
    pub log_level: String,
    pub connect: Option<SocketAddr>,
    pub message: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8899)),
            max_connections: default_max_connections(),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            idle_timeout: None,
            limits: FrameLimits::default(),
            offload_workers: default_workers(),
            app: AppKind::Echo,
            log_level: default_log_level(),
            connect: None,
            message: "hello".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = parse_addr(&listen)?;
        let connect = cli.connect.as_deref().map(parse_addr).transpose()?;

        let idle_secs = cli.idle_timeout.unwrap_or(toml_config.server.idle_timeout);

        Ok(Config {
            listen,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            poll_interval: Duration::from_millis(toml_config.server.poll_interval_ms.max(1)),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            limits: FrameLimits {
                max_frame_size: cli
                    .max_frame_size
                    .unwrap_or(toml_config.framing.max_frame_size),
                byte_order: cli.byte_order.unwrap_or(toml_config.framing.byte_order),
            },
            offload_workers: cli.workers.unwrap_or(toml_config.offload.workers),
            app: cli.app.unwrap_or(toml_config.app.kind),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
            connect,
            message: cli.message,
        })
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse()
        .map_err(|e| ConfigError::InvalidAddress(addr.to_string(), e))
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid socket address '{0}': {1}")]
    InvalidAddress(String, #[source] AddrParseError),
}
