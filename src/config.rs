//! Configuration module for the ws-ack server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "ws-ack")]
#[command(author = "ws-ack authors")]
#[command(version = "0.1.0")]
#[command(about = "A WebSocket server that acknowledges every message", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Request path that accepts WebSocket upgrades (e.g., /ws)
    #[arg(short = 'p', long)]
    pub path: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Seconds a client may take to complete the upgrade (0 = unbounded)
    #[arg(long)]
    pub handshake_timeout: Option<u64>,

    /// Maximum message size in bytes (0 = unbounded)
    #[arg(short = 'm', long)]
    pub max_message_size: Option<usize>,

    /// Maximum frame size in bytes (0 = unbounded)
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Request path for WebSocket upgrades
    #[serde(default = "default_path")]
    pub path: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds allowed for the WebSocket upgrade
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            workers: None,
            max_connections: default_max_connections(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

/// Payload limits handed to the WebSocket transport
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Maximum size of a reassembled message in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Maximum size of a single frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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
    "0.0.0.0:8080".to_string()
}

fn default_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_handshake_timeout() -> u64 {
    10 // 10 seconds
}

fn default_max_message_size() -> usize {
    64 * 1024 * 1024 // 64 MB
}

fn default_max_frame_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub path: String,
    pub workers: Option<usize>,
    pub max_connections: usize,
    /// `None` means unbounded.
    pub handshake_timeout: Option<Duration>,
    /// `None` means unbounded.
    pub max_message_size: Option<usize>,
    /// `None` means unbounded.
    pub max_frame_size: Option<usize>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default_args(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve configuration from already parsed CLI args.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            path: cli.path.unwrap_or(toml_config.server.path),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            handshake_timeout: match cli
                .handshake_timeout
                .unwrap_or(toml_config.server.handshake_timeout)
            {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            max_message_size: limit(
                cli.max_message_size
                    .unwrap_or(toml_config.limits.max_message_size),
            ),
            max_frame_size: limit(
                cli.max_frame_size
                    .unwrap_or(toml_config.limits.max_frame_size),
            ),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Check values that would otherwise only fail once the server starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "path '{}' must start with '/'",
                self.path
            )));
        }
        if self.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "listen address '{}' is not a valid socket address",
                self.listen
            )));
        }
        if self.max_connections == 0 || self.max_connections > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_connections must be between 1 and {}",
                u32::MAX
            )));
        }
        Ok(())
    }
}

impl CliArgs {
    fn default_args() -> Self {
        CliArgs {
            config: None,
            listen: None,
            path: None,
            workers: None,
            max_connections: None,
            handshake_timeout: None,
            max_message_size: None,
            max_frame_size: None,
            log_level: default_log_level(),
        }
    }
}

/// Zero disables the limit.
fn limit(bytes: usize) -> Option<usize> {
    if bytes == 0 {
        None
    } else {
        Some(bytes)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
