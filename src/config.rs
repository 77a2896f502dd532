//! Configuration module for the byte-relay adapter.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the adapter
#[derive(Parser, Debug)]
#[command(name = "byte-relay")]
#[command(author = "byte-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "A protocol-agnostic TCP adapter", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (0 = auto-assign)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Protocol plugin answering requests
    #[arg(long, value_enum)]
    pub protocol: Option<ProtocolType>,

    /// Response payload for the foo protocol
    #[arg(long)]
    pub response: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Console log format: "json" or a template using %level, %message,
    /// %timestamp, %host and %pid
    #[arg(long)]
    pub log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Socket binding options. Immutable once handed to the adapter.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to, 0 requests automatic assignment
    #[serde(default)]
    pub port: u16,
    /// Pending connection queue length handed to listen(2)
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Set SO_REUSEADDR before binding
    #[serde(default = "default_true")]
    pub reuse_address: bool,
    /// Set TCP_NODELAY on accepted connections
    #[serde(default = "default_true")]
    pub nodelay: bool,
}

impl ListenerConfig {
    /// Loopback listener on the given port.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// `host:port` as handed to the socket layer.
    pub fn listen_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            backlog: default_backlog(),
            reuse_address: true,
            nodelay: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Console destination
    #[serde(default)]
    pub console: ConsoleTransport,
    /// Optional file destination
    pub file: Option<FileTransport>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleTransport::default(),
            file: None,
        }
    }
}

/// Console log destination
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleTransport {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "json" or a display template
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub colorize: bool,
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self {
            enabled: true,
            format: default_log_format(),
            colorize: false,
        }
    }
}

/// File log destination
#[derive(Debug, Clone, Deserialize)]
pub struct FileTransport {
    pub path: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub colorize: bool,
}

/// Protocol plugins shipped with the binary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// Answer every request with a fixed payload
    #[default]
    Foo,
    /// Answer every request with its own payload
    Echo,
}

/// Protocol plugin configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub name: ProtocolType,
    /// Fixed response for the foo protocol
    pub response: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backlog() -> u32 {
    1024
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "%timestamp %level: %message".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listener: ListenerConfig,
    pub logging: LoggingConfig,
    pub protocol: ProtocolConfig,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let TomlConfig {
            mut listener,
            mut logging,
            mut protocol,
        } = toml_config;

        if let Some(host) = cli.host {
            listener.host = host;
        }
        if let Some(port) = cli.port {
            listener.port = port;
        }
        if let Some(backlog) = cli.backlog {
            listener.backlog = backlog;
        }
        if let Some(name) = cli.protocol {
            protocol.name = name;
        }
        if cli.response.is_some() {
            protocol.response = cli.response;
        }
        if let Some(level) = cli.log_level {
            logging.level = level;
        }
        if let Some(format) = cli.log_format {
            logging.console.format = format;
        }
        if let Some(path) = cli.log_file {
            let (format, colorize) = logging
                .file
                .take()
                .map(|file| (file.format, file.colorize))
                .unwrap_or_else(|| (default_log_format(), false));
            logging.file = Some(FileTransport {
                path,
                format,
                colorize,
            });
        }

        Ok(Config {
            listener,
            logging,
            protocol,
        })
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
