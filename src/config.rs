//! Configuration module for resp-tap.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocols::resp::{DecoderOptions, DEFAULT_BULK_CAPTURE_LIMIT};
use crate::runtime::buffer::DEFAULT_MAX_LINE_LENGTH;
use crate::runtime::SessionOptions;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the tap
#[derive(Parser, Debug, Default)]
#[command(name = "resp-tap")]
#[command(author = "resp-tap authors")]
#[command(version = "0.1.0")]
#[command(about = "Decode and log RESP traffic", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on for mirrored traffic (e.g., 127.0.0.1:6380)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections per worker
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Bytes requested per socket or file read
    #[arg(long)]
    pub read_buffer_size: Option<usize>,

    /// Bulk strings longer than this are logged by length only
    #[arg(short = 'b', long)]
    pub bulk_capture_limit: Option<usize>,

    /// Longest protocol line accepted before a stream is rejected
    #[arg(long)]
    pub max_line_length: Option<usize>,

    /// Decode a captured byte stream from this file instead of listening
    #[arg(short = 'r', long)]
    pub replay: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub tap: TapConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct TapConfig {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    #[serde(default)]
    pub workers: usize,
    /// Maximum concurrent connections per worker
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Bytes requested per read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: 0,
            max_connections: default_max_connections(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

/// Decoder-related configuration
#[derive(Debug, Deserialize)]
pub struct DecoderConfig {
    /// Bulk capture limit in bytes
    #[serde(default = "default_bulk_capture_limit")]
    pub bulk_capture_limit: usize,
    /// Maximum line length in bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            bulk_capture_limit: default_bulk_capture_limit(),
            max_line_length: default_max_line_length(),
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
    "127.0.0.1:6380".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_read_buffer_size() -> usize {
    16 * 1024 // 16 KB
}

fn default_bulk_capture_limit() -> usize {
    DEFAULT_BULK_CAPTURE_LIMIT
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: usize,
    pub max_connections: usize,
    pub read_buffer_size: usize,
    pub bulk_capture_limit: usize,
    pub max_line_length: usize,
    pub replay: Option<PathBuf>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.tap.listen),
            workers: cli.workers.unwrap_or(toml_config.tap.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.tap.max_connections),
            read_buffer_size: cli
                .read_buffer_size
                .unwrap_or(toml_config.tap.read_buffer_size)
                .max(1),
            bulk_capture_limit: cli
                .bulk_capture_limit
                .unwrap_or(toml_config.decoder.bulk_capture_limit),
            max_line_length: cli
                .max_line_length
                .unwrap_or(toml_config.decoder.max_line_length),
            replay: cli.replay,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Per-session settings derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            decoder: DecoderOptions {
                bulk_capture_limit: self.bulk_capture_limit,
            },
            max_line_length: self.max_line_length,
            read_buffer_size: self.read_buffer_size,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CliArgs {
        CliArgs {
            log_level: "info".to_string(),
            ..CliArgs::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.tap.listen, "127.0.0.1:6380");
        assert_eq!(config.tap.workers, 0);
        assert_eq!(config.decoder.bulk_capture_limit, 64 * 1024);
        assert_eq!(config.decoder.max_line_length, 64 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [tap]
            listen = "0.0.0.0:7000"
            workers = 4

            [decoder]
            bulk_capture_limit = 512

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tap.listen, "0.0.0.0:7000");
        assert_eq!(config.tap.workers, 4);
        assert_eq!(config.tap.read_buffer_size, 16 * 1024);
        assert_eq!(config.decoder.bulk_capture_limit, 512);
        assert_eq!(config.decoder.max_line_length, 64 * 1024);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [tap]
            listen = "0.0.0.0:7000"
            [decoder]
            bulk_capture_limit = 512
            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let args = CliArgs {
            bulk_capture_limit: Some(32),
            replay: Some(PathBuf::from("capture.bin")),
            ..cli()
        };
        let config = Config::merge(args, toml_config);

        assert_eq!(config.listen, "0.0.0.0:7000");
        assert_eq!(config.bulk_capture_limit, 32);
        assert_eq!(config.replay, Some(PathBuf::from("capture.bin")));
        // CLI default level defers to the file
        assert_eq!(config.log_level, "warn");

        let options = config.session_options();
        assert_eq!(options.decoder.bulk_capture_limit, 32);
        assert_eq!(options.read_buffer_size, 16 * 1024);
    }

    #[test]
    fn test_cli_parse() {
        let args = CliArgs::parse_from([
            "resp-tap",
            "--listen",
            "127.0.0.1:9999",
            "-b",
            "128",
            "--log-level",
            "debug",
        ]);
        let config = Config::merge(args, TomlConfig::default());
        assert_eq!(config.listen, "127.0.0.1:9999");
        assert_eq!(config.bulk_capture_limit, 128);
        assert_eq!(config.log_level, "debug");
        assert!(config.replay.is_none());
    }
}
