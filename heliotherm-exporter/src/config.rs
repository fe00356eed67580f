//! Configuration for the Heliotherm exporter.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use crate::registers::RegisterSpec;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Connection to the heat pump. Must be present after CLI overrides are
    /// applied; absence of a gateway implies a local serial device.
    #[serde(default)]
    pub connection: Option<ConnectionConfig>,

    /// Polling behaviour.
    #[serde(default)]
    pub poll: PollConfig,

    /// Registers to poll. Empty means the built-in default table.
    #[serde(default)]
    pub registers: Vec<RegisterSpec>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:9997").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for the metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9997".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Connection configuration (LAN gateway or local serial).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// TCP-to-serial LAN gateway in front of the heat pump.
    Gateway {
        /// Gateway hostname or IP.
        host: String,
        /// Gateway TCP port (default: 4001).
        #[serde(default = "default_gateway_port")]
        port: u16,
    },
    /// Heat pump attached to a local serial port.
    Serial {
        /// Serial device path (e.g., "/dev/ttyUSB0").
        device: String,
        /// Baud rate (default: 38400, the controller's fixed rate).
        #[serde(default = "default_baud_rate")]
        baud: u32,
        /// Data bits (default: 8).
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none").
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1).
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_gateway_port() -> u16 {
    4001
}

fn default_baud_rate() -> u32 {
    38400
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

/// Polling behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Minimum age before a scrape triggers a new device poll. Scrapes
    /// arriving faster are served the cached snapshot.
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,

    /// How long to wait for one reply frame (default: 1000 ms).
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Overall deadline for one poll cycle. On expiry the previous snapshot
    /// is served stale instead of blocking the scraper.
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,

    /// Query retries after a timeout before the link is reopened.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_min_interval() -> u64 {
    10
}

fn default_response_timeout_ms() -> u64 {
    1000
}

fn default_scrape_timeout() -> u64 {
    25
}

fn default_retries() -> u32 {
    1
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval(),
            response_timeout_ms: default_response_timeout_ms(),
            scrape_timeout_secs: default_scrape_timeout(),
            retries: default_retries(),
        }
    }
}

/// Logging output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format.
    #[default]
    Text,
    /// Structured JSON for log aggregation systems.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ExporterConfig = json5::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration. Called after CLI overrides are applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http
            .listen
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Validation(format!("invalid listen address: {}", e)))?;

        let connection = self.connection.as_ref().ok_or_else(|| {
            ConfigError::Validation(
                "no connection configured: set a LAN gateway or a serial device".to_string(),
            )
        })?;

        if let ConnectionConfig::Serial { parity, baud, .. } = connection {
            match parity.to_lowercase().as_str() {
                "none" | "even" | "odd" => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "invalid parity '{}' (use none, even, or odd)",
                        parity
                    )));
                }
            }
            if *baud == 0 {
                return Err(ConfigError::Validation("baud rate must be > 0".to_string()));
            }
        }

        if self.poll.response_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "response_timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The validated listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http
            .listen
            .parse()
            .map_err(|e| ConfigError::Validation(format!("invalid listen address: {}", e)))
    }
}
