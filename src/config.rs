//! # Configuration Management
//!
//! Centralized configuration for the transport layer.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! Durations are written as integer milliseconds and log levels as lowercase
//! strings, e.g.:
//! ```toml
//! [transport]
//! max_chunk_payload = 16383
//!
//! [ping]
//! interval = 2000
//! ```

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Largest payload carried by a single track chunk frame. The frame itself is
/// one byte longer because of the type tag.
pub const MAX_CHUNK_PAYLOAD: usize = 16383;

/// Default largest track a player is sent or a receiver reassembles
pub const DEFAULT_MAX_TRACK_BYTES: usize = 16 * 1024 * 1024;

/// Default outbound bytes buffered per player before sends report backpressure.
/// Holds a full transfer of a `DEFAULT_MAX_TRACK_BYTES` track with headroom.
pub const DEFAULT_OUTBOUND_BUFFER_BYTES: usize = 2 * DEFAULT_MAX_TRACK_BYTES;

/// Size of a `TrackId` announcement frame: tag plus 64 hex digits
const ANNOUNCEMENT_FRAME_BYTES: usize = 1 + 64;

/// Default pending commands per player session task
pub const DEFAULT_COMMAND_QUEUE: usize = 64;

/// Root configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TransportSettings {
    /// Server-wide session settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Framing and chunking settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Latency probe settings
    #[serde(default)]
    pub ping: PingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TransportSettings {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RACE_TRANSPORT_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(bytes) = std::env::var("RACE_TRANSPORT_OUTBOUND_BUFFER_BYTES") {
            config.transport.outbound_buffer_bytes = bytes.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!(
                    "Invalid RACE_TRANSPORT_OUTBOUND_BUFFER_BYTES: {e}"
                ))
            })?;
        }

        if let Ok(bytes) = std::env::var("RACE_TRANSPORT_MAX_TRACK_BYTES") {
            config.transport.max_track_bytes = bytes.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid RACE_TRANSPORT_MAX_TRACK_BYTES: {e}"))
            })?;
        }

        if let Ok(size) = std::env::var("RACE_TRANSPORT_MAX_CHUNK_PAYLOAD") {
            config.transport.max_chunk_payload = size.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!(
                    "Invalid RACE_TRANSPORT_MAX_CHUNK_PAYLOAD: {e}"
                ))
            })?;
        }

        if let Ok(timeout) = std::env::var("RACE_TRANSPORT_PING_TIMEOUT_MS") {
            let millis = timeout.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid RACE_TRANSPORT_PING_TIMEOUT_MS: {e}"))
            })?;
            config.ping.probe_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.ping.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-wide session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Maximum number of concurrently registered players
    pub max_players: usize,

    /// Commands buffered per player session task
    pub command_queue: usize,

    /// How long to wait for session tasks to drain on shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            max_players: 64,
            command_queue: DEFAULT_COMMAND_QUEUE,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8080')",
                self.address
            ));
        }

        if self.max_players == 0 {
            errors.push("Max players must be greater than 0".to_string());
        } else if self.max_players > 10_000 {
            errors.push(format!(
                "Max players too large: {} (maximum: 10,000)",
                self.max_players
            ));
        }

        if self.command_queue == 0 {
            errors.push("Command queue must be greater than 0".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Framing and chunking configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Payload bytes per track chunk frame, at most `MAX_CHUNK_PAYLOAD`
    pub max_chunk_payload: usize,

    /// Frame bytes buffered per player before sends report backpressure.
    /// Must hold a whole transfer of a `max_track_bytes` track.
    pub outbound_buffer_bytes: usize,

    /// Largest frame accepted by stream-backed channels
    pub max_frame_size: usize,

    /// Largest track sent to a player; receivers use the same limit
    pub max_track_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_chunk_payload: MAX_CHUNK_PAYLOAD,
            outbound_buffer_bytes: DEFAULT_OUTBOUND_BUFFER_BYTES,
            max_frame_size: crate::core::codec::DEFAULT_MAX_FRAME_SIZE,
            max_track_bytes: DEFAULT_MAX_TRACK_BYTES,
        }
    }
}

impl TransportConfig {
    /// Frame bytes a transfer of a `track_len` byte track puts on the channel
    pub fn transfer_footprint(&self, track_len: usize) -> usize {
        let chunks = track_len.div_ceil(self.max_chunk_payload.max(1));
        ANNOUNCEMENT_FRAME_BYTES + track_len + chunks
    }

    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_chunk_payload == 0 {
            errors.push("Max chunk payload cannot be 0".to_string());
        } else if self.max_chunk_payload > MAX_CHUNK_PAYLOAD {
            errors.push(format!(
                "Max chunk payload too large: {} bytes (maximum: {MAX_CHUNK_PAYLOAD})",
                self.max_chunk_payload
            ));
        }

        if self.outbound_buffer_bytes == 0 {
            errors.push("Outbound buffer must be greater than 0".to_string());
        } else if self.outbound_buffer_bytes > 1 << 30 {
            errors.push(format!(
                "Outbound buffer too large: {} bytes (maximum: 1 GiB)",
                self.outbound_buffer_bytes
            ));
        }

        if self.max_frame_size <= self.max_chunk_payload {
            errors.push(format!(
                "Max frame size {} cannot hold a full chunk frame ({} bytes)",
                self.max_frame_size,
                self.max_chunk_payload + 1
            ));
        }

        if self.max_track_bytes == 0 {
            errors.push("Max track bytes cannot be 0".to_string());
        } else if self.outbound_buffer_bytes < self.transfer_footprint(self.max_track_bytes) {
            errors.push(format!(
                "Outbound buffer {} bytes cannot hold a full track transfer ({} bytes)",
                self.outbound_buffer_bytes,
                self.transfer_footprint(self.max_track_bytes)
            ));
        }

        errors
    }
}

/// Latency probe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PingConfig {
    /// Whether session tasks probe latency on their own timer
    pub auto_ping: bool,

    /// Interval between automatic probes
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Outstanding probes older than this are dropped from the ledger
    #[serde(with = "duration_serde")]
    pub probe_timeout: Duration,

    /// Ledger bound; the oldest probe is evicted when exceeded
    pub max_outstanding: usize,

    /// Number of recent samples averaged into the ping estimate
    pub smoothing_window: usize,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            auto_ping: true,
            interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(10),
            max_outstanding: 32,
            smoothing_window: 5,
        }
    }
}

impl PingConfig {
    /// Validate ping configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.interval.as_millis() < 100 {
            errors.push("Ping interval too short (minimum: 100ms)".to_string());
        } else if self.interval.as_secs() > 60 {
            errors.push("Ping interval too long (maximum: 60s)".to_string());
        }

        if self.probe_timeout < self.interval {
            errors.push("Probe timeout cannot be shorter than the ping interval".to_string());
        }

        if self.max_outstanding == 0 {
            errors.push("Max outstanding probes must be greater than 0".to_string());
        }

        if self.smoothing_window == 0 || self.smoothing_window > 64 {
            errors.push(format!(
                "Invalid smoothing window: {} (valid range: 1-64)",
                self.smoothing_window
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("race-transport"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
