//! Configuration structures for the time synchronization host.
//!
//! Supports TOML deserialization with sensible defaults for
//! development and explicit values for production deployment.

use crate::error::{SyncError, SyncResult};
use crate::layout::TimestampLayout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Default base address of the device time block.
pub const DEFAULT_TIME_BASE_ADDRESS: u16 = 2;

/// Default number of sync iterations before giving up on convergence.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Highest register offset used by the time block, relative to its base.
/// This is the four-word trigger register.
const TIME_BLOCK_SPAN: u16 = 6;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    /// Device connection settings.
    pub device: DeviceConfig,

    /// Synchronization protocol settings.
    pub sync: SyncConfig,
}

/// Modbus device connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Server address (host:port).
    pub address: String,

    /// Slave ID / Unit identifier.
    pub unit_id: u8,

    /// Connection timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Read/write timeout for a single transaction.
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:502"),
            unit_id: 1,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(1),
        }
    }
}

/// Time synchronization protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base register address of the device time block.
    pub base_address: u16,

    /// Register layout used by the device firmware.
    pub layout: TimestampLayout,

    /// Acceptable absolute offset in seconds. When unset, a sync runs a
    /// single exchange without checking the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    /// Maximum number of exchanges while chasing the threshold.
    pub max_attempts: u32,

    /// Push host time even if the device has not requested it.
    pub force: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_address: DEFAULT_TIME_BASE_ADDRESS,
            layout: TimestampLayout::ThreeWord,
            threshold: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            force: false,
        }
    }
}

impl SyncConfig {
    /// Check the values for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first invalid value.
    pub fn validate(&self) -> SyncResult<()> {
        if self.base_address.checked_add(TIME_BLOCK_SPAN).is_none() {
            return Err(SyncError::Config(format!(
                "base address {} leaves no room for the time block",
                self.base_address
            )));
        }
        if self.max_attempts == 0 {
            return Err(SyncError::Config("max_attempts must be at least 1".into()));
        }
        if let Some(threshold) = self.threshold {
            if !threshold.is_finite() || threshold <= 0.0 {
                return Err(SyncError::Config(format!(
                    "threshold must be a positive number of seconds, got {threshold}"
                )));
            }
        }
        Ok(())
    }
}

impl DeviceConfig {
    /// Check the values for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first invalid value.
    pub fn validate(&self) -> SyncResult<()> {
        if self.address.trim().is_empty() {
            return Err(SyncError::Config("device address must not be empty".into()));
        }
        if self.io_timeout.is_zero() {
            return Err(SyncError::Config("io_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

impl TimeSyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_toml(&content)?;
        debug!(?path, "Configuration file parsed");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate both sections.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first invalid value.
    pub fn validate(&self) -> SyncResult<()> {
        self.device.validate()?;
        self.sync.validate()
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
