//! Connection configuration.
//!
//! Every section has defaults, so a YAML file only needs the values it changes:
//!
//! ```rust
//! use framewire::config::FramewireConfig;
//!
//! let config = FramewireConfig::from_yaml_str(
//!     "framer:\n  max_buffered_bytes: 1048576\ndecoder:\n  worker_count: 2\n",
//! )?;
//! assert_eq!(config.framer.max_buffered_bytes, 1 << 20);
//! assert_eq!(config.decoder.worker_count(), 2);
//! assert_eq!(config.store.max_samples, i32::MAX as u64);
//! # Ok::<(), framewire::TelemetryError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::EvictionPolicy;
use crate::{Result, TelemetryError};

/// Top-level configuration for a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramewireConfig {
    pub framer: FramerConfig,
    pub decoder: DecoderConfig,
    pub store: StoreConfig,
    pub notifications: NotifyConfig,
    pub pump: PumpConfig,
}

impl FramewireConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml).map_err(|e| TelemetryError::Parse {
            context: "configuration YAML".to_string(),
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| TelemetryError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Check every section against its documented range.
    pub fn validate(&self) -> Result<()> {
        if self.framer.max_buffered_bytes == 0 {
            return Err(TelemetryError::config_error("framer.max_buffered_bytes must be positive"));
        }
        if self.decoder.worker_count == Some(0) {
            return Err(TelemetryError::config_error("decoder.worker_count must be at least 1"));
        }
        if self.decoder.poll_interval_ms == 0 {
            return Err(TelemetryError::config_error("decoder.poll_interval_ms must be positive"));
        }
        if self.store.max_samples == 0 {
            return Err(TelemetryError::config_error("store.max_samples must be positive"));
        }
        if self.store.eviction.is_enabled() && self.store.eviction.resident_slots == 0 {
            return Err(TelemetryError::config_error(
                "store.eviction.resident_slots must be at least 1 when spilling",
            ));
        }
        if self.pump.max_errors == 0 {
            return Err(TelemetryError::config_error("pump.max_errors must be at least 1"));
        }
        Ok(())
    }
}

/// Byte-stream framer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramerConfig {
    /// Maximum unconsumed backlog; the pump waits for space beyond it
    pub max_buffered_bytes: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self { max_buffered_bytes: 64 * 1024 * 1024 }
    }
}

/// Decode pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Worker threads, `None` uses the available parallelism
    pub worker_count: Option<usize>,
    /// How long the decode loop waits for new bytes before rechecking cancellation
    pub poll_interval_ms: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self { worker_count: None, poll_interval_ms: 20 }
    }
}

impl DecoderConfig {
    /// Resolved number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Sample store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Samples per channel after which decoding stops
    pub max_samples: u64,
    pub eviction: EvictionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_samples: i32::MAX as u64, eviction: EvictionPolicy::default() }
    }
}

/// Notification rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Minimum time between two notifications of the same kind, 0 disables limiting
    pub rate_limit_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { rate_limit_ms: 1000 }
    }
}

impl NotifyConfig {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }
}

/// Transport pump retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Consecutive transport errors tolerated before the connection fails
    pub max_errors: u32,
    /// First retry delay, doubled after each consecutive error
    pub backoff_base_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self { max_errors: 10, backoff_base_ms: 50 }
    }
}

impl PumpConfig {
    /// Delay before retrying after `error_count` consecutive errors.
    pub fn backoff(&self, error_count: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms * (1 << error_count.min(5)))
    }
}
