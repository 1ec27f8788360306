//! Configuration for the delta manager
//!
//! Holds the wire-observable tuning constants (timeouts, buffer sizes,
//! content-size thresholds) with performance-sane defaults, using a
//! nested-config + `Default` + environment-override pattern.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for a [`crate::manager::DeltaManager`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaManagerConfig {
    /// Reconnect backoff configuration
    pub reconnect: ReconnectConfig,

    /// Gap-fill / delta-storage fetch configuration
    pub fetch: FetchConfig,

    /// Message sizing
    pub sizing: SizingConfig,

    /// Reference-sequence-number ack throttle
    pub ack: AckConfig,
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt after a disconnect/NACK
    #[serde(with = "duration_ms")]
    pub initial_reconnect_delay: Duration,

    /// Ceiling for the doubling reconnect backoff
    #[serde(with = "duration_ms")]
    pub max_reconnect_delay: Duration,
}

/// Gap-fill / delta-storage fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Page size for `getDeltas` pagination requests
    pub max_batch_deltas: u64,

    /// Base delay before the first retry of an empty/failed fetch
    #[serde(with = "duration_ms")]
    pub missing_fetch_delay: Duration,

    /// Ceiling for the doubling fetch-retry backoff
    #[serde(with = "duration_ms")]
    pub max_fetch_delay: Duration,
}

/// Message sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Fallback `maxMessageSize` when the connection doesn't advertise one
    pub default_chunk_size: usize,

    /// Threshold above which an outbound envelope's contents are split
    pub max_content_size: usize,

    /// Capacity of the content cache before oldest-entry eviction
    pub content_buffer_size: usize,
}

/// Reference-sequence-number ack throttle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckConfig {
    /// Debounce window for the ack timer
    #[serde(with = "duration_ms")]
    pub ack_timer: Duration,
}

impl Default for DeltaManagerConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            fetch: FetchConfig::default(),
            sizing: SizingConfig::default(),
            ack: AckConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(8000),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_batch_deltas: 2000,
            missing_fetch_delay: Duration::from_millis(100),
            max_fetch_delay: Duration::from_millis(10_000),
        }
    }
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: 16_384,
            max_content_size: 32_768,
            content_buffer_size: 10,
        }
    }
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            ack_timer: Duration::from_millis(100),
        }
    }
}

impl DeltaManagerConfig {
    /// Load defaults, then apply `DM_*` environment variable overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::config(format!("failed to parse config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        if let Ok(v) = env::var("DM_MAX_BATCH_DELTAS") {
            self.fetch.max_batch_deltas = v
                .parse()
                .map_err(|e| Error::config(format!("invalid DM_MAX_BATCH_DELTAS: {e}")))?;
        }

        if let Ok(v) = env::var("DM_MAX_CONTENT_SIZE") {
            self.sizing.max_content_size = v
                .parse()
                .map_err(|e| Error::config(format!("invalid DM_MAX_CONTENT_SIZE: {e}")))?;
        }

        if let Ok(v) = env::var("DM_CONTENT_BUFFER_SIZE") {
            self.sizing.content_buffer_size = v
                .parse()
                .map_err(|e| Error::config(format!("invalid DM_CONTENT_BUFFER_SIZE: {e}")))?;
        }

        if let Ok(v) = env::var("DM_ACK_TIMER_MS") {
            let ms: u64 = v
                .parse()
                .map_err(|e| Error::config(format!("invalid DM_ACK_TIMER_MS: {e}")))?;
            self.ack.ack_timer = Duration::from_millis(ms);
        }

        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.fetch.max_batch_deltas == 0 {
            return Err(Error::config("max_batch_deltas must be non-zero"));
        }

        if self.reconnect.initial_reconnect_delay > self.reconnect.max_reconnect_delay {
            return Err(Error::config(
                "initial_reconnect_delay must not exceed max_reconnect_delay",
            ));
        }

        if self.fetch.missing_fetch_delay > self.fetch.max_fetch_delay {
            return Err(Error::config(
                "missing_fetch_delay must not exceed max_fetch_delay",
            ));
        }

        if self.sizing.content_buffer_size == 0 {
            return Err(Error::config("content_buffer_size must be non-zero"));
        }

        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_observable_constants() {
        let config = DeltaManagerConfig::default();
        assert_eq!(config.reconnect.initial_reconnect_delay.as_millis(), 1000);
        assert_eq!(config.reconnect.max_reconnect_delay.as_millis(), 8000);
        assert_eq!(config.fetch.missing_fetch_delay.as_millis(), 100);
        assert_eq!(config.fetch.max_fetch_delay.as_millis(), 10_000);
        assert_eq!(config.fetch.max_batch_deltas, 2000);
        assert_eq!(config.sizing.default_chunk_size, 16_384);
        assert_eq!(config.sizing.max_content_size, 32_768);
        assert_eq!(config.sizing.content_buffer_size, 10);
        assert_eq!(config.ack.ack_timer.as_millis(), 100);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = DeltaManagerConfig::default();
        config.fetch.max_batch_deltas = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_reconnect_bounds() {
        let mut config = DeltaManagerConfig::default();
        config.reconnect.initial_reconnect_delay = Duration::from_millis(9000);
        assert!(config.validate().is_err());
    }
}
