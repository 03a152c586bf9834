//! Tunnel configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config file.

use std::path::Path;
use std::time::Duration;

use seal_core::{MAX_PACKET_SIZE, MIN_PACKET_SIZE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

const MIN_REPLAY_WINDOW: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Replay window size in sequence numbers (>= 1024, multiple of 64)
    pub replay_window_size: u64,
    /// How long frames under the previous session keys are accepted after a rekey
    pub rotation_grace_ms: u64,
    /// Upper bound on `stop()` before loops are aborted
    pub shutdown_timeout_ms: u64,
    /// Number of most recent inbound frames the failure monitor looks at
    pub failure_window: usize,
    /// Failure ratio above which the tunnel goes to the error state
    pub failure_threshold: f64,
    /// Largest plaintext packet read from the interface
    pub max_packet_size: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            replay_window_size: 2048,
            rotation_grace_ms: 5_000,
            shutdown_timeout_ms: 2_000,
            failure_window: 1_000,
            failure_threshold: 0.5,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl TunnelConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json(&contents)?;
        debug!(path = %path.display(), ?config, "loaded tunnel config");
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(Error::serialization)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replay_window_size < MIN_REPLAY_WINDOW || self.replay_window_size % 64 != 0 {
            return Err(Error::config(format!(
                "replay_window_size must be >= {} and a multiple of 64, got {}",
                MIN_REPLAY_WINDOW, self.replay_window_size
            )));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(Error::config("shutdown_timeout_ms must be positive"));
        }
        if self.failure_window == 0 {
            return Err(Error::config("failure_window must be positive"));
        }
        if !(self.failure_threshold > 0.0 && self.failure_threshold <= 1.0) {
            return Err(Error::config(format!(
                "failure_threshold must be in (0, 1], got {}",
                self.failure_threshold
            )));
        }
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&self.max_packet_size) {
            return Err(Error::config(format!(
                "max_packet_size must be between {} and {}, got {}",
                MIN_PACKET_SIZE, MAX_PACKET_SIZE, self.max_packet_size
            )));
        }
        Ok(())
    }

    pub fn rotation_grace(&self) -> Duration {
        Duration::from_millis(self.rotation_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TunnelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
        assert_eq!(config.rotation_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = TunnelConfig::from_json("{}").unwrap();
        assert_eq!(config, TunnelConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config =
            TunnelConfig::from_json(r#"{"replay_window_size": 4096, "failure_threshold": 0.25}"#)
                .unwrap();
        assert_eq!(config.replay_window_size, 4096);
        assert_eq!(config.failure_threshold, 0.25);
        assert_eq!(config.failure_window, 1_000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for json in [
            r#"{"replay_window_size": 512}"#,
            r#"{"replay_window_size": 1030}"#,
            r#"{"shutdown_timeout_ms": 0}"#,
            r#"{"failure_window": 0}"#,
            r#"{"failure_threshold": 0.0}"#,
            r#"{"failure_threshold": 1.5}"#,
            r#"{"max_packet_size": 10}"#,
        ] {
            let err = TunnelConfig::from_json(json).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{json}: {err}");
        }
    }

    #[test]
    fn test_malformed_json() {
        let err = TunnelConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("pubwifi-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"rotation_grace_ms": 100}"#).unwrap();

        let config = TunnelConfig::load(&path).unwrap();
        assert_eq!(config.rotation_grace(), Duration::from_millis(100));

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(TunnelConfig::load(&path), Err(Error::Io(_))));
    }
}
