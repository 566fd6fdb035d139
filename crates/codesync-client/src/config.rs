//! Tunable timings for a client session, loadable from RON.
//!
//! ```ron
//! (
//!     coalesce_delay_ms: 500,
//!     echo_window_ms: 100,
//!     heartbeat_interval_ms: 10000,
//!     liveness_window_ms: 30000,
//! )
//! ```
//!
//! Omitted fields take the defaults from [`crate::constants`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Errors loading a [`SyncConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON encode error: {0}")]
    Encode(#[from] ron::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub coalesce_delay_ms: u64,
    pub echo_window_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub liveness_window_ms: u64,
    pub presence_recheck_ms: u64,
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            coalesce_delay_ms: constants::COALESCE_DELAY.as_millis() as u64,
            echo_window_ms: constants::ECHO_WINDOW.as_millis() as u64,
            heartbeat_interval_ms: constants::HEARTBEAT_INTERVAL.as_millis() as u64,
            liveness_window_ms: constants::LIVENESS_WINDOW.as_millis() as u64,
            presence_recheck_ms: constants::PRESENCE_RECHECK_INTERVAL.as_millis() as u64,
            event_capacity: constants::EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SyncConfig {
    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_delay_ms)
    }

    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_window_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn presence_recheck(&self) -> Duration {
        Duration::from_millis(self.presence_recheck_ms)
    }

    /// Parse and validate a RON document.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    pub fn to_ron(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// Intervals that drive timers must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timers = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("presence_recheck_ms", self.presence_recheck_ms),
            ("liveness_window_ms", self.liveness_window_ms),
        ];
        for (name, value) in timers {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ron_fills_defaults() {
        let config = SyncConfig::from_ron_str("(coalesce_delay_ms: 250)").unwrap();
        assert_eq!(config.coalesce_delay(), Duration::from_millis(250));
        assert_eq!(config.liveness_window(), constants::LIVENESS_WINDOW);
        assert_eq!(config.echo_window(), constants::ECHO_WINDOW);
    }

    #[test]
    fn test_ron_roundtrip() {
        let config = SyncConfig {
            heartbeat_interval_ms: 2_000,
            ..SyncConfig::default()
        };
        let text = config.to_ron().unwrap();
        assert_eq!(SyncConfig::from_ron_str(&text).unwrap(), config);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = SyncConfig::from_ron_str("(heartbeat_interval_ms: 0)").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.ron");
        std::fs::write(&path, "(echo_window_ms: 50)").unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.echo_window_ms, 50);
    }

    #[test]
    fn test_bad_ron_is_parse_error() {
        assert!(matches!(
            SyncConfig::from_ron_str("(coalesce_delay_ms: \"soon\")"),
            Err(ConfigError::Ron(_))
        ));
    }
}
