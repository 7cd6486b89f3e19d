//! Runtime configuration surface for a statistics registry
//!
//! All four knobs are runtime-mutable through the registry; this type only
//! carries the initial values, with serde defaults so embedders can supply
//! a partial (or empty) table in their own configuration files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default averaging window in seconds
fn default_window_secs() -> u64 {
    1
}

/// Default number of history samples retained per statistic
fn default_history_size() -> usize {
    30
}

/// Default history sampling interval in milliseconds
fn default_history_interval_ms() -> u64 {
    1_000
}

/// Default idle time before derived statistics are disabled, in seconds
fn default_time_to_disable_secs() -> u64 {
    30
}

/// Initial statistics settings for one registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    /// Trailing window rates are computed over, in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Number of samples kept per statistic history
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Interval between history samples, in milliseconds
    #[serde(default = "default_history_interval_ms")]
    pub history_interval_ms: u64,

    /// Idle time after which derived statistics are disabled, in seconds
    #[serde(default = "default_time_to_disable_secs")]
    pub time_to_disable_secs: u64,

    /// Start with idle-expiry suspended and all statistics sampling
    #[serde(default)]
    pub always_on: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            history_size: default_history_size(),
            history_interval_ms: default_history_interval_ms(),
            time_to_disable_secs: default_time_to_disable_secs(),
            always_on: false,
        }
    }
}

impl StatisticsConfig {
    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_secs == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.history_size == 0 {
            return Err(ConfigError::ZeroHistorySize);
        }
        if self.history_interval_ms == 0 {
            return Err(ConfigError::ZeroHistoryInterval);
        }
        if self.time_to_disable_secs == 0 {
            return Err(ConfigError::ZeroTimeToDisable);
        }
        Ok(())
    }

    /// The averaging window.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// The history sampling interval.
    #[must_use]
    pub fn history_interval(&self) -> Duration {
        Duration::from_millis(self.history_interval_ms)
    }

    /// The idle-disable threshold and sweep period.
    #[must_use]
    pub fn time_to_disable(&self) -> Duration {
        Duration::from_secs(self.time_to_disable_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StatisticsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window(), Duration::from_secs(1));
        assert_eq!(config.history_size, 30);
        assert_eq!(config.history_interval(), Duration::from_secs(1));
        assert!(!config.always_on);
    }

    #[test]
    fn partial_table_fills_in_defaults() {
        let config: StatisticsConfig =
            serde_json::from_str(r#"{ "history_size": 5, "always_on": true }"#).unwrap();
        assert_eq!(config.history_size, 5);
        assert!(config.always_on);
        assert_eq!(config.window_secs, 1);
        assert_eq!(config.time_to_disable_secs, 30);
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = StatisticsConfig {
            window_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWindow));

        let config = StatisticsConfig {
            history_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroHistoryInterval));
    }
}
