//! Event bus configuration.
//!
//! Loaded from environment variables with defaults that keep the bus
//! silent about slow handlers and loud about failing ones.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventBusConfig {
    /// Log a warning as soon as a handler has been running for this long.
    ///
    /// The handler keeps running: the bus never cancels handlers.
    pub slow_handler_threshold: Option<Duration>,

    /// Log every handler failure when it settles, whether or not anyone
    /// awaits the event.
    pub log_handler_failures: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            slow_handler_threshold: None,
            log_handler_failures: true,
        }
    }
}

impl EventBusConfig {
    /// Load configuration from environment variables, ignoring invalid values.
    ///
    /// Environment variables:
    /// - `EVENT_BUS_SLOW_HANDLER_MS`: slow handler warning threshold (unset: disabled)
    /// - `EVENT_BUS_LOG_HANDLER_FAILURES`: log failures as they settle (default: true)
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_default()
    }

    /// Load configuration from environment variables.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default = Self::default();

        let slow_handler_threshold = match lookup("EVENT_BUS_SLOW_HANDLER_MS") {
            Some(value) => Some(Duration::from_millis(value.trim().parse().map_err(
                |e: std::num::ParseIntError| ConfigError::InvalidValue {
                    key: "EVENT_BUS_SLOW_HANDLER_MS".to_string(),
                    message: e.to_string(),
                },
            )?)),
            None => default.slow_handler_threshold,
        };

        let log_handler_failures = match lookup("EVENT_BUS_LOG_HANDLER_FAILURES") {
            Some(value) => parse_bool("EVENT_BUS_LOG_HANDLER_FAILURES", &value)?,
            None => default.log_handler_failures,
        };

        Ok(Self {
            slow_handler_threshold,
            log_handler_failures,
        })
    }

    /// Set the slow handler warning threshold.
    pub fn with_slow_handler_threshold(mut self, threshold: Duration) -> Self {
        self.slow_handler_threshold = Some(threshold);
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EventBusConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EventBusConfig::default());
        assert!(config.slow_handler_threshold.is_none());
        assert!(config.log_handler_failures);
    }

    #[test]
    fn test_values_from_env() {
        let config = EventBusConfig::from_lookup(lookup(&[
            ("EVENT_BUS_SLOW_HANDLER_MS", "250"),
            ("EVENT_BUS_LOG_HANDLER_FAILURES", "off"),
        ]))
        .unwrap();

        assert_eq!(config.slow_handler_threshold, Some(Duration::from_millis(250)));
        assert!(!config.log_handler_failures);
    }

    #[test]
    fn test_invalid_values() {
        let err = EventBusConfig::from_lookup(lookup(&[("EVENT_BUS_SLOW_HANDLER_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("EVENT_BUS_SLOW_HANDLER_MS"));

        let err = EventBusConfig::from_lookup(lookup(&[("EVENT_BUS_LOG_HANDLER_FAILURES", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("expected a boolean"));
    }
}
