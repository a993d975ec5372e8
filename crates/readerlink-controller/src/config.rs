//! Controller configuration and the string property surface.
//!
//! Upstream configures a controller with a flat `String -> String` map. Keys
//! starting with `Controller.` are parsed here; every other key belongs to the
//! connector and is handed through untouched.
//!
//! # Examples
//!
//! ```
//! use readerlink_controller::ControllerConfig;
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! let properties = HashMap::from([
//!     ("Controller.Timeout".to_string(), "500".to_string()),
//!     ("Host".to_string(), "10.0.0.7".to_string()),
//! ]);
//!
//! let (config, passthrough) = ControllerConfig::default()
//!     .with_properties(&properties)
//!     .unwrap();
//!
//! assert_eq!(config.execute_timeout, Duration::from_millis(500));
//! assert_eq!(passthrough.len(), 1);
//! assert_eq!(passthrough["Host"], "10.0.0.7");
//! ```

use crate::error::{ControllerError, Result};
use readerlink_core::constants::{
    DEFAULT_EXECUTE_TIMEOUT_MS, DEFAULT_OPTIMIZE_WRITE_OPERATIONS,
    DEFAULT_READER_CYCLE_DURATION_MS, DEFAULT_RECONNECT_DELAY_MS, PROPERTY_OPTIMIZE_WRITE_OPERATIONS,
    PROPERTY_PREFIX, PROPERTY_RECONNECT_DELAY, PROPERTY_TIMEOUT,
};
use std::collections::HashMap;
use std::time::Duration;

/// Tunables of one reader controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Maximum wait for the result of a one-shot execution.
    pub execute_timeout: Duration,

    /// Pause before every reconnection attempt.
    pub reconnect_delay: Duration,

    /// Drop writes fully overwritten by a later write of the same operation.
    pub optimize_write_operations: bool,

    /// Reader cycle duration reported to connectors.
    pub reader_cycle_duration: Duration,

    /// Deliver only tags whose TID was resolved to long-lived operators.
    pub tid_tracking: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            execute_timeout: Duration::from_millis(DEFAULT_EXECUTE_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            optimize_write_operations: DEFAULT_OPTIMIZE_WRITE_OPERATIONS,
            reader_cycle_duration: Duration::from_millis(DEFAULT_READER_CYCLE_DURATION_MS),
            tid_tracking: false,
        }
    }
}

impl ControllerConfig {
    /// Set the execution timeout.
    pub fn with_execute_timeout(mut self, timeout: Duration) -> Self {
        self.execute_timeout = timeout;
        self
    }

    /// Set the reconnection delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Enable or disable write optimization.
    pub fn with_optimize_write_operations(mut self, optimize: bool) -> Self {
        self.optimize_write_operations = optimize;
        self
    }

    /// Set the reader cycle duration.
    pub fn with_reader_cycle_duration(mut self, duration: Duration) -> Self {
        self.reader_cycle_duration = duration;
        self
    }

    /// Enable or disable TID tracking.
    pub fn with_tid_tracking(mut self, tid_tracking: bool) -> Self {
        self.tid_tracking = tid_tracking;
        self
    }

    /// Apply a property map on top of this configuration.
    ///
    /// Returns the updated configuration and the properties meant for the
    /// connector. `self` is never modified, so a rejected map leaves the
    /// current configuration in place.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidProperty`] for a malformed value and
    /// [`ControllerError::UnknownProperty`] for an unrecognized `Controller.`
    /// key.
    pub fn with_properties(
        &self,
        properties: &HashMap<String, String>,
    ) -> Result<(Self, HashMap<String, String>)> {
        let mut config = self.clone();
        let mut passthrough = HashMap::new();

        for (key, value) in properties {
            match key.as_str() {
                PROPERTY_TIMEOUT => config.execute_timeout = parse_millis(key, value)?,
                PROPERTY_RECONNECT_DELAY => config.reconnect_delay = parse_millis(key, value)?,
                PROPERTY_OPTIMIZE_WRITE_OPERATIONS => {
                    config.optimize_write_operations = parse_bool(key, value)?
                }
                other if other.starts_with(PROPERTY_PREFIX) => {
                    return Err(ControllerError::UnknownProperty(other.to_string()));
                }
                _ => {
                    passthrough.insert(key.clone(), value.clone());
                }
            }
        }

        Ok((config, passthrough))
    }

    /// The controller-owned part of this configuration as properties.
    pub fn to_properties(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                PROPERTY_TIMEOUT.to_string(),
                self.execute_timeout.as_millis().to_string(),
            ),
            (
                PROPERTY_RECONNECT_DELAY.to_string(),
                self.reconnect_delay.as_millis().to_string(),
            ),
            (
                PROPERTY_OPTIMIZE_WRITE_OPERATIONS.to_string(),
                self.optimize_write_operations.to_string(),
            ),
        ])
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| {
            ControllerError::invalid_property(key, value, "expected a non-negative integer")
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ControllerError::invalid_property(
            key,
            value,
            "expected 'true' or 'false'",
        ))
    }
}
