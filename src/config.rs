// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration for the forwarder
//!
//! A [`ForwarderConfig`] is built once at startup, validated, and shared
//! read-only with the dispatch loop and publisher adapter.

use std::time::Duration;

use crate::error::{ForwarderError, Result};

/// Forwarder-level configuration
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Topic prefix for every publish (e.g. `pico-weatherstation`)
    pub topic_base: String,

    /// Aggregation window length
    pub window: Duration,

    /// Upper bound on a single publish including its acknowledgment
    pub publish_timeout: Duration,

    /// First sleep after an iteration with no data
    pub idle_backoff: Duration,

    /// Ceiling for the doubling idle sleep
    pub idle_backoff_max: Duration,

    /// Bytes buffered without a delimiter before the partial record is dropped
    pub max_record_len: usize,

    /// Log raw and unrecognized records
    pub verbose: bool,

    /// End the loop on the first empty end-of-data (file replay)
    pub stop_on_eof: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            topic_base: "pico-weatherstation".to_string(),
            window: Duration::from_secs(30),
            publish_timeout: Duration::from_secs(5),
            idle_backoff: Duration::from_millis(50),
            idle_backoff_max: Duration::from_secs(1),
            max_record_len: 1024,
            verbose: false,
            stop_on_eof: false,
        }
    }
}

impl ForwarderConfig {
    /// Create a configuration publishing under the given topic base
    pub fn with_topic_base(topic_base: impl Into<String>) -> Self {
        Self {
            topic_base: topic_base.into(),
            ..Default::default()
        }
    }

    /// Create a configuration with a custom aggregation window
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            ..Default::default()
        }
    }

    /// Check the configuration for values the dispatch loop cannot work with
    pub fn validate(&self) -> Result<()> {
        let base = self.topic_base.trim_end_matches('/');
        if base.is_empty() {
            return Err(ForwarderError::InvalidConfig(
                "topic base must not be empty".to_string(),
            ));
        }
        if base.contains(['+', '#']) {
            return Err(ForwarderError::InvalidConfig(format!(
                "topic base '{}' contains a wildcard",
                self.topic_base
            )));
        }
        if self.window.is_zero() {
            return Err(ForwarderError::InvalidConfig(
                "window must be greater than zero".to_string(),
            ));
        }
        if self.publish_timeout.is_zero() {
            return Err(ForwarderError::InvalidConfig(
                "publish timeout must be greater than zero".to_string(),
            ));
        }
        if self.idle_backoff.is_zero() || self.idle_backoff > self.idle_backoff_max {
            return Err(ForwarderError::InvalidConfig(format!(
                "idle backoff {:?} must be non-zero and at most {:?}",
                self.idle_backoff, self.idle_backoff_max
            )));
        }
        if self.max_record_len == 0 {
            return Err(ForwarderError::InvalidConfig(
                "max record length must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Full topic for an immediate value, e.g. `<base>/dht/humidity`
    pub fn topic_for(&self, path: &str) -> String {
        format!("{}/{}", self.topic_base.trim_end_matches('/'), path)
    }

    /// Full topic for a windowed mean, e.g. `<base>/dht/humidity_avg`
    pub fn avg_topic_for(&self, path: &str) -> String {
        format!("{}_avg", self.topic_for(path))
    }
}
