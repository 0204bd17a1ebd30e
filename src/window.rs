// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Aggregation window timing.

use std::time::Duration;

use tokio::time::Instant;

/// Start of the current aggregation window and its fixed length
#[derive(Debug, Clone, Copy)]
pub struct WindowClock {
    start: Instant,
    duration: Duration,
}

impl WindowClock {
    /// Start a window of `duration` at `now`
    pub fn new(duration: Duration, now: Instant) -> Self {
        Self {
            start: now,
            duration,
        }
    }

    /// Has the window run its full length at `now`?
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start) >= self.duration
    }

    /// Begin the next window at `now`
    pub fn reset(&mut self, now: Instant) {
        self.start = now;
    }

    /// Time left in the window at `now`
    pub fn remaining(&self, now: Instant) -> Duration {
        self.duration
            .saturating_sub(now.saturating_duration_since(self.start))
    }

    /// When the current window began
    pub fn start(&self) -> Instant {
        self.start
    }

    /// When the current window expires
    pub fn deadline(&self) -> Instant {
        self.start + self.duration
    }

    /// Length of every window
    pub fn duration(&self) -> Duration {
        self.duration
    }
}
