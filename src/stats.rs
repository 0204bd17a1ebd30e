// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Dispatch loop counters
//!
//! [`ForwarderStats`] is shared through an `Arc` so status endpoints can read
//! it while the loop runs. Counters only ever increase.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Live counters updated by the dispatch loop
#[derive(Debug, Default)]
pub struct ForwarderStats {
    records_read: AtomicU64,
    records_unrecognized: AtomicU64,
    records_malformed: AtomicU64,
    records_oversized: AtomicU64,
    publishes_ok: AtomicU64,
    publishes_failed: AtomicU64,
    windows_flushed: AtomicU64,
    aggregates_published: AtomicU64,
    running: AtomicBool,
}

/// Point-in-time copy of [`ForwarderStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub records_read: u64,
    pub records_unrecognized: u64,
    pub records_malformed: u64,
    pub records_oversized: u64,
    pub publishes_ok: u64,
    pub publishes_failed: u64,
    pub windows_flushed: u64,
    pub aggregates_published: u64,
    pub running: bool,
}

impl ForwarderStats {
    /// All counters at zero, not running
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unrecognized(&self) {
        self.records_unrecognized.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.records_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Oversized records are counted by the reader; the loop syncs the total
    pub(crate) fn set_oversized(&self, total: u64) {
        self.records_oversized.store(total, Ordering::Relaxed);
    }

    pub(crate) fn publish_ok(&self) {
        self.publishes_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn publish_failed(&self) {
        self.publishes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn window_flushed(&self, aggregates: u64) {
        self.windows_flushed.fetch_add(1, Ordering::Relaxed);
        self.aggregates_published
            .fetch_add(aggregates, Ordering::Relaxed);
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Is the dispatch loop currently running?
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Copy every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_read: self.records_read.load(Ordering::Relaxed),
            records_unrecognized: self.records_unrecognized.load(Ordering::Relaxed),
            records_malformed: self.records_malformed.load(Ordering::Relaxed),
            records_oversized: self.records_oversized.load(Ordering::Relaxed),
            publishes_ok: self.publishes_ok.load(Ordering::Relaxed),
            publishes_failed: self.publishes_failed.load(Ordering::Relaxed),
            windows_flushed: self.windows_flushed.load(Ordering::Relaxed),
            aggregates_published: self.aggregates_published.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }
}
