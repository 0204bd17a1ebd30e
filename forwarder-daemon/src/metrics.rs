// Telemetry Forwarder Daemon - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for the forwarder.
//!
//! Gauges mirror the dispatch loop's [`StatsSnapshot`] and are refreshed on
//! every scrape.

use lazy_static::lazy_static;
use prometheus::{register_gauge, Encoder, Gauge, TextEncoder};
use telemetry_forwarder::StatsSnapshot;

lazy_static! {
    // ============================================================
    // Records
    // ============================================================

    /// Non-empty records read from the device.
    pub static ref RECORDS_READ_TOTAL: Gauge = register_gauge!(
        "forwarder_records_read_total",
        "Records read from the input"
    ).unwrap();

    /// Records that matched no shape.
    pub static ref RECORDS_UNRECOGNIZED_TOTAL: Gauge = register_gauge!(
        "forwarder_records_unrecognized_total",
        "Records matching no known shape"
    ).unwrap();

    /// Shape matches whose fields failed to parse.
    pub static ref RECORDS_MALFORMED_TOTAL: Gauge = register_gauge!(
        "forwarder_records_malformed_total",
        "Recognized records whose fields failed to parse"
    ).unwrap();

    /// Partial records dropped for exceeding the length limit.
    pub static ref RECORDS_OVERSIZED_TOTAL: Gauge = register_gauge!(
        "forwarder_records_oversized_total",
        "Partial records discarded for exceeding the length limit"
    ).unwrap();

    // ============================================================
    // Publishing
    // ============================================================

    /// Publishes confirmed by the broker.
    pub static ref PUBLISHES_OK_TOTAL: Gauge = register_gauge!(
        "forwarder_publishes_total",
        "Publishes confirmed by the broker"
    ).unwrap();

    /// Publishes that were rejected, timed out or lost.
    pub static ref PUBLISHES_FAILED_TOTAL: Gauge = register_gauge!(
        "forwarder_publish_failures_total",
        "Publishes rejected, timed out or lost"
    ).unwrap();

    /// Aggregation windows closed.
    pub static ref WINDOWS_FLUSHED_TOTAL: Gauge = register_gauge!(
        "forwarder_windows_flushed_total",
        "Aggregation windows closed"
    ).unwrap();

    /// Windowed means published.
    pub static ref AGGREGATES_PUBLISHED_TOTAL: Gauge = register_gauge!(
        "forwarder_aggregates_published_total",
        "Windowed means published"
    ).unwrap();

    /// Whether the dispatch loop is running (1 = running, 0 = stopped).
    pub static ref RUNNING: Gauge = register_gauge!(
        "forwarder_running",
        "Dispatch loop state (1=running, 0=stopped)"
    ).unwrap();
}

/// Update every gauge from a stats snapshot.
pub fn update_from_snapshot(snapshot: &StatsSnapshot) {
    RECORDS_READ_TOTAL.set(snapshot.records_read as f64);
    RECORDS_UNRECOGNIZED_TOTAL.set(snapshot.records_unrecognized as f64);
    RECORDS_MALFORMED_TOTAL.set(snapshot.records_malformed as f64);
    RECORDS_OVERSIZED_TOTAL.set(snapshot.records_oversized as f64);
    PUBLISHES_OK_TOTAL.set(snapshot.publishes_ok as f64);
    PUBLISHES_FAILED_TOTAL.set(snapshot.publishes_failed as f64);
    WINDOWS_FLUSHED_TOTAL.set(snapshot.windows_flushed as f64);
    AGGREGATES_PUBLISHED_TOTAL.set(snapshot.aggregates_published as f64);
    RUNNING.set(if snapshot.running { 1.0 } else { 0.0 });
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        let snapshot = StatsSnapshot {
            records_read: 12,
            publishes_ok: 20,
            running: true,
            ..Default::default()
        };
        update_from_snapshot(&snapshot);

        let output = encode_metrics().unwrap();
        assert!(output.contains("forwarder_records_read_total 12"));
        assert!(output.contains("forwarder_publishes_total 20"));
        assert!(output.contains("forwarder_running 1"));
    }
}
