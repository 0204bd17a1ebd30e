// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Rolling aggregation of field samples
//!
//! The [`RollingAggregator`] keeps one [`SampleWindow`] per field name. The
//! dispatch loop computes every mean when the window expires, publishes
//! them, then calls [`RollingAggregator::reset_all`].

use std::collections::BTreeMap;

/// Samples collected for one field since the last reset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleWindow {
    samples: Vec<f64>,
}

impl SampleWindow {
    /// Create an empty window
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample
    pub fn push(&mut self, value: f64) {
        self.samples.push(value);
    }

    /// Arithmetic mean, or `None` for an empty window
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Samples in arrival order
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no sample was added since the last reset
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop all samples
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Per-field sample accumulation across one window
#[derive(Debug, Clone, Default)]
pub struct RollingAggregator {
    /// Windows keyed by field name; ordered so aggregates publish deterministically
    windows: BTreeMap<String, SampleWindow>,
}

impl RollingAggregator {
    /// Create an aggregator with no tracked fields
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample to a field's window, creating the window on first use
    pub fn add(&mut self, field: &str, value: f64) {
        match self.windows.get_mut(field) {
            Some(window) => window.push(value),
            None => {
                let mut window = SampleWindow::new();
                window.push(value);
                self.windows.insert(field.to_string(), window);
            }
        }
    }

    /// Mean of a field's current samples
    ///
    /// `None` when the field is unknown or has no samples this window.
    pub fn mean(&self, field: &str) -> Option<f64> {
        self.windows.get(field).and_then(SampleWindow::mean)
    }

    /// Mean of every tracked field, `None` for fields with no samples
    pub fn means(&self) -> Vec<(String, Option<f64>)> {
        self.windows
            .iter()
            .map(|(field, window)| (field.clone(), window.mean()))
            .collect()
    }

    /// Clear every window, keeping the field names tracked
    pub fn reset_all(&mut self) {
        for window in self.windows.values_mut() {
            window.clear();
        }
    }

    /// Window for a field
    pub fn window(&self, field: &str) -> Option<&SampleWindow> {
        self.windows.get(field)
    }

    /// Tracked field names
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }

    /// Number of tracked fields
    pub fn field_count(&self) -> usize {
        self.windows.len()
    }

    /// Samples held across all fields
    pub fn total_samples(&self) -> usize {
        self.windows.values().map(SampleWindow::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_window_has_no_mean() {
        let window = SampleWindow::new();
        assert!(window.is_empty());
        assert_eq!(window.mean(), None);
    }

    #[test]
    fn test_mean() {
        let mut aggregator = RollingAggregator::new();
        aggregator.add("humidity", 10.0);
        aggregator.add("humidity", 20.0);
        aggregator.add("humidity", 30.0);

        assert_relative_eq!(aggregator.mean("humidity").unwrap(), 20.0);
        assert_eq!(aggregator.window("humidity").unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_field_has_no_mean() {
        let aggregator = RollingAggregator::new();
        assert_eq!(aggregator.mean("wind_speed"), None);
    }

    #[test]
    fn test_reset_starts_fresh_window() {
        let mut aggregator = RollingAggregator::new();
        aggregator.add("humidity", 10.0);
        aggregator.add("humidity", 20.0);
        aggregator.add("humidity", 30.0);

        aggregator.reset_all();
        assert_eq!(aggregator.mean("humidity"), None);
        assert_eq!(aggregator.total_samples(), 0);
        // Field identity survives the reset
        assert_eq!(aggregator.field_count(), 1);

        aggregator.add("humidity", 50.0);
        assert_relative_eq!(aggregator.mean("humidity").unwrap(), 50.0);
    }

    #[test]
    fn test_means_are_per_field() {
        let mut aggregator = RollingAggregator::new();
        aggregator.add("temperature", 70.0);
        aggregator.add("humidity", 40.0);
        aggregator.add("temperature", 72.0);
        aggregator.reset_all();
        aggregator.add("humidity", 44.0);

        let means = aggregator.means();
        assert_eq!(
            means,
            vec![
                ("humidity".to_string(), Some(44.0)),
                ("temperature".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_mean_precision() {
        let mut aggregator = RollingAggregator::new();
        for v in [0.1, 0.2, 0.3] {
            aggregator.add("wind_speed", v);
        }
        assert_relative_eq!(
            aggregator.mean("wind_speed").unwrap(),
            0.2,
            epsilon = 1e-12
        );
    }
}
