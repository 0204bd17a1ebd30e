// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Telemetry Forwarder
//!
//! Forwards weather station readings from a line-oriented serial feed to a
//! pub/sub broker.
//!
//! ## Key Features
//!
//! - **Immediate forwarding**: Every recognized field is published as soon as its record arrives
//! - **Windowed means**: Per-field averages are published to `_avg` topics once per window
//! - **Shape tables**: Record shapes are static data, new sensors need no code
//! - **Bounded publishing**: A silent broker costs one timeout, never the pipeline
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use telemetry_forwarder::{Forwarder, ForwarderConfig, MemoryPublisher, StopReason};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> telemetry_forwarder::Result<()> {
//! let input: &[u8] = b"{\"humidity\": 45.20, \"temperature_f\": 71.30}\n";
//! let publisher = Arc::new(MemoryPublisher::new());
//! let config = ForwarderConfig {
//!     stop_on_eof: true,
//!     ..ForwarderConfig::with_topic_base("station")
//! };
//!
//! let mut forwarder = Forwarder::new(input, Arc::clone(&publisher), Arc::new(config))?;
//! let reason = forwarder.run(CancellationToken::new()).await?;
//!
//! assert_eq!(reason, StopReason::EndOfInput);
//! assert_eq!(publisher.published_to("station/dht/humidity"), vec!["45.20"]);
//! assert_eq!(publisher.published_to("station/dht/temperature"), vec!["71.30"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`reader`]: Record framing over any async byte stream
//! - [`shape`]: Record shapes and field extraction patterns
//! - [`extractor`]: Applies every shape to a record
//! - [`aggregator`]: Per-field sample windows
//! - [`window`]: Aggregation window timing
//! - [`publisher`]: Pub/sub sink abstraction
//! - [`dispatch`]: The forwarding loop
//! - [`stats`]: Live counters

pub mod aggregator;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod publisher;
pub mod reader;
pub mod shape;
pub mod stats;
pub mod window;

// Re-exports for convenient access
pub use aggregator::{RollingAggregator, SampleWindow};
pub use config::ForwarderConfig;
pub use dispatch::{Forwarder, Step, StopReason};
pub use error::{ForwarderError, MalformedRecordError, PublishError, Result, TransportError};
pub use extractor::{Extraction, MetricExtractor, MetricSample};
pub use publisher::{MemoryPublisher, PublishTask, Publisher, TimeoutPublisher};
pub use reader::{Record, RecordReader};
pub use shape::{FieldSpec, FieldValue, MetricShape, ShapeSpec, ShapeTable, STANDARD_SHAPES};
pub use stats::{ForwarderStats, StatsSnapshot};
pub use window::WindowClock;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_standard_table_covers_station_fields() {
        let table = ShapeTable::standard();
        for name in ["humidity", "temperature", "wind_angle", "wind_speed"] {
            assert!(table.field(name).is_some(), "missing {}", name);
        }
    }
}
