// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the forwarder
//!
//! Only [`TransportError`] is fatal to the dispatch loop. Malformed records
//! and failed publishes are contained to the record or metric they concern.

use thiserror::Error;

/// Result type alias for forwarder operations
pub type Result<T> = std::result::Result<T, ForwarderError>;

/// Main error type for forwarder operations
#[derive(Error, Debug)]
pub enum ForwarderError {
    /// Reading from the device failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Unrecoverable failure of the input stream
#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying read returned an error other than end-of-data
    #[error("Read failed: {0}")]
    Read(#[from] std::io::Error),
}

/// A record recognized by a shape whose fields could not be extracted
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedRecordError {
    /// A field key of the shape is absent from the record
    #[error("{shape}: field '{field}' missing")]
    MissingField {
        shape: &'static str,
        field: &'static str,
    },

    /// The field value does not parse as a decimal number
    #[error("{shape}: field '{field}' is not a number: {raw}")]
    NotANumber {
        shape: &'static str,
        field: &'static str,
        raw: String,
    },

    /// The field value parsed but is NaN or infinite
    #[error("{shape}: field '{field}' is not finite: {raw}")]
    NonFinite {
        shape: &'static str,
        field: &'static str,
        raw: String,
    },
}

impl MalformedRecordError {
    /// Name of the shape whose extraction failed
    pub fn shape(&self) -> &'static str {
        match self {
            Self::MissingField { shape, .. }
            | Self::NotANumber { shape, .. }
            | Self::NonFinite { shape, .. } => shape,
        }
    }
}

/// Failure to deliver a single publish to the broker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    /// Broker or client refused the message
    #[error("Publish to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },

    /// No acknowledgment within the configured timeout
    #[error("Publish to {topic} timed out after {timeout_ms}ms")]
    Timeout { topic: String, timeout_ms: u64 },

    /// Broker session is gone
    #[error("Broker disconnected: {0}")]
    Disconnected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MalformedRecordError::NotANumber {
            shape: "humidity_temperature",
            field: "humidity",
            raw: "\"oops\"".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("humidity_temperature"));
        assert!(msg.contains("oops"));
        assert_eq!(err.shape(), "humidity_temperature");
    }

    #[test]
    fn test_publish_timeout_display() {
        let err = PublishError::Timeout {
            topic: "base/dht/humidity".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "Publish to base/dht/humidity timed out after 5000ms"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "device unplugged");
        let transport: TransportError = io.into();
        let err: ForwarderError = transport.into();
        assert!(matches!(err, ForwarderError::Transport(_)));
        assert!(err.to_string().contains("device unplugged"));
    }
}
