// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Record framing over a byte stream
//!
//! The [`RecordReader`] splits the device stream on `\n` or `\r`. Bytes that
//! follow a delimiter stay buffered for the next call, so records survive
//! being split across arbitrary read boundaries.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::error::TransportError;

const READ_CHUNK: usize = 256;

/// One delimited unit of text from the device stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record text, trimmed; empty when no data was available
    pub text: String,
    /// The stream reported end-of-data while producing this record
    pub eof: bool,
}

impl Record {
    fn line(text: String) -> Self {
        Self { text, eof: false }
    }

    fn end_of_data(text: String) -> Self {
        Self { text, eof: true }
    }

    /// True when the record carries no text
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Splits a byte stream into [`Record`]s
pub struct RecordReader<R> {
    inner: R,
    buffer: Vec<u8>,
    max_record_len: usize,
    discarded: u64,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    /// Create a reader that drops partial records longer than `max_record_len`
    pub fn new(inner: R, max_record_len: usize) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(READ_CHUNK),
            max_record_len,
            discarded: 0,
        }
    }

    /// Read the next record
    ///
    /// Returns as soon as a delimiter is seen. On end-of-data the bytes
    /// accumulated so far (possibly none) are returned with `eof` set; the
    /// caller may simply try again later.
    ///
    /// # Errors
    ///
    /// Any read failure other than end-of-data, `Interrupted` or `TimedOut`.
    pub async fn next_record(&mut self) -> Result<Record, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(text) = self.take_line() {
                return Ok(Record::line(text));
            }

            let n = match self.inner.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // Serial ports report an expired read timeout this way
                Err(e) if e.kind() == ErrorKind::TimedOut => 0,
                Err(e) => return Err(TransportError::Read(e)),
            };

            if n == 0 {
                let partial = decode(&self.buffer);
                self.buffer.clear();
                return Ok(Record::end_of_data(partial));
            }

            self.buffer.extend_from_slice(&chunk[..n]);

            if self.buffer.len() > self.max_record_len && !self.buffer.iter().any(is_delimiter) {
                warn!(
                    bytes = self.buffer.len(),
                    max = self.max_record_len,
                    "discarding oversized record"
                );
                self.buffer.clear();
                self.discarded += 1;
            }
        }
    }

    /// Number of oversized partial records dropped so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Bytes buffered but not yet returned as a record
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the reader, returning the underlying stream
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Pop the first non-empty delimited line from the buffer
    fn take_line(&mut self) -> Option<String> {
        loop {
            let pos = self.buffer.iter().position(is_delimiter)?;
            let text = decode(&self.buffer[..pos]);
            self.buffer.drain(..=pos);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
}

fn is_delimiter(byte: &u8) -> bool {
    matches!(byte, b'\n' | b'\r')
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_reads_newline_records() {
        let input: &[u8] = b"{\"wind_speed\": 3.50}\n{\"wind_angle\": 90.00}\n";
        let mut reader = RecordReader::new(input, 1024);

        let first = reader.next_record().await.unwrap();
        assert_eq!(first.text, "{\"wind_speed\": 3.50}");
        assert!(!first.eof);

        let second = reader.next_record().await.unwrap();
        assert_eq!(second.text, "{\"wind_angle\": 90.00}");

        let end = reader.next_record().await.unwrap();
        assert!(end.is_empty());
        assert!(end.eof);
    }

    #[tokio::test]
    async fn test_carriage_return_and_crlf() {
        let input: &[u8] = b"first\rsecond\r\nthird\n";
        let mut reader = RecordReader::new(input, 1024);

        assert_eq!(reader.next_record().await.unwrap().text, "first");
        assert_eq!(reader.next_record().await.unwrap().text, "second");
        assert_eq!(reader.next_record().await.unwrap().text, "third");
        assert!(reader.next_record().await.unwrap().eof);
    }

    #[tokio::test]
    async fn test_partial_reads_are_reassembled() {
        let mock = Builder::new()
            .read(b"{\"humi")
            .read(b"dity\": 45.20, \"tempera")
            .read(b"ture_f\": 71.30}\n{\"wind")
            .read(b"_speed\": 1.00}\n")
            .build();
        let mut reader = RecordReader::new(mock, 1024);

        assert_eq!(
            reader.next_record().await.unwrap().text,
            "{\"humidity\": 45.20, \"temperature_f\": 71.30}"
        );
        assert_eq!(
            reader.next_record().await.unwrap().text,
            "{\"wind_speed\": 1.00}"
        );
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_eof_returns_partial_record() {
        let input: &[u8] = b"complete\npartial";
        let mut reader = RecordReader::new(input, 1024);

        assert_eq!(reader.next_record().await.unwrap().text, "complete");

        let partial = reader.next_record().await.unwrap();
        assert_eq!(partial.text, "partial");
        assert!(partial.eof);

        let empty = reader.next_record().await.unwrap();
        assert!(empty.is_empty());
        assert!(empty.eof);
    }

    #[tokio::test]
    async fn test_read_error_is_fatal() {
        let mock = Builder::new()
            .read(b"ok\n")
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
            .build();
        let mut reader = RecordReader::new(mock, 1024);

        assert_eq!(reader.next_record().await.unwrap().text, "ok");
        let err = reader.next_record().await.unwrap_err();
        assert!(matches!(err, TransportError::Read(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn test_timed_out_read_is_not_fatal() {
        let mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            .read(b"late\n")
            .build();
        let mut reader = RecordReader::new(mock, 1024);

        let idle = reader.next_record().await.unwrap();
        assert!(idle.is_empty());
        assert!(idle.eof);
        assert_eq!(reader.next_record().await.unwrap().text, "late");
    }

    #[tokio::test]
    async fn test_oversized_record_is_discarded() {
        let mut input = vec![b'x'; 300];
        input.extend_from_slice(b"\n{\"wind_speed\": 2.00}\n");
        let mut reader = RecordReader::new(input.as_slice(), 128);

        // The tail of the garbage arrives with the delimiter and resynchronises
        let tail = reader.next_record().await.unwrap();
        assert!(tail.text.chars().all(|c| c == 'x'));
        assert_eq!(reader.discarded(), 1);

        assert_eq!(
            reader.next_record().await.unwrap().text,
            "{\"wind_speed\": 2.00}"
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        // Line noise from the device ahead of a valid record
        let input: &[u8] = b"\xff\xfe{\"wind_speed\": 1.00}\n";
        let mut reader = RecordReader::new(input, 1024);

        let record = reader.next_record().await.unwrap();
        assert_eq!(record.text, "\u{FFFD}\u{FFFD}{\"wind_speed\": 1.00}");

        let extraction = crate::extractor::MetricExtractor::new().extract(&record.text);
        assert_eq!(extraction.samples().len(), 1);
        assert_eq!(extraction.samples()[0].field, "wind_speed");
        assert_eq!(extraction.samples()[0].raw, "1.00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_slow_device() {
        let mock = Builder::new()
            .read(b"{\"wind_")
            .wait(Duration::from_secs(2))
            .read(b"angle\": 45.00}\n")
            .build();
        let mut reader = RecordReader::new(mock, 1024);

        let start = tokio::time::Instant::now();
        let record = reader.next_record().await.unwrap();
        assert_eq!(record.text, "{\"wind_angle\": 45.00}");
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
