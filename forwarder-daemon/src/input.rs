// Telemetry Forwarder Daemon - Record input
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Input sources: the station's serial port, or a captured replay file.

use std::fmt;
use std::path::PathBuf;

use anyhow::Context;
use tokio::io::AsyncRead;
use tokio_serial::SerialPortBuilderExt;

/// Byte stream the forwarder reads records from
pub type InputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Where records come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A serial device such as `/dev/ttyACM0`
    Serial { path: String, baud: u32 },
    /// A file of previously captured records
    Replay(PathBuf),
}

impl InputSource {
    /// Does the stream end, rather than go quiet, when the data runs out?
    pub fn is_finite(&self) -> bool {
        matches!(self, Self::Replay(_))
    }

    /// Open the source
    pub async fn open(&self) -> anyhow::Result<InputStream> {
        match self {
            Self::Serial { path, baud } => {
                let port = tokio_serial::new(path.as_str(), *baud)
                    .open_native_async()
                    .with_context(|| format!("failed to open serial port {}", path))?;
                Ok(Box::new(port))
            }
            Self::Replay(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("failed to open replay file {}", path.display()))?;
                Ok(Box::new(file))
            }
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { path, baud } => write!(f, "serial {} @ {} baud", path, baud),
            Self::Replay(path) => write!(f, "replay {}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_replay_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"wind_speed\": 3.50}}").unwrap();

        let source = InputSource::Replay(file.path().to_path_buf());
        assert!(source.is_finite());

        let mut stream = source.open().await.unwrap();
        let mut text = String::new();
        stream.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "{\"wind_speed\": 3.50}\n");
    }

    #[tokio::test]
    async fn test_missing_replay_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = InputSource::Replay(dir.path().join("missing.log"));

        let err = source.open().await.err().unwrap();
        assert!(err.to_string().contains("failed to open replay file"));
    }

    #[tokio::test]
    async fn test_missing_serial_port_fails() {
        let source = InputSource::Serial {
            path: "/dev/does-not-exist-forwarder".to_string(),
            baud: 115_200,
        };
        assert!(!source.is_finite());
        assert!(source.open().await.is_err());
    }

    #[test]
    fn test_display() {
        let serial = InputSource::Serial {
            path: "/dev/ttyACM0".to_string(),
            baud: 115_200,
        };
        assert_eq!(serial.to_string(), "serial /dev/ttyACM0 @ 115200 baud");
        assert_eq!(
            InputSource::Replay(PathBuf::from("capture.log")).to_string(),
            "replay capture.log"
        );
    }
}
