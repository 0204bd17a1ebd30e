// Telemetry Forwarder Daemon - Serial to MQTT forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Forwarder
//!
//! Reads weather station records from a serial port (or a replay file) and
//! forwards every metric to an MQTT broker, plus windowed means.
//!
//! ## Usage
//!
//! ```bash
//! # Forward from the default serial port to a local broker
//! forwarder --serial-port /dev/ttyACM0 --broker tcp://localhost:1883
//!
//! # Replay a capture with a 5 second window and a status endpoint
//! forwarder --replay capture.log --window 5s --metrics-port 9100
//! ```

mod http;
mod input;
mod metrics;
mod mqtt;
mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use telemetry_forwarder::{Forwarder, ForwarderConfig, StopReason};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use http::AppState;
use input::InputSource;
use mqtt::MqttSettings;

/// Time allowed for the first broker session at startup
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for the broker session to close cleanly
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Serial to MQTT telemetry forwarder
#[derive(Parser, Debug)]
#[command(name = "forwarder", author, version, about, long_about = None)]
struct Args {
    /// Path to the serial port
    #[arg(long, alias = "serialPort", default_value = "/dev/ttyACM0")]
    serial_port: String,

    /// Serial baud rate
    #[arg(long, alias = "serialBaud", default_value_t = 115_200)]
    serial_baud: u32,

    /// Read records from a captured file instead of the serial port; stops at end of file
    #[arg(long)]
    replay: Option<PathBuf>,

    /// MQTT broker address (tcp://host:port, mqtt://host:port or host[:port])
    #[arg(long, alias = "mqBroker", default_value = "tcp://localhost:1883")]
    broker: String,

    /// MQTT client id
    #[arg(long, alias = "mqClientID", default_value = "pico-weatherstation")]
    client_id: String,

    /// Topic base every metric is published under
    #[arg(long, alias = "mqTopic", default_value = "pico-weatherstation")]
    topic: String,

    /// Aggregation window (e.g. 30s, 5m)
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    window: Duration,

    /// Upper bound on a single publish including its acknowledgment
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    publish_timeout: Duration,

    /// MQTT QoS level (0, 1 or 2)
    #[arg(long, default_value_t = 1)]
    qos: u8,

    /// MQTT keep-alive interval
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    keep_alive: Duration,

    /// Serve /metrics, /health, /ready and /status on this port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Log every record, including unrecognized ones
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn input_source(&self) -> InputSource {
        match &self.replay {
            Some(path) => InputSource::Replay(path.clone()),
            None => InputSource::Serial {
                path: self.serial_port.clone(),
                baud: self.serial_baud,
            },
        }
    }

    fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            topic_base: self.topic.clone(),
            window: self.window,
            publish_timeout: self.publish_timeout,
            verbose: self.verbose,
            stop_on_eof: self.input_source().is_finite(),
            ..Default::default()
        }
    }

    fn log_level(&self) -> Level {
        if self.verbose {
            return Level::DEBUG;
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let level = args.log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(level.into()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Telemetry forwarder v{}", telemetry_forwarder::VERSION);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.forwarder_config();
    config.validate().context("invalid configuration")?;
    let config = Arc::new(config);

    let settings = MqttSettings::new(&args.broker, args.client_id.as_str(), args.keep_alive, args.qos)
        .context("invalid broker settings")?;

    let source = args.input_source();
    let input = source.open().await?;
    info!(input = %source, topic_base = %config.topic_base, window = ?config.window, "input opened");

    let listener = match args.metrics_port {
        Some(port) => Some(
            http::bind(port)
                .await
                .with_context(|| format!("failed to bind status port {}", port))?,
        ),
        None => None,
    };

    let mqtt_shutdown = CancellationToken::new();
    let (publisher, mqtt_task) = mqtt::connect(&settings, mqtt_shutdown.clone());
    if !publisher.wait_connected(CONNECT_TIMEOUT).await {
        mqtt::close(&publisher, mqtt_task, &mqtt_shutdown, DISCONNECT_GRACE).await;
        anyhow::bail!(
            "no broker session with {}:{} after {:?}",
            settings.host,
            settings.port,
            CONNECT_TIMEOUT
        );
    }
    let publisher = Arc::new(publisher);

    let mut forwarder = Forwarder::new(input, Arc::clone(&publisher), Arc::clone(&config))?;
    let stats = forwarder.stats();

    let shutdown = CancellationToken::new();
    let signals = shutdown::spawn_listener(shutdown.clone());

    let http_task = listener.map(|listener| {
        let state = Arc::new(AppState::new(
            Arc::clone(&stats),
            source.to_string(),
            config.topic_base.clone(),
        ));
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(listener, state, shutdown).await {
                error!(error = %e, "status server failed");
            }
        })
    });

    let loop_shutdown = shutdown.clone();
    let outcome = tokio::spawn(async move { forwarder.run(loop_shutdown).await })
        .await
        .context("forwarder task panicked")?;

    // Stop the listener and status server whichever way the loop ended
    shutdown.cancel();
    let _ = signals.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }

    if !mqtt::close(&publisher, mqtt_task, &mqtt_shutdown, DISCONNECT_GRACE).await {
        warn!("broker session was not closed cleanly");
    }

    let snapshot = stats.snapshot();
    info!(
        records = snapshot.records_read,
        published = snapshot.publishes_ok,
        failed = snapshot.publishes_failed,
        windows = snapshot.windows_flushed,
        "forwarder finished"
    );

    match outcome? {
        StopReason::Shutdown => info!("shut down on request"),
        StopReason::EndOfInput => info!("end of input reached"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["forwarder"]).unwrap();

        assert_eq!(args.serial_port, "/dev/ttyACM0");
        assert_eq!(args.serial_baud, 115_200);
        assert_eq!(args.broker, "tcp://localhost:1883");
        assert_eq!(args.client_id, "pico-weatherstation");
        assert_eq!(args.topic, "pico-weatherstation");
        assert_eq!(args.window, Duration::from_secs(30));
        assert_eq!(args.qos, 1);
        assert_eq!(args.log_level(), Level::INFO);

        let config = args.forwarder_config();
        assert!(!config.stop_on_eof);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_legacy_flag_names() {
        let args = Args::try_parse_from([
            "forwarder",
            "--serialPort",
            "/dev/ttyUSB0",
            "--serialBaud",
            "9600",
            "--mqBroker",
            "mqtt://broker.lan",
            "--mqClientID",
            "station-2",
            "--mqTopic",
            "garden",
        ])
        .unwrap();

        assert_eq!(
            args.input_source(),
            InputSource::Serial {
                path: "/dev/ttyUSB0".to_string(),
                baud: 9600,
            }
        );
        assert_eq!(args.broker, "mqtt://broker.lan");
        assert_eq!(args.client_id, "station-2");
        assert_eq!(args.topic, "garden");
    }

    #[test]
    fn test_replay_stops_at_end_of_input() {
        let args =
            Args::try_parse_from(["forwarder", "--replay", "capture.log", "--window", "5s"]).unwrap();

        let config = args.forwarder_config();
        assert!(config.stop_on_eof);
        assert_eq!(config.window, Duration::from_secs(5));
    }

    #[test]
    fn test_verbose_raises_log_level() {
        let args = Args::try_parse_from(["forwarder", "-v", "--log-level", "warn"]).unwrap();
        assert_eq!(args.log_level(), Level::DEBUG);
        assert!(args.forwarder_config().verbose);
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        assert!(Args::try_parse_from(["forwarder", "--window", "soon"]).is_err());
    }
}
