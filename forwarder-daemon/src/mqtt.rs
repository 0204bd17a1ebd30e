// Telemetry Forwarder Daemon - MQTT publisher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! MQTT publishing over `rumqttc`
//!
//! The client and its event loop run on separate tasks. The event loop task
//! reports each first write of a publish and each broker confirmation as a
//! [`Notice`] carrying the packet id. [`MqttPublisher::publish`] learns its
//! own packet id from the write that matches its place in the request queue
//! and returns only on the confirmation carrying that id.
//!
//! Publishes fail fast while the broker is unreachable, so nothing piles up
//! in the client's request queue to be delivered late or to block
//! [`close`].

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use telemetry_forwarder::{PublishError, Publisher};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Port used when the broker address does not name one
pub const DEFAULT_PORT: u16 = 1883;

/// Requests buffered between the client and its event loop
const REQUEST_CAPACITY: usize = 64;

const RECONNECT_MIN: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Invalid MQTT settings
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MqttError {
    #[error("Invalid broker address '{address}': {reason}")]
    InvalidBroker { address: String, reason: String },

    #[error("Invalid QoS level {0} (expected 0, 1 or 2)")]
    InvalidQos(u8),

    #[error("Keep-alive must be at least 5s, got {0:?}")]
    InvalidKeepAlive(Duration),
}

/// Split a broker address into host and port
///
/// Accepts `tcp://host:port`, `mqtt://host:port` and bare `host[:port]`.
pub fn parse_broker(address: &str) -> Result<(String, u16), MqttError> {
    let invalid = |reason: String| MqttError::InvalidBroker {
        address: address.to_string(),
        reason,
    };

    let trimmed = address.trim();
    let rest = match trimmed.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => return Err(invalid(format!("unsupported scheme '{}'", scheme))),
        None => trimmed,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid(format!("invalid port '{}'", port)))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid("missing host".to_string()));
    }
    Ok((host.to_string(), port))
}

/// Map a numeric QoS level
pub fn parse_qos(level: u8) -> Result<QoS, MqttError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(MqttError::InvalidQos(other)),
    }
}

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub qos: QoS,
}

impl MqttSettings {
    /// Build settings from command-line style values
    pub fn new(
        broker: &str,
        client_id: impl Into<String>,
        keep_alive: Duration,
        qos: u8,
    ) -> Result<Self, MqttError> {
        let (host, port) = parse_broker(broker)?;
        if keep_alive < Duration::from_secs(5) {
            return Err(MqttError::InvalidKeepAlive(keep_alive));
        }

        Ok(Self {
            host,
            port,
            client_id: client_id.into(),
            keep_alive,
            qos: parse_qos(qos)?,
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options
    }
}

/// What the event loop reports to the publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A publish was written to the connection for the first time
    Sent(u16),
    /// The broker confirmed the publish with this packet id
    Confirmed(u16),
    /// The connection dropped
    Lost(String),
}

/// Turns event loop events into [`Notice`]s
#[derive(Debug)]
struct DeliveryTracker {
    qos: QoS,
    /// Packet ids written and not yet confirmed
    in_flight: HashSet<u16>,
}

impl DeliveryTracker {
    fn new(qos: QoS) -> Self {
        Self {
            qos,
            in_flight: HashSet::new(),
        }
    }

    fn observe(&mut self, event: &Event) -> Option<Notice> {
        match event {
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                // Retransmissions after a reconnect reuse their packet id
                let first = self.qos == QoS::AtMostOnce || self.in_flight.insert(*pkid);
                first.then_some(Notice::Sent(*pkid))
            }
            Event::Incoming(Packet::PubAck(ack)) if self.qos == QoS::AtLeastOnce => {
                Some(self.confirm(ack.pkid))
            }
            Event::Incoming(Packet::PubComp(comp)) if self.qos == QoS::ExactlyOnce => {
                Some(self.confirm(comp.pkid))
            }
            _ => None,
        }
    }

    fn confirm(&mut self, pkid: u16) -> Notice {
        self.in_flight.remove(&pkid);
        Notice::Confirmed(pkid)
    }
}

/// Notices and the requests still waiting for their first write
struct Outstanding {
    notices: mpsc::UnboundedReceiver<Notice>,
    unsent: usize,
}

impl Outstanding {
    /// Account for notices left by publishes that stopped waiting
    fn settle_stale(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            if matches!(notice, Notice::Sent(_)) {
                self.unsent = self.unsent.saturating_sub(1);
            }
        }
    }
}

/// [`Publisher`] backed by an MQTT client
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    connected: watch::Receiver<bool>,
    outstanding: Mutex<Outstanding>,
}

impl MqttPublisher {
    /// Wrap a client whose event loop reports through `notices` and `connected`
    pub fn new(
        client: AsyncClient,
        qos: QoS,
        notices: mpsc::UnboundedReceiver<Notice>,
        connected: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            qos,
            connected,
            outstanding: Mutex::new(Outstanding { notices, unsent: 0 }),
        }
    }

    /// Is a broker session currently established?
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait up to `limit` for the first broker session
    pub async fn wait_connected(&self, limit: Duration) -> bool {
        let mut connected = self.connected.clone();
        let up = matches!(
            tokio::time::timeout(limit, connected.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );
        up
    }

    /// Ask the broker to close the session
    ///
    /// Never waits for queue space. Returns false when the request could not
    /// be queued.
    pub fn disconnect(&self) -> bool {
        match self.client.try_disconnect() {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "disconnect request not queued");
                false
            }
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let mut outstanding = self.outstanding.lock().await;
        outstanding.settle_stale();

        if !self.is_connected() {
            return Err(PublishError::Disconnected(
                "not connected to broker".to_string(),
            ));
        }

        self.client
            .try_publish(topic, self.qos, false, payload.as_bytes().to_vec())
            .map_err(|e| PublishError::Rejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        outstanding.unsent += 1;

        let mut own = None;
        loop {
            let notice = outstanding
                .notices
                .recv()
                .await
                .ok_or_else(|| PublishError::Disconnected("event loop stopped".to_string()))?;

            match notice {
                Notice::Sent(pkid) => {
                    outstanding.unsent = outstanding.unsent.saturating_sub(1);
                    // Requests are written in the order they were queued
                    if outstanding.unsent == 0 && own.is_none() {
                        if self.qos == QoS::AtMostOnce {
                            return Ok(());
                        }
                        own = Some(pkid);
                    }
                }
                Notice::Confirmed(pkid) if own == Some(pkid) => return Ok(()),
                Notice::Confirmed(_) => {}
                Notice::Lost(reason) => return Err(PublishError::Disconnected(reason)),
            }
        }
    }
}

/// Drive the connection until disconnect or shutdown
///
/// Connection errors are retried with a doubling delay.
async fn drive(
    mut eventloop: EventLoop,
    qos: QoS,
    notices: mpsc::UnboundedSender<Notice>,
    connected: watch::Sender<bool>,
    shutdown: CancellationToken,
) {
    let mut tracker = DeliveryTracker::new(qos);
    let mut backoff = RECONNECT_MIN;

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "connected to broker");
                connected.send_replace(true);
                backoff = RECONNECT_MIN;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("disconnected from broker");
                break;
            }
            Ok(event) => {
                if let Some(notice) = tracker.observe(&event) {
                    let _ = notices.send(notice);
                }
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?backoff, "broker connection error");
                connected.send_replace(false);
                let _ = notices.send(Notice::Lost(e.to_string()));

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(RECONNECT_MAX);
            }
        }
    }

    connected.send_replace(false);
    debug!("mqtt event loop stopped");
}

/// Create the client and spawn its event loop
///
/// The connection is made by the event loop; see
/// [`MqttPublisher::wait_connected`].
pub fn connect(settings: &MqttSettings, shutdown: CancellationToken) -> (MqttPublisher, JoinHandle<()>) {
    let (client, eventloop) = AsyncClient::new(settings.options(), REQUEST_CAPACITY);
    let (notices_tx, notices_rx) = mpsc::unbounded_channel();
    let (connected_tx, connected_rx) = watch::channel(false);

    info!(
        host = %settings.host,
        port = settings.port,
        client_id = %settings.client_id,
        qos = ?settings.qos,
        "connecting to broker"
    );

    let task = tokio::spawn(drive(
        eventloop,
        settings.qos,
        notices_tx,
        connected_tx,
        shutdown,
    ));
    (
        MqttPublisher::new(client, settings.qos, notices_rx, connected_rx),
        task,
    )
}

/// Close the broker session and stop the event loop within `grace`
///
/// The event loop is cancelled outright when the broker is unreachable or the
/// session does not close in time. Returns true on a clean close.
pub async fn close(
    publisher: &MqttPublisher,
    mut task: JoinHandle<()>,
    shutdown: &CancellationToken,
    grace: Duration,
) -> bool {
    let requested = publisher.is_connected() && publisher.disconnect();
    if !requested {
        shutdown.cancel();
    }

    match tokio::time::timeout(grace, &mut task).await {
        Ok(_) => requested,
        Err(_) => {
            warn!(?grace, "broker did not close the session in time");
            shutdown.cancel();
            let _ = task.await;
            false
        }
    }
}
