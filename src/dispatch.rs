// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! The dispatch loop
//!
//! [`Forwarder`] ties the pipeline together. Each iteration reads one
//! record, publishes every extracted field immediately, feeds the values to
//! the [`RollingAggregator`], then checks the [`WindowClock`]. When the
//! window has run its length every non-empty mean is published to the
//! field's `_avg` topic and the window starts over.
//!
//! ```text
//!             ┌────────┐   record   ┌───────────┐  samples  ┌───────────┐
//!  device ──▶ │ Reader │ ─────────▶ │ Extractor │ ────────▶ │ Publisher │ ──▶ <base>/dht/<field>
//!             └────────┘            └─────┬─────┘           └───────────┘
//!                                         │ values                ▲
//!                                         ▼                       │ means
//!                                   ┌────────────┐  window due    │
//!                                   │ Aggregator │ ───────────────┘ ──▶ <base>/dht/<field>_avg
//!                                   └────────────┘
//! ```
//!
//! Publishes are awaited one at a time, so a record's fields reach the
//! broker in declared order and before the next record is read.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::RollingAggregator;
use crate::config::ForwarderConfig;
use crate::error::Result;
use crate::extractor::MetricExtractor;
use crate::publisher::{Publisher, TimeoutPublisher};
use crate::reader::{Record, RecordReader};
use crate::stats::ForwarderStats;
use crate::window::WindowClock;

/// What a single iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A record was read and processed
    Record,
    /// No data was available
    Idle,
}

/// Why [`Forwarder::run`] returned without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested
    Shutdown,
    /// Input ended and the configuration asks to stop there
    EndOfInput,
}

/// Reads records from `R` and forwards their metrics through `P`
pub struct Forwarder<R, P> {
    reader: RecordReader<R>,
    extractor: MetricExtractor,
    aggregator: RollingAggregator,
    clock: WindowClock,
    publisher: TimeoutPublisher<P>,
    config: Arc<ForwarderConfig>,
    stats: Arc<ForwarderStats>,
    /// Sleep before the next read after an idle iteration
    backoff: Duration,
}

impl<R: AsyncRead + Unpin, P: Publisher> Forwarder<R, P> {
    /// Create a forwarder over the weather station shapes
    ///
    /// The first window starts now.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(input: R, publisher: P, config: Arc<ForwarderConfig>) -> Result<Self> {
        Self::with_extractor(input, publisher, config, MetricExtractor::new())
    }

    /// Create a forwarder with a custom extractor
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn with_extractor(
        input: R,
        publisher: P,
        config: Arc<ForwarderConfig>,
        extractor: MetricExtractor,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            reader: RecordReader::new(input, config.max_record_len),
            extractor,
            aggregator: RollingAggregator::new(),
            clock: WindowClock::new(config.window, Instant::now()),
            publisher: TimeoutPublisher::new(publisher, config.publish_timeout),
            backoff: config.idle_backoff,
            stats: Arc::new(ForwarderStats::new()),
            config,
        })
    }

    /// Shared counters, readable while the loop runs
    pub fn stats(&self) -> Arc<ForwarderStats> {
        Arc::clone(&self.stats)
    }

    /// The configuration the loop runs with
    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Samples accumulated in the current window
    pub fn aggregator(&self) -> &RollingAggregator {
        &self.aggregator
    }

    /// Timing of the current aggregation window
    pub fn clock(&self) -> &WindowClock {
        &self.clock
    }

    /// Run until shutdown, end of input (if configured), or a transport error
    ///
    /// Once a record is in hand its iteration runs to completion; the token
    /// is only observed while waiting for input or backing off.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ForwarderError::Transport`] when the input fails.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<StopReason> {
        self.stats.set_running(true);
        info!(
            topic_base = %self.config.topic_base,
            window = ?self.config.window,
            shapes = self.extractor.table().len(),
            "forwarder started"
        );

        let outcome = self.run_loop(&shutdown).await;
        self.stats.set_running(false);

        match &outcome {
            Ok(reason) => info!(?reason, "forwarder stopped"),
            Err(e) => error!(error = %e, "forwarder stopped"),
        }
        outcome
    }

    async fn run_loop(&mut self, shutdown: &CancellationToken) -> Result<StopReason> {
        loop {
            let deadline = self.clock.deadline();

            let record = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(StopReason::Shutdown),
                // A quiet device must not hold back the aggregates
                _ = sleep_until(deadline) => None,
                record = self.reader.next_record() => Some(record?),
            };

            let Some(record) = record else {
                self.tick_window(Instant::now()).await;
                continue;
            };

            let eof = record.eof;
            match self.complete_iteration(record).await {
                Step::Record => self.backoff = self.config.idle_backoff,
                Step::Idle => {
                    if eof && self.config.stop_on_eof {
                        return Ok(StopReason::EndOfInput);
                    }
                    let pause = self.backoff;
                    self.backoff = (pause * 2).min(self.config.idle_backoff_max);
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Ok(StopReason::Shutdown),
                        _ = sleep_until(self.clock.deadline()) => {
                            self.tick_window(Instant::now()).await;
                        }
                        _ = sleep(pause) => {}
                    }
                }
            }

            if shutdown.is_cancelled() {
                return Ok(StopReason::Shutdown);
            }
        }
    }

    /// Run one iteration: read a record, process it, check the window
    ///
    /// # Errors
    ///
    /// Returns [`crate::ForwarderError::Transport`] when the input fails.
    pub async fn step(&mut self) -> Result<Step> {
        let record = self.reader.next_record().await?;
        Ok(self.complete_iteration(record).await)
    }

    async fn complete_iteration(&mut self, record: Record) -> Step {
        let step = if record.is_empty() {
            Step::Idle
        } else {
            self.process_record(&record.text).await;
            Step::Record
        };

        self.stats.set_oversized(self.reader.discarded());
        self.tick_window(Instant::now()).await;
        step
    }

    /// Extract, publish and aggregate one record
    ///
    /// Returns the number of values extracted.
    pub async fn process_record(&mut self, text: &str) -> usize {
        self.stats.record_read();
        if self.config.verbose {
            debug!(record = %text, "received record");
        }

        let extraction = self.extractor.extract(text);

        for e in extraction.errors() {
            self.stats.record_malformed();
            warn!(error = %e, record = %text, "dropping malformed record");
        }

        if extraction.is_unrecognized() {
            self.stats.record_unrecognized();
            if self.config.verbose {
                info!(record = %text, "unrecognized record");
            }
            return 0;
        }

        for sample in extraction.samples() {
            let topic = self.config.topic_for(sample.topic);
            publish(&self.publisher, &self.stats, &topic, &sample.raw).await;
            self.aggregator.add(sample.field, sample.value);
        }

        extraction.samples().len()
    }

    /// Flush the window if it has expired at `now`
    ///
    /// Returns true when a flush happened.
    pub async fn tick_window(&mut self, now: Instant) -> bool {
        if !self.clock.is_expired(now) {
            return false;
        }
        self.flush_window(now).await;
        true
    }

    /// Publish every non-empty mean, reset the aggregator and restart the window at `now`
    ///
    /// Returns the number of aggregates published successfully.
    pub async fn flush_window(&mut self, now: Instant) -> usize {
        let means = self.aggregator.means();
        let mut published = 0;

        for (field, mean) in &means {
            let Some(mean) = mean else {
                debug!(field = %field, "no samples this window, skipping aggregate");
                continue;
            };

            let path = match self.extractor.table().field(field) {
                Some(spec) => spec.topic,
                None => field.as_str(),
            };
            let topic = self.config.avg_topic_for(path);

            let payload = format!("{:.2}", mean);
            if publish(&self.publisher, &self.stats, &topic, &payload).await {
                published += 1;
            }
        }

        self.aggregator.reset_all();
        self.clock.reset(now);
        self.stats.window_flushed(published as u64);

        info!(
            fields = means.len(),
            published, "aggregation window flushed"
        );
        published
    }
}

/// Publish through the timeout adapter; failures are logged and dropped
async fn publish<P: Publisher>(
    publisher: &TimeoutPublisher<P>,
    stats: &ForwarderStats,
    topic: &str,
    payload: &str,
) -> bool {
    match publisher.publish(topic, payload).await {
        Ok(()) => {
            stats.publish_ok();
            debug!(topic = %topic, payload = %payload, "published");
            true
        }
        Err(e) => {
            stats.publish_failed();
            warn!(topic = %topic, error = %e, "publish failed, dropping metric");
            false
        }
    }
}
