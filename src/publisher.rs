// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Publisher abstraction
//!
//! A [`Publisher`] delivers one (topic, payload) pair and returns once the
//! broker has acknowledged it or the attempt has failed. The dispatch loop
//! wraps its publisher in a [`TimeoutPublisher`] so a silent broker cannot
//! stall the pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::PublishError;

/// Trait for pub/sub sinks
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver `payload` to `topic`, waiting for acknowledgment
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        (**self).publish(topic, payload).await
    }
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Box<P> {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        (**self).publish(topic, payload).await
    }
}

/// Bounds every publish of the inner publisher by a timeout
#[derive(Debug)]
pub struct TimeoutPublisher<P> {
    inner: P,
    timeout: Duration,
}

impl<P: Publisher> TimeoutPublisher<P> {
    /// Wrap `inner`, failing any publish that takes longer than `timeout`
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The bound applied to each publish
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The wrapped publisher
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: Publisher> Publisher for TimeoutPublisher<P> {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        match tokio::time::timeout(self.timeout, self.inner.publish(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout {
                topic: topic.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// A (topic, payload) pair as handed to a publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTask {
    pub topic: String,
    pub payload: String,
}

impl PublishTask {
    /// Pair `payload` with `topic`
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// In-memory publisher for tests and dry runs
///
/// Records every successful publish in order. Topics registered with
/// [`MemoryPublisher::fail_topic`] are rejected.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<PublishTask>>,
    failing: Mutex<HashSet<String>>,
    attempts: Mutex<Vec<String>>,
}

impl MemoryPublisher {
    /// Create a publisher that accepts every topic
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every future publish to `topic`
    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.failing.lock().insert(topic.into());
    }

    /// Accept publishes to `topic` again
    pub fn restore_topic(&self, topic: &str) {
        self.failing.lock().remove(topic);
    }

    /// Successful publishes in delivery order
    pub fn published(&self) -> Vec<PublishTask> {
        self.published.lock().clone()
    }

    /// Successful publishes to one topic
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|task| task.topic == topic)
            .map(|task| task.payload.clone())
            .collect()
    }

    /// Topics of every attempt, failed ones included
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }

    /// Forget everything published so far
    pub fn clear(&self) {
        self.published.lock().clear();
        self.attempts.lock().clear();
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        self.attempts.lock().push(topic.to_string());

        if self.failing.lock().contains(topic) {
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: "topic marked as failing".to_string(),
            });
        }

        self.published.lock().push(PublishTask::new(topic, payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Never acknowledges anything
    struct SilentBroker;

    #[async_trait]
    impl Publisher for SilentBroker {
        async fn publish(&self, _topic: &str, _payload: &str) -> Result<(), PublishError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_memory_publisher_records_in_order() {
        let publisher = MemoryPublisher::new();
        publisher.publish("a/humidity", "45.20").await.unwrap();
        publisher.publish("a/temperature", "71.30").await.unwrap();

        assert_eq!(
            publisher.published(),
            vec![
                PublishTask::new("a/humidity", "45.20"),
                PublishTask::new("a/temperature", "71.30"),
            ]
        );
    }

    #[tokio::test]
    async fn test_memory_publisher_failing_topic() {
        let publisher = MemoryPublisher::new();
        publisher.fail_topic("a/humidity");

        let err = publisher.publish("a/humidity", "45.20").await.unwrap_err();
        assert!(matches!(err, PublishError::Rejected { .. }));
        assert!(publisher.published().is_empty());
        assert_eq!(publisher.attempts(), vec!["a/humidity".to_string()]);

        publisher.restore_topic("a/humidity");
        publisher.publish("a/humidity", "45.30").await.unwrap();
        assert_eq!(publisher.published_to("a/humidity"), vec!["45.30"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_publisher_bounds_silent_broker() {
        let publisher = TimeoutPublisher::new(SilentBroker, Duration::from_millis(250));

        let err = publisher.publish("a/wind_speed", "3.00").await.unwrap_err();
        assert_eq!(
            err,
            PublishError::Timeout {
                topic: "a/wind_speed".to_string(),
                timeout_ms: 250,
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_publisher_passes_through() {
        let memory = Arc::new(MemoryPublisher::new());
        let publisher = TimeoutPublisher::new(Arc::clone(&memory), Duration::from_secs(1));

        publisher.publish("a/wind_angle", "90.00").await.unwrap();
        assert_eq!(memory.published_to("a/wind_angle"), vec!["90.00"]);
    }
}
