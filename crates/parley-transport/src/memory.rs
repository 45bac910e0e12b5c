//! In-process pub/sub transport.
//!
//! Every topic is a tokio broadcast channel. Records published while a topic
//! has no subscribers are dropped, matching a consumer that starts reading at
//! the latest offset.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, trace, warn};

use crate::record::Record;
use crate::traits::{validate_topic_name, Subscription, Transport, TransportError};

/// Memory transport configuration.
#[derive(Debug, Clone)]
pub struct MemoryTransportConfig {
    /// Per-topic buffer; slow subscribers lag past this many records.
    pub topic_capacity: usize,
    /// Maximum payload size in bytes.
    pub max_payload_size: usize,
    /// Maximum number of topics.
    pub max_topics: usize,
}

impl Default for MemoryTransportConfig {
    fn default() -> Self {
        Self {
            topic_capacity: 1024,
            max_payload_size: 64 * 1024,
            max_topics: 10_000,
        }
    }
}

/// A topic backed by a broadcast channel.
struct Topic {
    sender: broadcast::Sender<Record>,
}

impl Topic {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

/// In-process transport.
///
/// Topics are created lazily by the first publish or subscribe and live
/// until the transport is closed.
pub struct MemoryTransport {
    topics: DashMap<String, Topic>,
    config: MemoryTransportConfig,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create a new transport with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryTransportConfig::default())
    }

    /// Create a new transport with custom configuration.
    #[must_use]
    pub fn with_config(config: MemoryTransportConfig) -> Self {
        info!("Creating memory transport with config: {:?}", config);
        Self {
            topics: DashMap::new(),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Get transport statistics.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            topic_count: self.topics.len(),
            total_subscriptions: self.topics.iter().map(|t| t.sender.receiver_count()).sum(),
        }
    }

    /// Check if a topic exists.
    #[must_use]
    pub fn topic_exists(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Get the number of live subscriptions on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|t| t.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Shut the transport down.
    ///
    /// Open subscriptions drain what is buffered and then end; publishing and
    /// subscribing fail with [`TransportError::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.topics.clear();
            info!("Memory transport closed");
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Get or create the sender for a topic.
    fn topic_sender(&self, name: &str) -> Result<broadcast::Sender<Record>, TransportError> {
        validate_topic_name(name).map_err(|reason| TransportError::InvalidTopic {
            topic: name.to_string(),
            reason,
        })?;

        if let Some(topic) = self.topics.get(name) {
            return Ok(topic.sender.clone());
        }

        if self.topics.len() >= self.config.max_topics {
            return Err(TransportError::MaxTopicsReached);
        }

        let topic = self.topics.entry(name.to_string()).or_insert_with(|| {
            debug!(topic = %name, "Creating new topic");
            Topic::new(self.config.topic_capacity)
        });
        Ok(topic.sender.clone())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;

        if payload.len() > self.config.max_payload_size {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        let sender = self.topic_sender(topic)?;
        let record = Record::new(topic, key.map(str::to_string), payload);

        // No receivers is not an error: nobody is reading from this offset yet.
        let recipients = sender.send(record).unwrap_or_default();
        trace!(topic = %topic, recipients, "Published record");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, TransportError> {
        self.ensure_open()?;

        let receiver = self.topic_sender(topic)?.subscribe();
        debug!(topic = %topic, "Subscribed");

        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            receiver: Some(receiver),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// A subscription on a [`MemoryTransport`] topic.
pub struct MemorySubscription {
    topic: String,
    receiver: Option<broadcast::Receiver<Record>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn recv(&mut self) -> Option<Record> {
        let next = {
            let receiver = self.receiver.as_mut()?;
            loop {
                match receiver.recv().await {
                    Ok(record) => break Some(record),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(topic = %self.topic, skipped, "Subscriber lagged, records dropped");
                    }
                    Err(RecvError::Closed) => break None,
                }
            }
        };

        if next.is_none() {
            self.receiver = None;
        }
        next
    }

    async fn close(&mut self) {
        if self.receiver.take().is_some() {
            debug!(topic = %self.topic, "Unsubscribed");
        }
    }

    fn is_open(&self) -> bool {
        self.receiver.is_some()
    }
}

/// Transport statistics.
#[derive(Debug, Clone)]
pub struct TransportStats {
    /// Number of topics.
    pub topic_count: usize,
    /// Total number of live subscriptions across topics.
    pub total_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let transport = MemoryTransport::new();

        let mut sub1 = transport.subscribe("general").await.unwrap();
        let mut sub2 = transport.subscribe("general").await.unwrap();
        assert_eq!(transport.subscriber_count("general"), 2);

        transport
            .publish("general", Some("k"), Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let r1 = sub1.recv().await.unwrap();
        let r2 = sub2.recv().await.unwrap();
        assert_eq!(r1.key(), Some("k"));
        assert_eq!(&r2.payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_creates_topic() {
        let transport = MemoryTransport::new();

        transport
            .publish("lonely", None, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(transport.topic_exists("lonely"));
        assert_eq!(transport.subscriber_count("lonely"), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let transport = MemoryTransport::new();
        let mut a = transport.subscribe("a").await.unwrap();
        let _b = transport.subscribe("b").await.unwrap();

        transport
            .publish("b", None, Bytes::from_static(b"for b"))
            .await
            .unwrap();
        transport
            .publish("a", None, Bytes::from_static(b"for a"))
            .await
            .unwrap();

        assert_eq!(a.recv().await.unwrap().text(), "for a");
    }

    #[tokio::test]
    async fn test_close_subscription_releases_receiver() {
        let transport = MemoryTransport::new();
        let mut sub = transport.subscribe("general").await.unwrap();
        assert_eq!(transport.subscriber_count("general"), 1);

        sub.close().await;
        assert!(!sub.is_open());
        assert_eq!(transport.subscriber_count("general"), 0);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_topic() {
        let transport = MemoryTransport::new();

        assert!(matches!(
            transport.subscribe("").await,
            Err(TransportError::InvalidTopic { .. })
        ));
        assert!(matches!(
            transport
                .publish("bad topic", None, Bytes::from_static(b"x"))
                .await,
            Err(TransportError::InvalidTopic { .. })
        ));
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let transport = MemoryTransport::with_config(MemoryTransportConfig {
            max_payload_size: 4,
            ..Default::default()
        });

        assert!(matches!(
            transport
                .publish("general", None, Bytes::from_static(b"12345"))
                .await,
            Err(TransportError::PayloadTooLarge { size: 5, max: 4 })
        ));
    }

    #[tokio::test]
    async fn test_max_topics() {
        let transport = MemoryTransport::with_config(MemoryTransportConfig {
            max_topics: 1,
            ..Default::default()
        });

        let _a = transport.subscribe("a").await.unwrap();
        assert!(matches!(
            transport.subscribe("b").await,
            Err(TransportError::MaxTopicsReached)
        ));
    }

    #[tokio::test]
    async fn test_close_transport_ends_subscriptions() {
        let transport = MemoryTransport::new();
        let mut sub = transport.subscribe("general").await.unwrap();

        transport.close();

        assert!(sub.recv().await.is_none());
        assert!(!transport.is_healthy());
        assert!(matches!(
            transport
                .publish("general", None, Bytes::from_static(b"x"))
                .await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_stats() {
        let transport = MemoryTransport::new();

        let _s1 = transport.subscribe("a").await.unwrap();
        let _s2 = transport.subscribe("a").await.unwrap();
        let _s3 = transport.subscribe("b").await.unwrap();

        let stats = transport.stats();
        assert_eq!(stats.topic_count, 2);
        assert_eq!(stats.total_subscriptions, 3);
    }
}
