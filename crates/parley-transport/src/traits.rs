//! Transport abstraction traits for Parley.
//!
//! These traits define the interface every pub/sub backend must provide,
//! allowing the client and server to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::record::Record;

/// Maximum topic name length.
pub const MAX_TOPIC_NAME_LENGTH: usize = 249;

/// Validate a topic name.
///
/// # Errors
///
/// Returns an error message if the topic name is invalid.
pub fn validate_topic_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic name cannot be empty");
    }
    if name.len() > MAX_TOPIC_NAME_LENGTH {
        return Err("Topic name too long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '#'))
    {
        return Err("Topic name contains invalid characters");
    }
    Ok(())
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been shut down.
    #[error("Transport closed")]
    Closed,

    /// Topic name rejected.
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// The rejected name.
        topic: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Payload exceeds the transport's limit.
    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Too many topics.
    #[error("Maximum topics reached")]
    MaxTopicsReached,

    /// Failed to publish.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The remote end rejected the operation.
    #[error("Rejected by remote: {0}")]
    Remote(String),

    /// Connection-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A topic-based publish/subscribe transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload to a topic, creating the topic if needed.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    /// Subscribe to a topic.
    ///
    /// The subscription sees records published after this call returns.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, TransportError>;

    /// Get the transport name (e.g., "memory").
    fn name(&self) -> &'static str;

    /// Check if the transport is healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// A live subscription to one topic.
#[async_trait]
pub trait Subscription: Send {
    /// The subscribed topic.
    fn topic(&self) -> &str;

    /// Receive the next record.
    ///
    /// Returns `None` once the subscription is closed or the transport shut
    /// down.
    async fn recv(&mut self) -> Option<Record>;

    /// Release the subscription. Further `recv` calls return `None`.
    async fn close(&mut self);

    /// Check if the subscription is still open.
    fn is_open(&self) -> bool;
}
