//! Fan-out of chat messages to channel topics.

use crate::message::Message;
use crate::metrics;
use bytes::Bytes;
use parley_transport::{Transport, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{trace, warn};

/// One or more channel publishes failed.
///
/// Channels that were published to are not rolled back.
#[derive(Debug, Error)]
#[error("Fan-out failed for {} of {} channels", .failed.len(), .failed.len() + .delivered)]
pub struct FanoutError {
    /// Channels that failed, with the cause.
    pub failed: Vec<(String, TransportError)>,
    /// Number of channels published to successfully.
    pub delivered: usize,
}

impl FanoutError {
    /// Names of the channels that failed.
    #[must_use]
    pub fn failed_channels(&self) -> Vec<&str> {
        self.failed.iter().map(|(c, _)| c.as_str()).collect()
    }
}

/// Publishes chat lines to channel topics.
#[derive(Clone)]
pub struct FanoutPublisher {
    transport: Arc<dyn Transport>,
}

impl FanoutPublisher {
    /// Create a publisher on a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Publish a message to one channel.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the publish fails.
    pub async fn distribute(&self, message: &Message, channel: &str) -> Result<(), TransportError> {
        let line = message.display_line(channel);
        let result = self.transport.publish(channel, None, Bytes::from(line)).await;
        metrics::record_publish(result.is_ok());
        result?;
        trace!(channel = %channel, sender = %message.sender(), "Distributed message");
        Ok(())
    }

    /// Publish a message to every channel, independently.
    ///
    /// A failing channel does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns a [`FanoutError`] listing the failed channels if any failed.
    pub async fn distribute_all<I, S>(&self, message: &Message, channels: I) -> Result<usize, FanoutError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for channel in channels {
            let channel = channel.as_ref();
            match self.distribute(message, channel).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Fan-out publish failed");
                    failed.push((channel.to_string(), e));
                }
            }
        }

        if failed.is_empty() {
            Ok(delivered)
        } else {
            Err(FanoutError { failed, delivered })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_transport::MemoryTransport;

    #[tokio::test]
    async fn test_distribute_single_channel() {
        let transport = Arc::new(MemoryTransport::new());
        let mut sub = transport.subscribe("general").await.unwrap();
        let fanout = FanoutPublisher::new(transport.clone());

        fanout
            .distribute(&Message::new("alice", "hi"), "general")
            .await
            .unwrap();

        let record = sub.recv().await.unwrap();
        assert_eq!(record.text(), "@general alice: hi");
        assert!(record.key().is_none());
    }

    #[tokio::test]
    async fn test_distribute_all_once_per_channel() {
        let transport = Arc::new(MemoryTransport::new());
        let mut a = transport.subscribe("a").await.unwrap();
        let mut b = transport.subscribe("b").await.unwrap();
        let fanout = FanoutPublisher::new(transport.clone());

        let delivered = fanout
            .distribute_all(&Message::new("alice", "hello"), ["a", "b"])
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(a.recv().await.unwrap().text(), "@a alice: hello");
        assert_eq!(b.recv().await.unwrap().text(), "@b alice: hello");
    }

    #[tokio::test]
    async fn test_distribute_all_partial_failure() {
        let transport = Arc::new(MemoryTransport::new());
        let mut good = transport.subscribe("good").await.unwrap();
        let fanout = FanoutPublisher::new(transport.clone());

        let err = fanout
            .distribute_all(&Message::new("alice", "hello"), ["bad name", "good"])
            .await
            .unwrap_err();

        assert_eq!(err.delivered, 1);
        assert_eq!(err.failed_channels(), vec!["bad name"]);
        assert_eq!(err.to_string(), "Fan-out failed for 1 of 2 channels");
        assert_eq!(good.recv().await.unwrap().text(), "@good alice: hello");
    }
}
