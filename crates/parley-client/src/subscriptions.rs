//! Per-channel listener tasks.
//!
//! Each joined channel gets one task that owns the channel's subscription
//! and forwards every line to the console. Detaching signals the task, waits
//! for it to finish, and the task closes its subscription on the way out.

use crate::console::Console;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_transport::{Subscription, Transport, TransportError};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A running listener.
struct Listener {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Listener {
    /// Signal the task and wait for it to finish.
    async fn stop(self, channel: &str) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            warn!(channel = %channel, error = %e, "Channel listener did not stop cleanly");
        }
    }
}

/// Registry of channel listeners, keyed by channel name.
pub struct ChannelSubscriptions {
    transport: Arc<dyn Transport>,
    listeners: DashMap<String, Listener>,
    console: Console,
}

impl ChannelSubscriptions {
    /// Create an empty registry.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, console: Console) -> Self {
        Self {
            transport,
            listeners: DashMap::new(),
            console,
        }
    }

    /// Start listening on a channel.
    ///
    /// Returns `false` if a listener for the channel already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel topic cannot be subscribed to.
    pub async fn attach(&self, channel: &str) -> Result<bool, TransportError> {
        if self.listeners.contains_key(channel) {
            return Ok(false);
        }

        let subscription = self.transport.subscribe(channel).await?;
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(listen(subscription, shutdown_rx, self.console.clone()));
        let listener = Listener { shutdown, handle };

        // Another attach may have won the race while we were subscribing.
        let raced = match self.listeners.entry(channel.to_string()) {
            Entry::Occupied(_) => Some(listener),
            Entry::Vacant(slot) => {
                slot.insert(listener);
                None
            }
        };
        if let Some(listener) = raced {
            listener.stop(channel).await;
            return Ok(false);
        }

        debug!(channel = %channel, "Channel listener attached");
        Ok(true)
    }

    /// Stop listening on a channel.
    ///
    /// Returns `false` if there was no listener.
    pub async fn detach(&self, channel: &str) -> bool {
        let Some((_, listener)) = self.listeners.remove(channel) else {
            return false;
        };
        listener.stop(channel).await;
        debug!(channel = %channel, "Channel listener detached");
        true
    }

    /// Stop every listener.
    pub async fn detach_all(&self) {
        for channel in self.channels() {
            self.detach(&channel).await;
        }
    }

    /// Check if a channel has a listener.
    #[must_use]
    pub fn is_attached(&self, channel: &str) -> bool {
        self.listeners.contains_key(channel)
    }

    /// Channels with a listener, sorted.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.listeners.iter().map(|l| l.key().clone()).collect();
        channels.sort();
        channels
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Check if there are no listeners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Listener task body.
async fn listen(
    mut subscription: Box<dyn Subscription>,
    mut shutdown: oneshot::Receiver<()>,
    console: Console,
) {
    loop {
        tokio::select! {
            biased;

            // Fires on an explicit stop and when the registry is dropped.
            _ = &mut shutdown => break,

            record = subscription.recv() => match record {
                Some(record) => console.info(record.text()),
                None => {
                    debug!(channel = %subscription.topic(), "Channel subscription ended");
                    break;
                }
            },
        }
    }

    subscription.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleLine;
    use bytes::Bytes;
    use parley_transport::MemoryTransport;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_attach_forwards_lines() {
        let transport = Arc::new(MemoryTransport::new());
        let (console, mut lines) = Console::channel();
        let subs = ChannelSubscriptions::new(transport.clone(), console);

        assert!(subs.attach("general").await.unwrap());
        transport
            .publish("general", None, Bytes::from_static(b"@general bob: hi"))
            .await
            .unwrap();

        let line = timeout(Duration::from_secs(1), lines.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, ConsoleLine::Info("@general bob: hi".to_string()));
    }

    #[tokio::test]
    async fn test_attach_twice_is_noop() {
        let transport = Arc::new(MemoryTransport::new());
        let (console, _lines) = Console::channel();
        let subs = ChannelSubscriptions::new(transport.clone(), console);

        assert!(subs.attach("general").await.unwrap());
        assert!(!subs.attach("general").await.unwrap());
        assert_eq!(subs.len(), 1);
        assert_eq!(transport.subscriber_count("general"), 1);
    }

    #[tokio::test]
    async fn test_detach_releases_subscription() {
        let transport = Arc::new(MemoryTransport::new());
        let (console, _lines) = Console::channel();
        let subs = ChannelSubscriptions::new(transport.clone(), console);

        subs.attach("a").await.unwrap();
        subs.attach("b").await.unwrap();

        assert!(subs.detach("a").await);
        assert!(!subs.is_attached("a"));
        assert!(subs.is_attached("b"));
        assert_eq!(transport.subscriber_count("a"), 0);
        assert_eq!(transport.subscriber_count("b"), 1);

        assert!(!subs.detach("a").await);
    }

    #[tokio::test]
    async fn test_detach_all() {
        let transport = Arc::new(MemoryTransport::new());
        let (console, _lines) = Console::channel();
        let subs = ChannelSubscriptions::new(transport.clone(), console);

        subs.attach("a").await.unwrap();
        subs.attach("b").await.unwrap();
        subs.detach_all().await;

        assert!(subs.is_empty());
        assert_eq!(transport.stats().total_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_attach_invalid_channel() {
        let transport = Arc::new(MemoryTransport::new());
        let (console, _lines) = Console::channel();
        let subs = ChannelSubscriptions::new(transport, console);

        assert!(subs.attach("not valid").await.is_err());
        assert!(subs.is_empty());
    }
}
