//! Request consume loop.
//!
//! Reads requests off the request topic one at a time, runs each through
//! the [`Dispatcher`], and publishes the response on the response topic
//! keyed by the request's correlation id.

use crate::dispatcher::Dispatcher;
use crate::metrics;
use parley_protocol::{codec, CorrelationId};
use parley_transport::{Record, Subscription, Transport, TransportError};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Topics the service reads from and writes to.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Topic requests arrive on.
    pub request_topic: String,
    /// Topic responses are published to.
    pub response_topic: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_topic: "rpcRequestTopic".to_string(),
            response_topic: "rpcResponseTopic".to_string(),
        }
    }
}

/// The server side of the request/response exchange.
pub struct RequestService {
    transport: Arc<dyn Transport>,
    subscription: Box<dyn Subscription>,
    dispatcher: Dispatcher,
    config: ServiceConfig,
}

impl RequestService {
    /// Subscribe to the request topic.
    ///
    /// Requests published after this returns are guaranteed to be seen by
    /// [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns an error if the request topic cannot be subscribed to.
    pub async fn bind(
        transport: Arc<dyn Transport>,
        dispatcher: Dispatcher,
        config: ServiceConfig,
    ) -> Result<Self, TransportError> {
        let subscription = transport.subscribe(&config.request_topic).await?;
        info!(
            request_topic = %config.request_topic,
            response_topic = %config.response_topic,
            transport = transport.name(),
            "Request service bound"
        );
        Ok(Self {
            transport,
            subscription,
            dispatcher,
            config,
        })
    }

    /// Serve requests until `shutdown` resolves or the request stream ends.
    ///
    /// Hands the dispatcher back so the final membership state can be
    /// inspected.
    pub async fn run<F>(mut self, shutdown: F) -> Dispatcher
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let record = tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Request service shutting down");
                    break;
                }

                record = self.subscription.recv() => match record {
                    Some(record) => record,
                    None => {
                        warn!("Request stream ended");
                        break;
                    }
                },
            };

            self.serve(record).await;
        }

        self.subscription.close().await;
        self.dispatcher
    }

    /// Handle one request record.
    async fn serve(&mut self, record: Record) {
        let Some(key) = record.key() else {
            warn!(topic = %record.topic, "Dropping request without correlation key");
            metrics::record_failure("unkeyed");
            return;
        };
        let id = CorrelationId::from(key);

        let started = Instant::now();
        let dispatch = self.dispatcher.process(&record.payload).await;
        let command = dispatch.command.map_or("INVALID", |c| c.as_str());

        metrics::record_request(command, started.elapsed().as_secs_f64());
        if !dispatch.response.status {
            metrics::record_failure(command);
        }
        let store = self.dispatcher.store();
        metrics::set_store_size(store.user_count(), store.channel_count());

        let payload = match codec::encode(&dispatch.response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(correlation_id = %id, error = %e, "Failed to encode response");
                return;
            }
        };

        match self
            .transport
            .publish(&self.config.response_topic, Some(id.as_str()), payload)
            .await
        {
            Ok(()) => debug!(
                correlation_id = %id,
                command = command,
                status = dispatch.response.status,
                "Response published"
            ),
            Err(e) => warn!(correlation_id = %id, error = %e, "Failed to publish response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::FanoutPublisher;
    use crate::store::MembershipStore;
    use bytes::Bytes;
    use parley_protocol::{Request, Response};
    use parley_transport::MemoryTransport;
    use tokio::sync::oneshot;

    async fn bind(transport: &Arc<MemoryTransport>) -> RequestService {
        let dispatcher = Dispatcher::new(
            MembershipStore::new(),
            FanoutPublisher::new(transport.clone()),
        );
        RequestService::bind(transport.clone(), dispatcher, ServiceConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_response_is_keyed_by_request() {
        let transport = Arc::new(MemoryTransport::new());
        let service = bind(&transport).await;
        let mut responses = transport.subscribe("rpcResponseTopic").await.unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(service.run(async {
            let _ = stopped.await;
        }));

        let payload = codec::encode(&Request::nick("alice")).unwrap();
        transport
            .publish("rpcRequestTopic", Some("id-1"), payload)
            .await
            .unwrap();

        let record = responses.recv().await.unwrap();
        assert_eq!(record.key(), Some("id-1"));
        let response: Response = codec::decode(&record.payload).unwrap();
        assert!(response.status);
        assert_eq!(response.nickname.as_deref(), Some("alice"));

        stop.send(()).unwrap();
        let dispatcher = handle.await.unwrap();
        assert!(dispatcher.store().is_logged_in("alice"));
    }

    #[tokio::test]
    async fn test_unkeyed_request_is_skipped() {
        let transport = Arc::new(MemoryTransport::new());
        let service = bind(&transport).await;
        let mut responses = transport.subscribe("rpcResponseTopic").await.unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(service.run(async {
            let _ = stopped.await;
        }));

        let nick = codec::encode(&Request::nick("alice")).unwrap();
        transport
            .publish("rpcRequestTopic", None, nick)
            .await
            .unwrap();
        transport
            .publish("rpcRequestTopic", Some("id-2"), Bytes::from_static(b"garbage"))
            .await
            .unwrap();

        // The only response is the one for the keyed request.
        let record = responses.recv().await.unwrap();
        assert_eq!(record.key(), Some("id-2"));
        let response: Response = codec::decode(&record.payload).unwrap();
        assert!(!response.status);

        stop.send(()).unwrap();
        let dispatcher = handle.await.unwrap();
        assert_eq!(dispatcher.store().user_count(), 0);
    }

    #[tokio::test]
    async fn test_stops_when_transport_closes() {
        let transport = Arc::new(MemoryTransport::new());
        let service = bind(&transport).await;

        let handle = tokio::spawn(service.run(std::future::pending()));
        transport.close();

        let dispatcher = handle.await.unwrap();
        assert_eq!(dispatcher.store().user_count(), 0);
    }
}
