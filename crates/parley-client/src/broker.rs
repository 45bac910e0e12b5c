//! Correlation broker.
//!
//! Every call publishes a request keyed by a fresh [`CorrelationId`] and
//! waits for the response record carrying the same key. A single reader task
//! owns the response subscription and hands each record to the waiter
//! registered for its key, so any number of calls can be in flight at once.
//!
//! Responses whose key has no registered waiter (another caller's response,
//! or one that arrived early) are parked in a bounded buffer and handed over
//! if a waiter for that key registers later.

use bytes::Bytes;
use parley_protocol::{codec, CorrelationId, ProtocolError, Request, Response};
use parley_transport::{Subscription, Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Topic requests are published to.
    pub request_topic: String,
    /// Topic responses are read from.
    pub response_topic: String,
    /// How long a call waits for its response. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// How many unmatched responses are kept for late waiters.
    pub unclaimed_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            request_topic: "rpcRequestTopic".to_string(),
            response_topic: "rpcResponseTopic".to_string(),
            call_timeout: Some(Duration::from_secs(30)),
            unclaimed_capacity: 1024,
        }
    }
}

/// Call errors.
#[derive(Debug, Error)]
pub enum CallError {
    /// No matching response within the configured timeout.
    #[error("No response received within {0:?}")]
    Timeout(Duration),

    /// The response stream ended; no response can arrive any more.
    #[error("Response stream closed")]
    Closed,

    /// Another call is already waiting on this correlation id.
    #[error("A call is already waiting for response {0}")]
    DuplicateWaiter(CorrelationId),

    /// Publishing the request failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The request could not be encoded or the response decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// How a waiter gets its response.
enum Registration {
    /// The response had already arrived.
    Ready(Bytes),
    /// The reader will resolve this; `token` identifies the waiter entry.
    Waiting {
        token: u64,
        rx: oneshot::Receiver<Bytes>,
    },
}

impl Registration {
    fn token(&self) -> Option<u64> {
        match self {
            Registration::Ready(_) => None,
            Registration::Waiting { token, .. } => Some(*token),
        }
    }
}

struct Waiter {
    token: u64,
    sender: oneshot::Sender<Bytes>,
}

/// Pending waiters plus responses nobody claimed yet.
struct Registry {
    pending: HashMap<CorrelationId, Waiter>,
    unclaimed: VecDeque<(CorrelationId, Bytes)>,
    capacity: usize,
    next_token: u64,
    closed: bool,
}

impl Registry {
    fn new(capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            unclaimed: VecDeque::new(),
            capacity,
            next_token: 0,
            closed: false,
        }
    }

    fn register(&mut self, id: &CorrelationId) -> Result<Registration, CallError> {
        if let Some(pos) = self.unclaimed.iter().position(|(key, _)| key == id) {
            if let Some((_, payload)) = self.unclaimed.remove(pos) {
                return Ok(Registration::Ready(payload));
            }
        }
        if self.closed {
            return Err(CallError::Closed);
        }
        if self.pending.contains_key(id) {
            return Err(CallError::DuplicateWaiter(id.clone()));
        }

        let (sender, rx) = oneshot::channel();
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        self.pending.insert(id.clone(), Waiter { token, sender });
        Ok(Registration::Waiting { token, rx })
    }

    /// Remove the waiter entry, but only if it is still the one `token` names.
    fn release(&mut self, id: &CorrelationId, token: u64) {
        if self.pending.get(id).is_some_and(|w| w.token == token) {
            self.pending.remove(id);
        }
    }

    fn deliver(&mut self, id: CorrelationId, payload: Bytes) {
        if let Some(waiter) = self.pending.remove(&id) {
            if waiter.sender.send(payload).is_err() {
                debug!(correlation_id = %id, "Caller gone before its response arrived");
            }
            return;
        }

        if self.capacity == 0 {
            return;
        }
        if self.unclaimed.len() >= self.capacity {
            if let Some((evicted, _)) = self.unclaimed.pop_front() {
                trace!(correlation_id = %evicted, "Evicted unclaimed response");
            }
        }
        self.unclaimed.push_back((id, payload));
    }

    /// Stop accepting waiters and fail the outstanding ones.
    fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops the waiter entry when a call finishes, times out or is cancelled.
struct PendingGuard<'a> {
    registry: &'a Mutex<Registry>,
    id: &'a CorrelationId,
    token: Option<u64>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token {
            lock(self.registry).release(self.id, token);
        }
    }
}

/// Blocking request/response over a pub/sub transport.
pub struct CorrelationBroker {
    transport: Arc<dyn Transport>,
    registry: Arc<Mutex<Registry>>,
    config: BrokerConfig,
    reader: JoinHandle<()>,
}

impl CorrelationBroker {
    /// Subscribe to the response topic and start the reader task.
    ///
    /// # Errors
    ///
    /// Returns an error if the response topic cannot be subscribed to.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        config: BrokerConfig,
    ) -> Result<Self, TransportError> {
        let subscription = transport.subscribe(&config.response_topic).await?;
        let registry = Arc::new(Mutex::new(Registry::new(config.unclaimed_capacity)));
        let reader = tokio::spawn(read_responses(subscription, Arc::clone(&registry)));

        debug!(
            request_topic = %config.request_topic,
            response_topic = %config.response_topic,
            timeout = ?config.call_timeout,
            "Correlation broker connected"
        );

        Ok(Self {
            transport,
            registry,
            config,
            reader,
        })
    }

    /// Issue a request and wait for its response.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be published, the response does not
    /// arrive in time, the response stream ends, or the response is not a
    /// valid envelope.
    pub async fn call(&self, request: &Request) -> Result<Response, CallError> {
        let id = CorrelationId::generate();
        let payload = codec::encode(request)?;

        // Register before publishing so the response cannot slip past.
        let registration = lock(&self.registry).register(&id)?;
        let _guard = PendingGuard {
            registry: &self.registry,
            id: &id,
            token: registration.token(),
        };

        trace!(correlation_id = %id, command = %request.command, "Publishing request");
        self.transport
            .publish(&self.config.request_topic, Some(id.as_str()), payload)
            .await?;

        self.await_response(registration).await
    }

    /// Wait for the response to a request published elsewhere under `id`.
    ///
    /// Only one caller may wait on a given id at a time.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call), minus publishing. Fails with
    /// [`CallError::DuplicateWaiter`] if another call already waits on `id`.
    pub async fn wait_for(&self, id: &CorrelationId) -> Result<Response, CallError> {
        let registration = lock(&self.registry).register(id)?;
        let _guard = PendingGuard {
            registry: &self.registry,
            id,
            token: registration.token(),
        };
        self.await_response(registration).await
    }

    async fn await_response(&self, registration: Registration) -> Result<Response, CallError> {
        let payload = match registration {
            Registration::Ready(payload) => payload,
            Registration::Waiting { rx, .. } => match self.config.call_timeout {
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(result) => result.map_err(|_| CallError::Closed)?,
                    Err(_) => return Err(CallError::Timeout(limit)),
                },
                None => rx.await.map_err(|_| CallError::Closed)?,
            },
        };

        Ok(codec::decode(&payload)?)
    }

    /// Number of calls waiting for a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        lock(&self.registry).pending.len()
    }

    /// Number of parked responses nobody has claimed.
    #[must_use]
    pub fn unclaimed_responses(&self) -> usize {
        lock(&self.registry).unclaimed.len()
    }

    /// Broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

impl Drop for CorrelationBroker {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Reader task: route every keyed response record to its waiter.
async fn read_responses(mut subscription: Box<dyn Subscription>, registry: Arc<Mutex<Registry>>) {
    while let Some(record) = subscription.recv().await {
        let Some(key) = record.key() else {
            warn!(topic = %record.topic, "Ignoring response without correlation key");
            continue;
        };
        let id = CorrelationId::from(key);
        lock(&registry).deliver(id, record.payload);
    }

    lock(&registry).close();
    subscription.close().await;
    debug!("Response reader stopped");
}
