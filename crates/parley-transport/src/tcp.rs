//! Networked transport: a client connection to a [`TcpHub`](crate::TcpHub).
//!
//! One connection carries every publish and subscription of the process.
//! A writer task drains outbound frames onto the socket; a reader task
//! resolves acknowledgements and routes records to their subscriptions.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::record::Record;
use crate::traits::{validate_topic_name, Subscription, Transport, TransportError};
use crate::wire::{self, Frame};

/// State shared by the transport, its tasks and its subscriptions.
struct Shared {
    acks: DashMap<u64, oneshot::Sender<Option<String>>>,
    subscriptions: DashMap<u64, mpsc::UnboundedSender<Record>>,
    closed: AtomicBool,
}

impl Shared {
    /// Mark the connection dead and fail everything waiting on it.
    fn shut(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.acks.clear();
        self.subscriptions.clear();
    }
}

/// A [`Transport`] backed by a TCP connection to a hub.
pub struct TcpTransport {
    outbound: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
    next_seq: AtomicU64,
    peer: SocketAddr,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl TcpTransport {
    /// Connect to a hub.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared {
            acks: DashMap::new(),
            subscriptions: DashMap::new(),
            closed: AtomicBool::new(false),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_loop(write_half, outbound_rx, Arc::clone(&shared)));
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&shared)));

        info!(peer = %peer, "Connected to hub");
        Ok(Self {
            outbound,
            shared,
            next_seq: AtomicU64::new(1),
            peer,
            writer,
            reader,
        })
    }

    /// Address of the hub.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Send a request frame built around a fresh `seq` and wait for its ack.
    async fn request(&self, build: impl FnOnce(u64) -> Frame) -> Result<u64, TransportError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.acks.insert(seq, tx);

        if self.outbound.send(build(seq)).is_err() {
            self.shared.acks.remove(&seq);
            return Err(TransportError::Closed);
        }

        match rx.await {
            Ok(None) => Ok(seq),
            Ok(Some(reason)) => Err(TransportError::Remote(reason)),
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Close the connection. Open subscriptions end.
    pub fn close(&self) {
        if !self.shared.closed.load(Ordering::SeqCst) {
            self.writer.abort();
            self.reader.abort();
            self.shared.shut();
            info!(peer = %self.peer, "Disconnected from hub");
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        validate_topic_name(topic).map_err(|reason| TransportError::InvalidTopic {
            topic: topic.to_string(),
            reason,
        })?;

        self.request(|seq| Frame::Publish {
            seq,
            topic: topic.to_string(),
            key: key.map(str::to_string),
            payload: payload.to_vec(),
        })
        .await?;
        trace!(topic = %topic, "Published record");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, TransportError> {
        self.ensure_open()?;
        validate_topic_name(topic).map_err(|reason| TransportError::InvalidTopic {
            topic: topic.to_string(),
            reason,
        })?;

        // Route before asking, so records that follow the ack are not missed.
        let id = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.subscriptions.insert(id, sender);

        let subscribed = self
            .request(|seq| Frame::Subscribe {
                seq,
                id,
                topic: topic.to_string(),
            })
            .await;
        if let Err(e) = subscribed {
            self.shared.subscriptions.remove(&id);
            return Err(e);
        }

        debug!(topic = %topic, id, "Subscribed");
        Ok(Box::new(TcpSubscription {
            topic: topic.to_string(),
            id,
            receiver: Some(receiver),
            outbound: self.outbound.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }

    fn is_healthy(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
    }
}

/// A subscription forwarded by the hub.
pub struct TcpSubscription {
    topic: String,
    id: u64,
    receiver: Option<mpsc::UnboundedReceiver<Record>>,
    outbound: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
}

impl TcpSubscription {
    fn release(&mut self) {
        if self.receiver.take().is_some() {
            self.shared.subscriptions.remove(&self.id);
            // The hub may already be gone; nothing to release then.
            let _ = self.outbound.send(Frame::Unsubscribe { id: self.id });
            debug!(topic = %self.topic, id = self.id, "Unsubscribed");
        }
    }
}

#[async_trait]
impl Subscription for TcpSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn recv(&mut self) -> Option<Record> {
        let next = self.receiver.as_mut()?.recv().await;
        if next.is_none() {
            self.receiver = None;
        }
        next
    }

    async fn close(&mut self) {
        self.release();
    }

    fn is_open(&self) -> bool {
        self.receiver.is_some()
    }
}

impl Drop for TcpSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

async fn write_loop(
    mut socket: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = wire::write_frame(&mut socket, &frame).await {
            warn!(error = %e, "Failed to write to hub");
            break;
        }
    }
    shared.shut();
}

async fn read_loop(socket: OwnedReadHalf, shared: Arc<Shared>) {
    let mut reader = BufReader::new(socket);
    loop {
        let frame = match wire::read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Hub closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from hub");
                break;
            }
        };

        match frame {
            Frame::Ack { seq, error } => {
                if let Some((_, waiter)) = shared.acks.remove(&seq) {
                    let _ = waiter.send(error);
                }
            }
            Frame::Record {
                id,
                topic,
                key,
                timestamp,
                payload,
            } => {
                if let Some(subscription) = shared.subscriptions.get(&id) {
                    let record = Record {
                        topic,
                        key,
                        payload: Bytes::from(payload),
                        timestamp,
                    };
                    let _ = subscription.send(record);
                }
            }
            Frame::End { id } => {
                shared.subscriptions.remove(&id);
            }
            other => warn!(frame = ?other, "Unexpected frame from hub"),
        }
    }
    shared.shut();
}
