//! TCP hub: exposes a local [`Transport`] to [`TcpTransport`](crate::TcpTransport)
//! clients in other processes.
//!
//! Each connection gets a writer task plus one forwarding task per
//! subscription. Frames from a connection are handled in arrival order, so a
//! subscribe is in effect before any publish the same client sends after it.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::traits::{Subscription, Transport, TransportError};
use crate::wire::{self, Frame, WireError};

/// Accepts client connections and serves them from a shared transport.
pub struct TcpHub {
    listener: TcpListener,
    transport: Arc<dyn Transport>,
}

impl TcpHub {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Hub listening");
        Ok(Self {
            listener,
            transport,
        })
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections already accepted are aborted on shutdown.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let TcpHub {
            listener,
            transport,
        } = self;
        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Hub shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.retain(|c| !c.is_finished());
                        let transport = Arc::clone(&transport);
                        connections.push(tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, peer, transport).await {
                                warn!(peer = %peer, error = %e, "Connection closed with error");
                            }
                        }));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
            }
        }

        for connection in connections {
            connection.abort();
        }
    }
}

/// Per-connection subscription forwarders, aborted when the connection ends.
struct Forwarders(HashMap<u64, JoinHandle<()>>);

impl Drop for Forwarders {
    fn drop(&mut self) {
        for (_, handle) in self.0.drain() {
            handle.abort();
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    transport: Arc<dyn Transport>,
) -> Result<(), WireError> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(write_half, outbound_rx, peer));
    let mut forwarders = Forwarders(HashMap::new());

    info!(peer = %peer, "Client connected");

    while let Some(frame) = wire::read_frame(&mut reader).await? {
        match frame {
            Frame::Publish {
                seq,
                topic,
                key,
                payload,
            } => {
                let result = transport
                    .publish(&topic, key.as_deref(), Bytes::from(payload))
                    .await;
                let _ = outbound.send(ack(seq, result.err()));
            }
            Frame::Subscribe { seq, id, topic } => match transport.subscribe(&topic).await {
                Ok(subscription) => {
                    let handle = tokio::spawn(forward(id, subscription, outbound.clone()));
                    if let Some(previous) = forwarders.0.insert(id, handle) {
                        previous.abort();
                    }
                    debug!(peer = %peer, topic = %topic, id, "Client subscribed");
                    let _ = outbound.send(ack(seq, None));
                }
                Err(e) => {
                    let _ = outbound.send(ack(seq, Some(e)));
                }
            },
            Frame::Unsubscribe { id } => {
                if let Some(handle) = forwarders.0.remove(&id) {
                    handle.abort();
                    debug!(peer = %peer, id, "Client unsubscribed");
                }
            }
            other => warn!(peer = %peer, frame = ?other, "Unexpected frame from client"),
        }
    }

    info!(peer = %peer, "Client disconnected");
    drop(forwarders);
    drop(outbound);
    let _ = writer.await;
    Ok(())
}

fn ack(seq: u64, error: Option<TransportError>) -> Frame {
    Frame::Ack {
        seq,
        error: error.map(|e| e.to_string()),
    }
}

/// Forward one subscription's records to the client.
async fn forward(
    id: u64,
    mut subscription: Box<dyn Subscription>,
    outbound: mpsc::UnboundedSender<Frame>,
) {
    while let Some(record) = subscription.recv().await {
        let frame = Frame::Record {
            id,
            topic: record.topic,
            key: record.key,
            timestamp: record.timestamp,
            payload: record.payload.to_vec(),
        };
        if outbound.send(frame).is_err() {
            return;
        }
    }
    let _ = outbound.send(Frame::End { id });
}

async fn write_loop(
    mut socket: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    peer: SocketAddr,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = wire::write_frame(&mut socket, &frame).await {
            warn!(peer = %peer, error = %e, "Failed to write to client");
            break;
        }
    }
}
