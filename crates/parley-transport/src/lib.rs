//! # parley-transport
//!
//! Transport abstraction layer for Parley.
//!
//! Parley only needs two things from a pub/sub system:
//!
//! - `publish(topic, key?, payload)`
//! - `subscribe(topic)` returning a lazy stream of records
//!
//! Delivery is assumed to be at least once, unordered across topics and
//! ordered within a topic for a single producer. Topics are created on demand.
//!
//! ## Transports
//!
//! - [`MemoryTransport`] - in-process topics on tokio broadcast channels
//! - [`TcpTransport`] - a connection to a [`TcpHub`], which serves another
//!   process's transport over length-prefixed MessagePack frames
//!
//! ```rust
//! use bytes::Bytes;
//! use parley_transport::{MemoryTransport, Transport};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = MemoryTransport::new();
//! let mut sub = transport.subscribe("general").await.unwrap();
//!
//! transport
//!     .publish("general", None, Bytes::from_static(b"hello"))
//!     .await
//!     .unwrap();
//!
//! let record = sub.recv().await.unwrap();
//! assert_eq!(&record.payload[..], b"hello");
//! # }
//! ```

pub mod hub;
pub mod memory;
pub mod record;
pub mod tcp;
pub mod traits;
pub mod wire;

pub use hub::TcpHub;
pub use memory::{MemoryTransport, MemoryTransportConfig, TransportStats};
pub use record::{timestamp_millis, Record};
pub use tcp::{TcpSubscription, TcpTransport};
pub use traits::{validate_topic_name, Subscription, Transport, TransportError};
