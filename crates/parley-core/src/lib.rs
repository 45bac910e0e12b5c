//! # parley-core
//!
//! Server-side building blocks for Parley.
//!
//! - **MembershipStore** - authoritative record of logged-in users and the
//!   channels they joined
//! - **Dispatcher** - decodes requests, routes them by command and produces
//!   exactly one response per request
//! - **FanoutPublisher** - writes chat lines to one or many channel topics
//! - **Message** - an immutable chat message
//! - **RequestService** - the consume loop that feeds the dispatcher from the
//!   request topic and publishes keyed responses
//!
//! ## Architecture
//!
//! ```text
//! request topic ──▶ ┌────────────┐ ──▶ response topic
//!                   │ Dispatcher │
//!                   └────────────┘
//!                     │        │
//!                     ▼        ▼
//!         ┌─────────────────┐ ┌─────────────────┐
//!         │ MembershipStore │ │ FanoutPublisher │ ──▶ channel topics
//!         └─────────────────┘ └─────────────────┘
//! ```
//!
//! The dispatcher owns the store by value. Whoever drives the dispatcher is
//! the single writer of membership state, so no locking is involved.

pub mod dispatcher;
pub mod fanout;
pub mod member;
pub mod message;
pub mod metrics;
pub mod service;
pub mod store;

pub use dispatcher::{Dispatch, Dispatcher};
pub use fanout::{FanoutError, FanoutPublisher};
pub use member::{Channel, User};
pub use message::Message;
pub use service::{RequestService, ServiceConfig};
pub use store::{JoinOutcome, Login, MembershipError, MembershipStore, StoreConfig};
