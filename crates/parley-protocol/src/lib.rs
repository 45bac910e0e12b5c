//! # parley-protocol
//!
//! Wire protocol definitions for Parley.
//!
//! Clients talk to the server through two shared topics: requests go out on
//! the request topic, responses come back on the response topic. Each
//! request/response pair is linked by a [`CorrelationId`] carried as the
//! record key, never inside the envelope.
//!
//! ## Envelopes
//!
//! - [`Request`] - a command plus the fields it needs
//! - [`Response`] - status, human readable message, optional nickname
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Request, Response};
//!
//! let request = Request::join("alice", "general");
//! let encoded = codec::encode(&request).unwrap();
//! let decoded: Request = codec::decode(&encoded).unwrap();
//! assert_eq!(request, decoded);
//!
//! let response = Response::success("* #general joined successfully");
//! let json = String::from_utf8(codec::encode(&response).unwrap().to_vec()).unwrap();
//! assert!(json.contains(r#""status":"true""#));
//! ```

pub mod codec;
pub mod correlation;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use correlation::CorrelationId;
pub use envelope::{Command, Request, Response};
