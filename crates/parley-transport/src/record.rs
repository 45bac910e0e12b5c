//! Records carried by the transport.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A single published record.
#[derive(Debug, Clone)]
pub struct Record {
    /// Topic the record was published to.
    pub topic: String,
    /// Optional record key (the correlation id on RPC topics).
    pub key: Option<String>,
    /// Opaque payload.
    pub payload: Bytes,
    /// Publish time in milliseconds.
    pub timestamp: u64,
}

impl Record {
    /// Create a new record stamped with the current time.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: Option<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload: payload.into(),
            timestamp: timestamp_millis(),
        }
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Interpret the payload as UTF-8 text, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
