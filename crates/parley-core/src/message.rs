//! Chat messages.

use parley_transport::timestamp_millis;

/// An immutable chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: String,
    text: String,
    timestamp: u64,
}

impl Message {
    /// Create a new message stamped with the current time.
    #[must_use]
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: timestamp_millis(),
        }
    }

    /// Nickname of the sender.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Message text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Creation time in milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Format the line subscribers of `channel` see.
    #[must_use]
    pub fn display_line(&self, channel: &str) -> String {
        format!("@{} {}: {}", channel, self.sender, self.text)
    }
}
