//! Users and channels held by the membership store.

use std::collections::BTreeSet;

/// A logged-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique nickname.
    pub nickname: String,
    /// Joined channel names.
    pub joined_channels: BTreeSet<String>,
    /// Stamped when the user logs out. Informational only.
    pub logout_timestamp: Option<u64>,
}

impl User {
    /// Create a user with no channels.
    #[must_use]
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            joined_channels: BTreeSet::new(),
            logout_timestamp: None,
        }
    }

    /// Check channel membership.
    #[must_use]
    pub fn is_member(&self, channel: &str) -> bool {
        self.joined_channels.contains(channel)
    }
}

/// A chat channel.
///
/// Members are not stored here; they are derived from users' joined sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Unique channel name, also the topic name.
    pub name: String,
}

impl Channel {
    /// Create a channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
