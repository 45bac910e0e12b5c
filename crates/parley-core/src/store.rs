//! The membership store.
//!
//! Holds every logged-in user and every channel ever joined. A user moves
//! `LoggedOut -> LoggedIn -> LoggedOut`; while logged in it carries its set of
//! joined channels. Channels are created by the first join and are kept when
//! they become empty.

use crate::member::{Channel, User};
use parley_transport::{timestamp_millis, validate_topic_name};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};

/// Membership validation errors.
///
/// The `Display` text is what the caller sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    /// No logged-in user with that nickname.
    #[error("* You are not logged in")]
    NotLoggedIn,

    /// A required request field is absent or empty.
    #[error("* Missing {0}")]
    MissingField(&'static str),

    /// Channel name is not usable as a topic.
    #[error("* Invalid channel name #{name}: {reason}")]
    InvalidChannel {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Channel name collides with an internal topic.
    #[error("* #{0} is reserved")]
    ReservedChannel(String),

    /// User already joined the channel.
    #[error("* You are already a member of #{0}")]
    AlreadyMember(String),

    /// User is not in the channel.
    #[error("* You are not a member of #{0}")]
    NotMember(String),

    /// Broadcast from a user with no channels.
    #[error("* Failed to send the message\n* You haven't joined any channel yet")]
    NoChannels,
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Generated nicknames are `user<N>` with `N` in `0..nickname_range`.
    pub nickname_range: u32,
    /// Names that may not be joined as channels.
    pub reserved_channels: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            nickname_range: 99_999,
            reserved_channels: Vec::new(),
        }
    }
}

/// Result of a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    /// The nickname the user ended up with.
    pub nickname: String,
    /// Whether the nickname was generated instead of the requested one.
    pub generated: bool,
    /// Whether the requested nickname was already taken.
    pub taken: bool,
}

impl Login {
    /// Human readable outcome.
    #[must_use]
    pub fn message(&self) -> String {
        let mut lines = Vec::with_capacity(3);
        if self.taken {
            lines.push("* Username exist!".to_string());
        }
        if self.generated {
            lines.push("* Random user generated".to_string());
        }
        lines.push(format!("* Successfully logged in as {}", self.nickname));
        lines.join("\n")
    }
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Joined channel.
    pub channel: String,
    /// Whether this join created the channel.
    pub created: bool,
}

impl JoinOutcome {
    /// Human readable outcome.
    #[must_use]
    pub fn message(&self) -> String {
        if self.created {
            format!(
                "* Created new channel #{}\n* #{} joined successfully",
                self.channel, self.channel
            )
        } else {
            format!("* #{} joined successfully", self.channel)
        }
    }
}

/// Authoritative users and channels.
///
/// Not synchronized: exactly one owner mutates it.
pub struct MembershipStore {
    users: HashMap<String, User>,
    channels: HashMap<String, Channel>,
    reserved: HashSet<String>,
    nickname_range: u32,
    rng: StdRng,
}

impl MembershipStore {
    /// Create an empty store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create an empty store drawing generated nicknames from `rng`.
    #[must_use]
    pub fn with_rng(config: StoreConfig, rng: StdRng) -> Self {
        Self {
            users: HashMap::new(),
            channels: HashMap::new(),
            reserved: config.reserved_channels.into_iter().collect(),
            nickname_range: config.nickname_range.max(1),
            rng,
        }
    }

    /// Log a user in.
    ///
    /// An empty or already taken nickname is replaced by a generated one.
    pub fn login(&mut self, requested: Option<&str>) -> Login {
        let requested = requested.map(str::trim).filter(|n| !n.is_empty());
        let taken = requested.is_some_and(|n| self.users.contains_key(n));

        let (nickname, generated) = match requested {
            Some(n) if !taken => (n.to_string(), false),
            _ => (self.generate_nickname(), true),
        };

        self.users.insert(nickname.clone(), User::new(nickname.clone()));
        info!(nickname = %nickname, generated, users = self.users.len(), "User logged in");

        Login {
            nickname,
            generated,
            taken,
        }
    }

    /// Draw `user<N>` until it does not collide with a logged-in user.
    ///
    /// Retries are unbounded: this only spins forever if every name in the
    /// range is taken.
    fn generate_nickname(&mut self) -> String {
        loop {
            let candidate = format!("user{}", self.rng.gen_range(0..self.nickname_range));
            if !self.users.contains_key(&candidate) {
                return candidate;
            }
            debug!(candidate = %candidate, "Generated nickname collided, retrying");
        }
    }

    /// Join a channel, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails without mutation if the user is not logged in, the name is not a
    /// valid channel, or the user already joined it.
    pub fn join(&mut self, nickname: &str, channel: &str) -> Result<JoinOutcome, MembershipError> {
        if channel.is_empty() {
            return Err(MembershipError::MissingField("channel name"));
        }
        validate_topic_name(channel).map_err(|reason| MembershipError::InvalidChannel {
            name: channel.to_string(),
            reason,
        })?;
        if self.reserved.contains(channel) {
            return Err(MembershipError::ReservedChannel(channel.to_string()));
        }

        let user = self
            .users
            .get_mut(nickname)
            .ok_or(MembershipError::NotLoggedIn)?;
        if user.is_member(channel) {
            return Err(MembershipError::AlreadyMember(channel.to_string()));
        }

        let created = !self.channels.contains_key(channel);
        if created {
            self.channels
                .insert(channel.to_string(), Channel::new(channel));
            debug!(channel = %channel, "Created channel");
        }
        user.joined_channels.insert(channel.to_string());

        debug!(nickname = %nickname, channel = %channel, "Joined channel");
        Ok(JoinOutcome {
            channel: channel.to_string(),
            created,
        })
    }

    /// Leave a channel.
    ///
    /// # Errors
    ///
    /// Fails without mutation if the user is not logged in or not a member.
    pub fn leave(&mut self, nickname: &str, channel: &str) -> Result<(), MembershipError> {
        if channel.is_empty() {
            return Err(MembershipError::MissingField("channel name"));
        }

        let user = self
            .users
            .get_mut(nickname)
            .ok_or(MembershipError::NotLoggedIn)?;
        if !user.joined_channels.remove(channel) {
            return Err(MembershipError::NotMember(channel.to_string()));
        }

        debug!(nickname = %nickname, channel = %channel, "Left channel");
        Ok(())
    }

    /// Log a user out, dropping all of its memberships.
    ///
    /// Returns the removed user, if it was logged in.
    pub fn logout(&mut self, nickname: &str) -> Option<User> {
        let mut user = self.users.remove(nickname)?;
        user.logout_timestamp = Some(timestamp_millis());
        info!(
            nickname = %nickname,
            channels = user.joined_channels.len(),
            users = self.users.len(),
            "User logged out"
        );
        Some(user)
    }

    /// Check that `nickname` may send to `channel`.
    ///
    /// # Errors
    ///
    /// Fails if the user is not logged in or not a member of the channel.
    pub fn check_send(&self, nickname: &str, channel: &str) -> Result<(), MembershipError> {
        if channel.is_empty() {
            return Err(MembershipError::MissingField("channel name"));
        }

        let user = self.users.get(nickname).ok_or(MembershipError::NotLoggedIn)?;
        if !user.is_member(channel) {
            return Err(MembershipError::NotMember(channel.to_string()));
        }
        Ok(())
    }

    /// Channels a broadcast from `nickname` goes to.
    ///
    /// # Errors
    ///
    /// Fails if the user is not logged in or has joined no channel.
    pub fn broadcast_targets(&self, nickname: &str) -> Result<Vec<String>, MembershipError> {
        let user = self.users.get(nickname).ok_or(MembershipError::NotLoggedIn)?;
        if user.joined_channels.is_empty() {
            return Err(MembershipError::NoChannels);
        }
        Ok(user.joined_channels.iter().cloned().collect())
    }

    /// Get a logged-in user.
    #[must_use]
    pub fn user(&self, nickname: &str) -> Option<&User> {
        self.users.get(nickname)
    }

    /// Check if a nickname is logged in.
    #[must_use]
    pub fn is_logged_in(&self, nickname: &str) -> bool {
        self.users.contains_key(nickname)
    }

    /// Get a channel.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    /// Nicknames of the members of a channel, sorted.
    #[must_use]
    pub fn members(&self, channel: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .users
            .values()
            .filter(|u| u.is_member(channel))
            .map(|u| u.nickname.clone())
            .collect();
        members.sort();
        members
    }

    /// Number of logged-in users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for MembershipStore {
    fn default() -> Self {
        Self::new()
    }
}
