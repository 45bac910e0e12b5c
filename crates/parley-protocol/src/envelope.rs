//! Request and response envelopes.
//!
//! Envelopes are JSON objects. Field names follow the existing wire format
//! (`channelName`, not `channel_name`), and absent optional fields may be
//! either omitted or `null`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::ProtocolError;

/// Commands understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Log in, optionally with a preferred nickname.
    Nick,
    /// Join a channel.
    Join,
    /// Leave a channel.
    Leave,
    /// Log out.
    Logout,
    /// Log out before the client exits.
    Exit,
    /// Send a message to one channel.
    Send,
    /// Send a message to every joined channel.
    Broadcast,
}

impl Command {
    /// All commands, in wire order.
    pub const ALL: [Command; 7] = [
        Command::Nick,
        Command::Join,
        Command::Leave,
        Command::Logout,
        Command::Exit,
        Command::Send,
        Command::Broadcast,
    ];

    /// The canonical (upper case) wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Nick => "NICK",
            Command::Join => "JOIN",
            Command::Leave => "LEAVE",
            Command::Logout => "LOGOUT",
            Command::Exit => "EXIT",
            Command::Send => "SEND",
            Command::Broadcast => "BROADCAST",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    /// Parse a command name, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownCommand(s.to_string()))
    }
}

/// A request envelope.
///
/// `command` stays free text on the wire so that a request carrying an
/// unknown command still decodes and can be answered with a proper error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Command name, matched case-insensitively.
    pub command: String,
    /// Nickname of the caller (or the preferred nickname for `NICK`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Target channel for `JOIN`, `LEAVE` and `SEND`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    /// Message text for `SEND` and `BROADCAST`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Request {
    /// Create a bare request for a command.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command: command.as_str().to_string(),
            nickname: None,
            channel_name: None,
            message: None,
        }
    }

    /// Set the nickname.
    #[must_use]
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// Set the channel name.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel_name = Some(channel.into());
        self
    }

    /// Set the message text.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Create a `NICK` request.
    #[must_use]
    pub fn nick(nickname: impl Into<String>) -> Self {
        Self::new(Command::Nick).with_nickname(nickname)
    }

    /// Create a `JOIN` request.
    #[must_use]
    pub fn join(nickname: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::new(Command::Join)
            .with_nickname(nickname)
            .with_channel(channel)
    }

    /// Create a `LEAVE` request.
    #[must_use]
    pub fn leave(nickname: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::new(Command::Leave)
            .with_nickname(nickname)
            .with_channel(channel)
    }

    /// Create a `LOGOUT` request.
    #[must_use]
    pub fn logout(nickname: impl Into<String>) -> Self {
        Self::new(Command::Logout).with_nickname(nickname)
    }

    /// Create an `EXIT` request.
    #[must_use]
    pub fn exit(nickname: impl Into<String>) -> Self {
        Self::new(Command::Exit).with_nickname(nickname)
    }

    /// Create a `SEND` request.
    #[must_use]
    pub fn send(
        nickname: impl Into<String>,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Command::Send)
            .with_nickname(nickname)
            .with_channel(channel)
            .with_message(message)
    }

    /// Create a `BROADCAST` request.
    #[must_use]
    pub fn broadcast(nickname: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Command::Broadcast)
            .with_nickname(nickname)
            .with_message(message)
    }

    /// Resolve the command name.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownCommand`] if the name is not recognised.
    pub fn command(&self) -> Result<Command, ProtocolError> {
        self.command.parse()
    }
}

/// A response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request succeeded.
    #[serde(default, with = "status_wire")]
    pub status: bool,
    /// Human readable outcome.
    #[serde(default)]
    pub message: String,
    /// Assigned nickname, present on login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

impl Response {
    /// Create a successful response.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: true,
            message: message.into(),
            nickname: None,
        }
    }

    /// Create a failed response.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: false,
            message: message.into(),
            nickname: None,
        }
    }

    /// Attach a nickname.
    #[must_use]
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// Check if the response reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status
    }
}

/// `status` is written as the strings `"true"` / `"false"`, which is what
/// existing consumers expect. Readers accept the strings in any case as well
/// as native booleans.
mod status_wire {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(status: &bool, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(if *status { "true" } else { "false" })
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => b,
            Raw::Text(s) => s.eq_ignore_ascii_case("true"),
        })
    }
}
