//! Console output sink.
//!
//! The session and the channel listeners never print directly; they push
//! lines into a channel and whoever owns the receiving end decides where the
//! lines go.

use tokio::sync::mpsc;

/// A line meant for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLine {
    /// Normal output.
    Info(String),
    /// Failure output.
    Error(String),
}

impl ConsoleLine {
    /// The line text.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            ConsoleLine::Info(text) | ConsoleLine::Error(text) => text,
        }
    }
}

/// Cloneable handle for writing console lines.
#[derive(Debug, Clone)]
pub struct Console {
    sender: mpsc::UnboundedSender<ConsoleLine>,
}

impl Console {
    /// Create a console and the receiver its lines arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConsoleLine>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Write a normal line.
    pub fn info(&self, text: impl Into<String>) {
        // A dropped receiver means nobody is watching; the line is discarded.
        let _ = self.sender.send(ConsoleLine::Info(text.into()));
    }

    /// Write a failure line.
    pub fn error(&self, text: impl Into<String>) {
        let _ = self.sender.send(ConsoleLine::Error(text.into()));
    }
}
