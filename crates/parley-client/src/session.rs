//! Interactive chat session.
//!
//! Interprets console lines, issues the matching requests through the
//! [`CorrelationBroker`] and keeps the channel listeners in step with the
//! server's view of the user's memberships.

use crate::broker::CorrelationBroker;
use crate::command::{parse_line, ClientCommand};
use crate::console::Console;
use crate::subscriptions::ChannelSubscriptions;
use parley_protocol::{Request, Response};
use parley_transport::Transport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const INVALID_COMMAND: &str = "* Invalid Command";
const LOGIN_FIRST: &str = "* Please login first!";
const LOGOUT_FIRST: &str = "* Please logout first!";
const PROGRAM_EXITED: &str = "* Program exited";

/// Whether the session loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// The user exited; stop reading.
    Exit,
}

/// One user's chat session.
pub struct ChatSession {
    broker: CorrelationBroker,
    subscriptions: ChannelSubscriptions,
    console: Console,
    nickname: Option<String>,
}

impl ChatSession {
    /// Create a logged-out session.
    #[must_use]
    pub fn new(broker: CorrelationBroker, transport: Arc<dyn Transport>, console: Console) -> Self {
        Self {
            broker,
            subscriptions: ChannelSubscriptions::new(transport, console.clone()),
            console,
            nickname: None,
        }
    }

    /// The nickname the server assigned, if logged in.
    #[must_use]
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    /// The channel listeners.
    #[must_use]
    pub fn subscriptions(&self) -> &ChannelSubscriptions {
        &self.subscriptions
    }

    /// Handle lines from `input` until `EXIT` or until every sender is gone.
    ///
    /// A closed input behaves like `EXIT`.
    pub async fn run(&mut self, mut input: mpsc::Receiver<String>) {
        while let Some(line) = input.recv().await {
            if self.handle_line(&line).await == Flow::Exit {
                return;
            }
        }

        debug!("Input ended");
        self.exit().await;
    }

    /// Handle one console line.
    pub async fn handle_line(&mut self, line: &str) -> Flow {
        let Some(command) = parse_line(line) else {
            self.console.error(INVALID_COMMAND);
            return Flow::Continue;
        };

        if command == ClientCommand::Exit {
            self.exit().await;
            return Flow::Exit;
        }

        if let ClientCommand::Nick(requested) = command {
            self.login(requested).await;
            return Flow::Continue;
        }

        let Some(nickname) = self.nickname.clone() else {
            self.console.error(LOGIN_FIRST);
            return Flow::Continue;
        };

        match command {
            ClientCommand::Join(channel) => self.join(&nickname, channel).await,
            ClientCommand::Leave(channel) => self.leave(&nickname, channel).await,
            ClientCommand::Logout => self.logout(&nickname).await,
            ClientCommand::Send { channel, text } => {
                self.request(Request::send(nickname, channel, text)).await;
            }
            ClientCommand::Broadcast(text) => {
                self.request(Request::broadcast(nickname, text)).await;
            }
            ClientCommand::Nick(_) | ClientCommand::Exit => {}
        }
        Flow::Continue
    }

    async fn login(&mut self, requested: String) {
        if self.nickname.is_some() {
            self.console.error(LOGOUT_FIRST);
            return;
        }

        let Some(response) = self.request(Request::nick(requested.as_str())).await else {
            return;
        };
        if response.status {
            let nickname = response.nickname.unwrap_or(requested);
            info!(nickname = %nickname, "Logged in");
            self.nickname = Some(nickname);
        }
    }

    async fn join(&mut self, nickname: &str, channel: String) {
        let response = self.request(Request::join(nickname, channel.as_str())).await;
        if response.is_some_and(|r| r.status) {
            if let Err(e) = self.subscriptions.attach(&channel).await {
                warn!(channel = %channel, error = %e, "Failed to listen on channel");
                self.console.error(format!("* {e}"));
            }
        }
    }

    async fn leave(&mut self, nickname: &str, channel: String) {
        let response = self.request(Request::leave(nickname, channel.as_str())).await;
        if response.is_some_and(|r| r.status) {
            self.subscriptions.detach(&channel).await;
        }
    }

    async fn logout(&mut self, nickname: &str) {
        let response = self.request(Request::logout(nickname)).await;
        if response.is_some_and(|r| r.status) {
            self.subscriptions.detach_all().await;
            self.nickname = None;
        }
    }

    async fn exit(&mut self) {
        if let Some(nickname) = self.nickname.take() {
            self.request(Request::exit(nickname)).await;
        }
        self.subscriptions.detach_all().await;
        self.console.info(PROGRAM_EXITED);
    }

    /// Issue a request and print its response.
    ///
    /// Returns `None` when the call itself failed.
    async fn request(&self, request: Request) -> Option<Response> {
        match self.broker.call(&request).await {
            Ok(response) => {
                self.print(&response);
                Some(response)
            }
            Err(e) => {
                warn!(command = %request.command, error = %e, "Call failed");
                self.console.error(format!("* {e}"));
                None
            }
        }
    }

    fn print(&self, response: &Response) {
        if response.message.is_empty() {
            return;
        }
        if response.status {
            self.console.info(response.message.as_str());
        } else {
            self.console.error(response.message.as_str());
        }
    }
}
