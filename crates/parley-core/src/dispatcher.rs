//! Request dispatcher.
//!
//! Turns one request payload into exactly one response. The dispatcher owns
//! the membership store, so feeding it requests one at a time from a single
//! loop serializes every membership change.

use crate::fanout::FanoutPublisher;
use crate::message::Message;
use crate::store::{MembershipError, MembershipStore};
use parley_protocol::{codec, Command, Request, Response};
use tracing::{debug, warn};

/// Response text for payloads that cannot be decoded.
pub const SERVER_ERROR: &str = "* Server Encountered An Error On Processing Message!";

/// Response text for unrecognised commands.
pub const UNKNOWN_COMMAND: &str = "* Unknown Message Command!";

/// Response text when publishing a chat message fails.
pub const PUBLISH_ERROR: &str = "* Server Encountered An Error On Publishing the Message";

/// Outcome of processing one request.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Resolved command, `None` for malformed requests and unknown commands.
    pub command: Option<Command>,
    /// Response to send back.
    pub response: Response,
}

/// Routes requests to the membership store and fan-out publisher.
pub struct Dispatcher {
    store: MembershipStore,
    fanout: FanoutPublisher,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(store: MembershipStore, fanout: FanoutPublisher) -> Self {
        Self { store, fanout }
    }

    /// Read access to the store.
    #[must_use]
    pub fn store(&self) -> &MembershipStore {
        &self.store
    }

    /// Decode and handle a raw request payload.
    pub async fn process(&mut self, payload: &[u8]) -> Dispatch {
        match codec::decode::<Request>(payload) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "Failed to decode request");
                Dispatch {
                    command: None,
                    response: Response::failure(SERVER_ERROR),
                }
            }
        }
    }

    /// Handle a decoded request.
    pub async fn handle(&mut self, request: Request) -> Dispatch {
        let command = match request.command() {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Rejected request");
                return Dispatch {
                    command: None,
                    response: Response::failure(UNKNOWN_COMMAND),
                };
            }
        };

        debug!(
            command = %command,
            nickname = request.nickname.as_deref().unwrap_or(""),
            channel = request.channel_name.as_deref().unwrap_or(""),
            "Handling request"
        );

        let nickname = request.nickname.as_deref().unwrap_or("");
        let channel = request.channel_name.as_deref().unwrap_or("");
        let text = request.message.as_deref().unwrap_or("");

        let response = match command {
            Command::Nick => self.login(request.nickname.as_deref()),
            Command::Join => self.join(nickname, channel),
            Command::Leave => self.leave(nickname, channel),
            Command::Logout | Command::Exit => self.logout(nickname),
            Command::Send => self.send(nickname, channel, text).await,
            Command::Broadcast => self.broadcast(nickname, text).await,
        };

        Dispatch {
            command: Some(command),
            response,
        }
    }

    fn login(&mut self, requested: Option<&str>) -> Response {
        let login = self.store.login(requested);
        Response::success(login.message()).with_nickname(login.nickname)
    }

    fn join(&mut self, nickname: &str, channel: &str) -> Response {
        match self.store.join(nickname, channel) {
            Ok(outcome) => Response::success(outcome.message()),
            Err(e) => reject(nickname, e),
        }
    }

    fn leave(&mut self, nickname: &str, channel: &str) -> Response {
        match self.store.leave(nickname, channel) {
            Ok(()) => Response::success(format!("* You are no longer a member of #{channel}")),
            Err(e @ MembershipError::NotMember(_)) => {
                let response = reject(nickname, e);
                Response::failure(format!("* Failed to leave.\n{}", response.message))
            }
            Err(e) => reject(nickname, e),
        }
    }

    fn logout(&mut self, nickname: &str) -> Response {
        // Logging out an unknown nickname still succeeds; the end state is the same.
        self.store.logout(nickname);
        Response::success(format!("* {nickname} has been logged out"))
    }

    async fn send(&mut self, nickname: &str, channel: &str, text: &str) -> Response {
        if let Err(e) = self.store.check_send(nickname, channel) {
            return reject(nickname, e);
        }
        if text.is_empty() {
            return reject(nickname, MembershipError::MissingField("message"));
        }

        let message = Message::new(nickname, text);
        match self.fanout.distribute(&message, channel).await {
            Ok(()) => Response::success(""),
            Err(e) => {
                warn!(nickname = %nickname, channel = %channel, error = %e, "Send failed");
                Response::failure(PUBLISH_ERROR)
            }
        }
    }

    async fn broadcast(&mut self, nickname: &str, text: &str) -> Response {
        let channels = match self.store.broadcast_targets(nickname) {
            Ok(channels) => channels,
            Err(e) => return reject(nickname, e),
        };
        if text.is_empty() {
            return reject(nickname, MembershipError::MissingField("message"));
        }

        let message = Message::new(nickname, text);
        match self.fanout.distribute_all(&message, &channels).await {
            Ok(_) => Response::success(""),
            Err(e) => {
                warn!(
                    nickname = %nickname,
                    failed = ?e.failed_channels(),
                    delivered = e.delivered,
                    "Broadcast partially failed"
                );
                Response::failure(PUBLISH_ERROR)
            }
        }
    }
}

fn reject(nickname: &str, error: MembershipError) -> Response {
    debug!(nickname = %nickname, error = %error, "Request rejected");
    Response::failure(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use parley_transport::{MemoryTransport, Transport};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn dispatcher(transport: Arc<MemoryTransport>) -> Dispatcher {
        let store = MembershipStore::with_rng(StoreConfig::default(), StdRng::seed_from_u64(1));
        Dispatcher::new(store, FanoutPublisher::new(transport))
    }

    async fn call(d: &mut Dispatcher, request: Request) -> Response {
        d.handle(request).await.response
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let mut d = dispatcher(Arc::new(MemoryTransport::new()));
        let dispatch = d.process(b"{not json").await;

        assert!(dispatch.command.is_none());
        assert!(!dispatch.response.status);
        assert_eq!(dispatch.response.message, SERVER_ERROR);
        assert_eq!(d.store().user_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let mut d = dispatcher(Arc::new(MemoryTransport::new()));
        let dispatch = d.process(br#"{"command":"DANCE","nickname":"alice"}"#).await;

        assert!(dispatch.command.is_none());
        assert_eq!(dispatch.response, Response::failure(UNKNOWN_COMMAND));
        assert_eq!(d.store().user_count(), 0);
    }

    #[tokio::test]
    async fn test_command_is_case_insensitive() {
        let mut d = dispatcher(Arc::new(MemoryTransport::new()));
        let dispatch = d.process(br#"{"command":"nick","nickname":"alice"}"#).await;

        assert_eq!(dispatch.command, Some(Command::Nick));
        assert!(dispatch.response.status);
        assert_eq!(dispatch.response.nickname.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_join_leave_flow() {
        let mut d = dispatcher(Arc::new(MemoryTransport::new()));
        call(&mut d, Request::nick("alice")).await;

        let r = call(&mut d, Request::join("alice", "general")).await;
        assert!(r.status);
        assert!(r.message.contains("Created new channel #general"));

        let r = call(&mut d, Request::join("alice", "general")).await;
        assert!(!r.status);
        assert_eq!(r.message, "* You are already a member of #general");

        let r = call(&mut d, Request::leave("alice", "general")).await;
        assert_eq!(r, Response::success("* You are no longer a member of #general"));

        let r = call(&mut d, Request::leave("alice", "general")).await;
        assert_eq!(
            r,
            Response::failure("* Failed to leave.\n* You are not a member of #general")
        );
    }

    #[tokio::test]
    async fn test_requests_before_login_fail() {
        let mut d = dispatcher(Arc::new(MemoryTransport::new()));

        for request in [
            Request::join("ghost", "general"),
            Request::leave("ghost", "general"),
            Request::send("ghost", "general", "boo"),
            Request::broadcast("ghost", "boo"),
        ] {
            let r = call(&mut d, request).await;
            assert!(!r.status);
            assert_eq!(r.message, "* You are not logged in");
        }
        assert_eq!(d.store().channel_count(), 0);
    }

    #[tokio::test]
    async fn test_exit_logs_out() {
        let mut d = dispatcher(Arc::new(MemoryTransport::new()));
        call(&mut d, Request::nick("alice")).await;

        let r = call(&mut d, Request::exit("alice")).await;
        assert_eq!(r, Response::success("* alice has been logged out"));
        assert!(!d.store().is_logged_in("alice"));
    }

    #[tokio::test]
    async fn test_send_requires_membership_and_text() {
        let transport = Arc::new(MemoryTransport::new());
        let mut d = dispatcher(transport.clone());
        call(&mut d, Request::nick("alice")).await;

        let r = call(&mut d, Request::send("alice", "general", "hi")).await;
        assert_eq!(r, Response::failure("* You are not a member of #general"));

        call(&mut d, Request::join("alice", "general")).await;
        let r = call(&mut d, Request::send("alice", "general", "")).await;
        assert_eq!(r, Response::failure("* Missing message"));

        let mut sub = transport.subscribe("general").await.unwrap();
        let r = call(&mut d, Request::send("alice", "general", "hi")).await;
        assert_eq!(r, Response::success(""));
        assert_eq!(sub.recv().await.unwrap().text(), "@general alice: hi");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_joined_channel() {
        let transport = Arc::new(MemoryTransport::new());
        let mut d = dispatcher(transport.clone());
        call(&mut d, Request::nick("alice")).await;

        let r = call(&mut d, Request::broadcast("alice", "hello")).await;
        assert!(!r.status);
        assert!(r.message.contains("You haven't joined any channel yet"));

        call(&mut d, Request::join("alice", "a")).await;
        call(&mut d, Request::join("alice", "b")).await;
        let mut a = transport.subscribe("a").await.unwrap();
        let mut b = transport.subscribe("b").await.unwrap();

        let r = call(&mut d, Request::broadcast("alice", "hello")).await;
        assert!(r.status);
        assert_eq!(a.recv().await.unwrap().text(), "@a alice: hello");
        assert_eq!(b.recv().await.unwrap().text(), "@b alice: hello");
    }

    #[tokio::test]
    async fn test_publish_failure_reported() {
        let transport = Arc::new(MemoryTransport::new());
        let mut d = dispatcher(transport.clone());
        call(&mut d, Request::nick("alice")).await;
        call(&mut d, Request::join("alice", "general")).await;

        transport.close();

        let r = call(&mut d, Request::send("alice", "general", "hi")).await;
        assert_eq!(r, Response::failure(PUBLISH_ERROR));
        let r = call(&mut d, Request::broadcast("alice", "hi")).await;
        assert_eq!(r, Response::failure(PUBLISH_ERROR));
    }
}
