//! # parley-client
//!
//! Client side of Parley.
//!
//! - **CorrelationBroker** - turns "publish a request, wait for the response
//!   with the same key" into a single `call`
//! - **ChannelSubscriptions** - one listener task per joined channel
//! - **ChatSession** - interprets console commands and keeps login state
//! - **Console** - where everything meant for the user ends up
//!
//! ## Example
//!
//! ```rust,ignore
//! use parley_client::{BrokerConfig, ChatSession, Console, CorrelationBroker};
//!
//! let (console, mut lines) = Console::channel();
//! let broker = CorrelationBroker::connect(transport.clone(), BrokerConfig::default()).await?;
//! let mut session = ChatSession::new(broker, transport, console);
//! session.handle_line("NICK alice").await;
//! ```

pub mod broker;
pub mod command;
pub mod console;
pub mod session;
pub mod subscriptions;

pub use broker::{BrokerConfig, CallError, CorrelationBroker};
pub use command::{parse_line, ClientCommand};
pub use console::{Console, ConsoleLine};
pub use session::{ChatSession, Flow};
pub use subscriptions::ChannelSubscriptions;
