//! # Sail
//!
//! Agents that coordinate by broadcasting typed JSON events into a shared
//! chat room.
//!
//! ## Core Components
//!
//! - **Event Codec**: JSON envelope with typed payload inference ([`event::codec`])
//! - **Responder Registry**: event type → responder dispatch ([`event::responder_registry`])
//! - **Connection State Machine**: lifecycle guards with liveness reconciliation ([`connection`])
//! - **Channel Session**: send and receive loop over a [`transport::Transport`] ([`session`])
//! - **Agent**: façade wiring the above together ([`agent`])
//!
//! The wire protocol sits behind [`transport::Transport`]; an in-process
//! implementation lives in [`transport::loopback`].

pub mod agent;
pub mod agents;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod session;
pub mod timestamp;
pub mod transport;

pub use agent::{Agent, DEFAULT_PORT};
pub use connection::{ConnectionError, ConnectionState, ConnectionStateMachine};
pub use error::{Error, SailResult};
pub use event::{Event, Payload, ResponderRegistry};
pub use session::{ChannelSession, SessionError, SessionResult};
