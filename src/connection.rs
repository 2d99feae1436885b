//! # Connection Lifecycle
//!
//! Gates which session operations are legal at each point of the
//! connection lifecycle.
//!
//! ```text
//!                  configure
//!                  ┌──────┐
//!                  ▼      │
//!          ┌──────────────┴┐  connect   ┌───────────┐ authenticate ┌───────────────┐
//!  ───────▶│ Disconnected  │──────────▶│ Connected │─────────────▶│ Authenticated │◀─┐
//!          └───────────────┘           └───────────┘              └───────┬───────┘  │
//!                  ▲                                                      │ join,    │
//!                  │                 disconnect (from any state)          └──send────┘
//!                  └──────────────────────────────────────────────────────
//! ```
//!
//! The machine is pure bookkeeping; it never talks to the transport. The
//! session checks a guard, performs the transport call, then applies the
//! matching [`Transition`]. A failed guard leaves the state untouched.
//!
//! Before each guard the session calls [`ConnectionStateMachine::reconcile`]
//! with the transport's liveness probes. Reconciliation only moves the state
//! down, so a silent drop cannot leave the session believing it is still
//! authenticated. It is best-effort: a drop between the probe and the
//! transport call still surfaces as a transport error.

use strum::Display;
use thiserror::Error;
use tracing::{debug, warn};

use crate::transport::{ChannelInfo, Endpoint, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Authenticated,
}

/// Operations gated by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Configure,
    Connect,
    Authenticate,
    JoinChannel,
    Send,
    Disconnect,
}

/// Snapshot of the transport's own view of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub connected: bool,
    pub authenticated: bool,
}

impl Liveness {
    pub fn probe(transport: &dyn Transport) -> Self {
        Self {
            connected: transport.is_connected(),
            authenticated: transport.is_authenticated(),
        }
    }
}

/// A completed lifecycle step, applied after the transport call succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Configured(Endpoint),
    Connected,
    Authenticated { username: String },
    Joined(ChannelInfo),
    Disconnected,
}

impl Transition {
    pub fn operation(&self) -> Operation {
        match self {
            Transition::Configured(_) => Operation::Configure,
            Transition::Connected => Operation::Connect,
            Transition::Authenticated { .. } => Operation::Authenticate,
            Transition::Joined(_) => Operation::JoinChannel,
            Transition::Disconnected => Operation::Disconnect,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    endpoint: Option<Endpoint>,
    username: Option<String>,
    channel: Option<ChannelInfo>,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn channel(&self) -> Option<&ChannelInfo> {
        self.channel.as_ref()
    }

    /// Fails with [`ConnectionError::IllegalState`] when `operation` is not
    /// legal in the current state.
    pub fn guard(&self, operation: Operation) -> ConnectionResult<()> {
        use ConnectionState::*;

        let refusal = match (operation, self.state) {
            (Operation::Disconnect, _) => None,
            (Operation::Configure, Disconnected) => None,
            (Operation::Configure, _) => Some("configuration is only allowed while disconnected"),
            (Operation::Connect, Disconnected) if self.endpoint.is_none() => {
                Some("configure must precede connect")
            }
            (Operation::Connect, Disconnected) => None,
            (Operation::Connect, _) => Some("already connected"),
            (Operation::Authenticate, Connected) => None,
            (Operation::Authenticate, Disconnected) => Some("not connected"),
            (Operation::Authenticate, Authenticated) => Some("already authenticated"),
            (Operation::JoinChannel, Authenticated) => None,
            (Operation::JoinChannel, _) => Some("not authenticated"),
            (Operation::Send, Authenticated) if self.channel.is_none() => {
                Some("no channel joined")
            }
            (Operation::Send, Authenticated) => None,
            (Operation::Send, _) => Some("not authenticated"),
        };

        match refusal {
            None => Ok(()),
            Some(reason) => Err(self.illegal(operation, reason)),
        }
    }

    /// The joined channel, if sending is legal right now.
    pub fn channel_for_send(&self) -> ConnectionResult<&ChannelInfo> {
        self.guard(Operation::Send)?;
        self.channel
            .as_ref()
            .ok_or_else(|| self.illegal(Operation::Send, "no channel joined"))
    }

    /// Re-checks the guard, then commits the transition.
    pub fn apply(&mut self, transition: Transition) -> ConnectionResult<()> {
        self.guard(transition.operation())?;
        let from = self.state;

        match transition {
            Transition::Configured(endpoint) => self.endpoint = Some(endpoint),
            Transition::Connected => self.state = ConnectionState::Connected,
            Transition::Authenticated { username } => {
                self.state = ConnectionState::Authenticated;
                self.username = Some(username);
            }
            Transition::Joined(channel) => self.channel = Some(channel),
            Transition::Disconnected => self.reset(),
        }

        debug!("Connection {} -> {}", from, self.state);
        Ok(())
    }

    /// Moves the state down to what the transport reports. Returns whether
    /// anything changed.
    pub fn reconcile(&mut self, liveness: Liveness) -> bool {
        let corrected = match self.state {
            ConnectionState::Disconnected => return false,
            _ if !liveness.connected => ConnectionState::Disconnected,
            ConnectionState::Authenticated if !liveness.authenticated => {
                ConnectionState::Connected
            }
            _ => return false,
        };

        warn!(
            "Transport reports {:?}, correcting connection state {} -> {}",
            liveness, self.state, corrected
        );
        match corrected {
            ConnectionState::Disconnected => self.reset(),
            _ => {
                self.state = corrected;
                self.username = None;
                self.channel = None;
            }
        }
        true
    }

    fn illegal(&self, operation: Operation, reason: &str) -> ConnectionError {
        ConnectionError::IllegalState {
            operation,
            state: self.state,
            reason: reason.to_string(),
        }
    }

    // endpoint survives so a reconnect needs no new configure
    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.username = None;
        self.channel = None;
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Illegal state for {operation}: {reason} (state: {state})")]
    IllegalState {
        operation: Operation,
        state: ConnectionState,
        reason: String,
    },
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;
