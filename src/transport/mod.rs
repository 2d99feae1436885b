//! # Transport
//!
//! The messaging protocol underneath the event channel. The core only needs
//! the primitives below; framing, the authentication handshake and TLS are
//! the implementation's business.
//!
//! [`loopback`] provides an in-process implementation where every
//! transport is a member of a room on a shared [`loopback::LoopbackHub`].

pub mod loopback;

use async_trait::async_trait;
use mockall::automock;
use secrecy::SecretString;
use thiserror::Error;

/// Server address the transport connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    pub resource: String,
}

/// The room to broadcast into and the nickname (resource) used there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub room_id: String,
    pub resource: String,
}

/// One message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub body: String,
    pub from: String,
    pub to: String,
    pub raw_stanza: String,
}

#[automock]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn configure(&self, endpoint: &Endpoint) -> TransportResult<()>;

    async fn connect(&self) -> TransportResult<()>;

    async fn authenticate(&self, credentials: &Credentials) -> TransportResult<()>;

    async fn join_channel(&self, channel: &ChannelInfo) -> TransportResult<()>;

    async fn disconnect(&self) -> TransportResult<()>;

    /// Fire-and-forget broadcast of opaque text to the joined channel.
    /// Safe to call concurrently.
    fn send_raw(&self, channel_id: &str, text: &str) -> TransportResult<()>;

    /// Waits for the next message addressed to this member.
    /// Returns [`TransportError::Closed`] once the transport is closed.
    async fn receive_next(&self) -> TransportResult<InboundMessage>;

    fn is_connected(&self) -> bool;

    fn is_authenticated(&self) -> bool;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport not configured")]
    NotConfigured,

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Authentication failed for {username}: {message}")]
    Authentication { username: String, message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Transport lagged, {count} messages skipped")]
    Lagged { count: u64 },

    #[error("Transport closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;
