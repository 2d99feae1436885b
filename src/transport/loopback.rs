//! # Loopback Transport
//!
//! An in-process chat server. A [`LoopbackHub`] holds named rooms; each
//! [`LoopbackTransport`] is one member. Room messages fan out to every
//! member, the sender included, the way a multi-user chat room echoes
//! groupchat messages.
//!
//! ```text
//!                ┌───────────── LoopbackHub ─────────────┐
//! send_raw ────▶ │ room "lab@conference.local"           │
//!                │   ├─ Greeter ──▶ inbox ──▶ receive_next
//!                │   └─ Alice   ──▶ inbox ──▶ receive_next
//!                └───────────────────────────────────────┘
//! ```

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{
    ChannelInfo, Credentials, Endpoint, InboundMessage, Transport, TransportError, TransportResult,
};

#[derive(Clone)]
struct Member {
    id: u64,
    resource: String,
    address: String,
    inbox: mpsc::UnboundedSender<InboundMessage>,
}

/// Shared state of the in-process server: rooms and, optionally, accounts.
#[derive(Default)]
pub struct LoopbackHub {
    rooms: DashMap<String, Vec<Member>>,
    accounts: DashMap<String, SecretString>,
    next_member_id: AtomicU64,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Once any account exists, authentication checks passwords.
    pub fn register_account(&self, username: &str, password: &str) {
        self.accounts
            .insert(username.to_string(), SecretString::from(password.to_string()));
    }

    pub fn members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().map(|m| m.resource.clone()).collect())
            .unwrap_or_default()
    }

    fn check_password(&self, credentials: &Credentials) -> TransportResult<()> {
        if self.accounts.is_empty() {
            return Ok(());
        }
        match self.accounts.get(&credentials.username) {
            Some(expected)
                if expected.expose_secret() == credentials.password.expose_secret() =>
            {
                Ok(())
            }
            Some(_) => Err(TransportError::Authentication {
                username: credentials.username.clone(),
                message: "wrong password".to_string(),
            }),
            None => Err(TransportError::Authentication {
                username: credentials.username.clone(),
                message: "unknown account".to_string(),
            }),
        }
    }

    fn join(&self, room_id: &str, member: Member) {
        let mut members = self.rooms.entry(room_id.to_string()).or_default();
        members.retain(|m| m.id != member.id);
        members.push(member);
    }

    fn leave(&self, room_id: &str, member_id: u64) {
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.retain(|m| m.id != member_id);
        }
    }

    fn broadcast(&self, room_id: &str, sender_resource: &str, body: &str) -> usize {
        let from = format!("{}/{}", room_id, sender_resource);
        let Some(members) = self.rooms.get(room_id) else {
            return 0;
        };
        members
            .iter()
            .filter(|member| {
                member
                    .inbox
                    .send(InboundMessage {
                        body: body.to_string(),
                        from: from.clone(),
                        to: member.address.clone(),
                        raw_stanza: groupchat_stanza(&from, &member.address, body),
                    })
                    .is_ok()
            })
            .count()
    }
}

#[derive(Default)]
struct LinkState {
    endpoint: Option<Endpoint>,
    connected: bool,
    authenticated: bool,
    username: Option<String>,
    joined: Option<ChannelInfo>,
}

/// One member connection to a [`LoopbackHub`].
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    member_id: u64,
    link: Mutex<LinkState>,
    inbox_tx: mpsc::UnboundedSender<InboundMessage>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    closed: watch::Sender<bool>,
}

impl LoopbackTransport {
    pub fn new(hub: Arc<LoopbackHub>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(true);
        let member_id = hub.next_member_id.fetch_add(1, Ordering::SeqCst);
        Self {
            hub,
            member_id,
            link: Mutex::new(LinkState::default()),
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(inbox_rx),
            closed,
        }
    }

    /// Simulates a silent network drop: liveness probes turn false and the
    /// inbox closes, but nobody above the transport is told.
    pub fn drop_connection(&self) {
        debug!("Loopback member {} dropped", self.member_id);
        self.tear_down();
    }

    fn link(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tear_down(&self) {
        let mut link = self.link();
        if let Some(channel) = link.joined.take() {
            self.hub.leave(&channel.room_id, self.member_id);
        }
        link.connected = false;
        link.authenticated = false;
        link.username = None;
        drop(link);

        self.closed.send_replace(true);
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn configure(&self, endpoint: &Endpoint) -> TransportResult<()> {
        self.link().endpoint = Some(endpoint.clone());
        Ok(())
    }

    async fn connect(&self) -> TransportResult<()> {
        let endpoint = {
            let link = self.link();
            if link.connected {
                return Ok(());
            }
            link.endpoint.clone().ok_or(TransportError::NotConfigured)?
        };

        // Messages queued before the last disconnect belong to the old
        // connection. `closed` is still set, so a parked receiver lets go
        // of the inbox.
        let mut inbox = self.inbox_rx.lock().await;
        let mut stale = 0;
        while inbox.try_recv().is_ok() {
            stale += 1;
        }
        drop(inbox);

        debug!(
            "Loopback member {} connected to {}, dropped {} stale messages",
            self.member_id, endpoint, stale
        );
        self.link().connected = true;
        self.closed.send_replace(false);
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::Network {
                message: "not connected".to_string(),
            });
        }
        self.hub.check_password(credentials)?;

        let mut link = self.link();
        link.authenticated = true;
        link.username = Some(credentials.username.clone());
        Ok(())
    }

    async fn join_channel(&self, channel: &ChannelInfo) -> TransportResult<()> {
        let mut link = self.link();
        if !link.authenticated {
            return Err(TransportError::Protocol {
                message: "join before authentication".to_string(),
            });
        }
        if let Some(previous) = link.joined.take() {
            self.hub.leave(&previous.room_id, self.member_id);
        }

        let host = link
            .endpoint
            .as_ref()
            .map(|e| e.host.as_str())
            .unwrap_or_default();
        let username = link.username.as_deref().unwrap_or_default();
        let member = Member {
            id: self.member_id,
            resource: channel.resource.clone(),
            address: format!("{}@{}/{}", username, host, channel.resource),
            inbox: self.inbox_tx.clone(),
        };
        self.hub.join(&channel.room_id, member);
        link.joined = Some(channel.clone());
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        debug!("Loopback member {} disconnecting", self.member_id);
        self.tear_down();
        Ok(())
    }

    fn send_raw(&self, channel_id: &str, text: &str) -> TransportResult<()> {
        let link = self.link();
        if !link.connected {
            return Err(TransportError::Network {
                message: "not connected".to_string(),
            });
        }
        let channel = link
            .joined
            .as_ref()
            .filter(|c| c.room_id == channel_id)
            .ok_or_else(|| TransportError::Protocol {
                message: format!("not a member of {}", channel_id),
            })?;
        let delivered = self.hub.broadcast(channel_id, &channel.resource, text);
        debug!("Loopback broadcast to {} members of {}", delivered, channel_id);
        Ok(())
    }

    async fn receive_next(&self) -> TransportResult<InboundMessage> {
        let mut closed = self.closed.subscribe();
        let mut inbox = self.inbox_rx.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::Closed),
            message = inbox.recv() => message.ok_or(TransportError::Closed),
        }
    }

    fn is_connected(&self) -> bool {
        self.link().connected
    }

    fn is_authenticated(&self) -> bool {
        self.link().authenticated
    }
}

fn groupchat_stanza(from: &str, to: &str, body: &str) -> String {
    format!(
        r#"<message type="groupchat" from="{}" to="{}"><body>{}</body></message>"#,
        escape_xml(from),
        escape_xml(to),
        escape_xml(body)
    )
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
