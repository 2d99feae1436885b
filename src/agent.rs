//! # Agent
//!
//! A named participant wiring one [`ChannelSession`] to one
//! [`ResponderRegistry`]. The name doubles as the resource under which the
//! agent logs in and appears in rooms.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use sail::{agent::Agent, event::Event, transport::loopback::{LoopbackHub, LoopbackTransport}};
//! # async fn demo() -> sail::SailResult<()> {
//! let hub = LoopbackHub::new();
//! let agent = Agent::new("Echo", Arc::new(LoopbackTransport::new(hub)));
//!
//! let session = agent.session().clone();
//! agent.on("ping", move |_| {
//!     let _ = session.send(Event::new("pong"));
//! })?;
//!
//! agent.connect("localhost", 5222).await?;
//! agent.login("echo", "secret").await?;
//! let receiving = agent.start();
//! agent.join_channel("lab@conference.localhost").await?;
//! # agent.shutdown().await?;
//! # let _ = receiving.await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use secrecy::SecretString;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    config::AgentConfig,
    connection::ConnectionState,
    event::{Event, RegistryResult, ResponderRegistry},
    session::{ChannelSession, SessionResult},
    transport::{ChannelInfo, Credentials, Endpoint, Transport},
    SailResult,
};

pub const DEFAULT_PORT: u16 = 5222;

pub struct Agent {
    name: String,
    session: Arc<ChannelSession>,
    registry: ResponderRegistry,
}

impl Agent {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            session: Arc::new(ChannelSession::new(transport)),
            registry: ResponderRegistry::new(),
        }
    }

    pub fn from_config(config: &AgentConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(config.name.clone(), transport)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Arc<ChannelSession> {
        &self.session
    }

    pub fn registry(&self) -> &ResponderRegistry {
        &self.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Registers a responder; fails if the type already has one.
    pub fn on<F>(&self, event_type: &str, responder: F) -> RegistryResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.registry.register(event_type, responder)
    }

    pub async fn connect(&self, host: &str, port: u16) -> SessionResult<()> {
        self.session.configure(Endpoint::new(host, port)).await?;
        self.session.connect().await?;
        info!("{} connected to {}:{}", self.name, host, port);
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> SessionResult<()> {
        self.session
            .authenticate(Credentials {
                username: username.to_string(),
                password: SecretString::from(password.to_string()),
                resource: self.name.clone(),
            })
            .await?;
        info!("{} logged in as {}", self.name, username);
        Ok(())
    }

    pub async fn join_channel(&self, room_id: &str) -> SessionResult<()> {
        self.session
            .join_channel(ChannelInfo {
                room_id: room_id.to_string(),
                resource: self.name.clone(),
            })
            .await?;
        info!("{} joined {}", self.name, room_id);
        Ok(())
    }

    /// Connects, logs in and, if the config names a room, joins it.
    pub async fn setup(&self, config: &AgentConfig) -> SailResult<()> {
        self.connect(&config.connection.host, config.connection.port)
            .await?;
        self.session
            .authenticate(config.credentials.to_credentials(&self.name))
            .await?;
        if let Some(room) = &config.room {
            self.join_channel(room).await?;
        }
        Ok(())
    }

    pub fn send(&self, event: Event) -> SessionResult<()> {
        self.session.send(event)
    }

    /// Runs the receive loop on the current task.
    pub async fn run(&self) -> SessionResult<()> {
        self.session.run(&self.registry).await
    }

    /// Spawns the receive loop.
    ///
    /// The loop ends as soon as the transport reports itself closed, so start
    /// it after [`Agent::connect`]: a loopback transport that was never
    /// connected is closed and the loop returns `Ok` at once.
    pub fn start(&self) -> JoinHandle<SessionResult<()>> {
        let session = self.session.clone();
        let registry = self.registry.clone();
        debug!("{} starting receive loop", self.name);
        tokio::spawn(async move { session.run(&registry).await })
    }

    /// Stops the receive loop and disconnects.
    pub async fn shutdown(&self) -> SessionResult<()> {
        self.session.shutdown();
        self.session.disconnect().await?;
        info!("{} shut down", self.name);
        Ok(())
    }

    pub fn agent_jid(&self) -> Option<String> {
        self.session.agent_jid()
    }

    pub fn room_jid(&self) -> Option<String> {
        self.session.room_jid()
    }

    pub fn agent_jid_in_room(&self) -> Option<String> {
        self.session.agent_jid_in_room()
    }
}
