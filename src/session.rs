//! # Channel Session
//!
//! Couples one [`ConnectionStateMachine`] with one [`Transport`]. Lifecycle
//! calls and `send` are checked against the machine before they reach the
//! transport; [`ChannelSession::run`] pumps inbound messages through the
//! codec into a [`ResponderRegistry`].
//!
//! The machine lives behind a short-lived lock that is never held across an
//! `.await`. Every guarded call reconciles with the transport's liveness
//! probes first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::{
    ConnectionError, ConnectionState, ConnectionStateMachine, Liveness, Operation, Transition,
};
use crate::event::{codec, CodecError, Delivery, Event, ResponderRegistry};
use crate::transport::{
    ChannelInfo, Credentials, Endpoint, InboundMessage, Transport, TransportError,
};

pub struct ChannelSession {
    transport: Arc<dyn Transport>,
    machine: Mutex<ConnectionStateMachine>,
    shutdown_tx: watch::Sender<bool>,
}

impl ChannelSession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            transport,
            machine: Mutex::new(ConnectionStateMachine::new()),
            shutdown_tx,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Current state after reconciling with the transport.
    pub fn state(&self) -> ConnectionState {
        let mut machine = self.machine();
        machine.reconcile(Liveness::probe(self.transport.as_ref()));
        machine.state()
    }

    pub async fn configure(&self, endpoint: Endpoint) -> SessionResult<()> {
        self.check(Operation::Configure)?;
        self.transport.configure(&endpoint).await?;
        self.commit(Transition::Configured(endpoint))
    }

    /// Also clears a shutdown left over from the previous connection.
    pub async fn connect(&self) -> SessionResult<()> {
        self.check(Operation::Connect)?;
        self.transport.connect().await?;
        self.commit(Transition::Connected)?;
        self.shutdown_tx.send_replace(false);
        Ok(())
    }

    pub async fn authenticate(&self, credentials: Credentials) -> SessionResult<()> {
        self.check(Operation::Authenticate)?;
        self.transport.authenticate(&credentials).await?;
        self.commit(Transition::Authenticated {
            username: credentials.username,
        })
    }

    pub async fn join_channel(&self, channel: ChannelInfo) -> SessionResult<()> {
        self.check(Operation::JoinChannel)?;
        self.transport.join_channel(&channel).await?;
        self.commit(Transition::Joined(channel))
    }

    /// Always returns the machine to `Disconnected`, even when the transport
    /// reports an error while closing.
    pub async fn disconnect(&self) -> SessionResult<()> {
        let closed = self.transport.disconnect().await;
        self.commit(Transition::Disconnected)?;
        closed?;
        Ok(())
    }

    /// Encodes the event and broadcasts it to the joined channel.
    ///
    /// Fills an absent timestamp with the current time. Callable from inside
    /// a responder.
    pub fn send(&self, mut event: Event) -> SessionResult<()> {
        let room_id = {
            let mut machine = self.machine();
            machine.reconcile(Liveness::probe(self.transport.as_ref()));
            machine.channel_for_send()?.room_id.clone()
        };

        event.stamp_if_unset();
        let text = codec::encode(&event)?;
        debug!("Sending {} event to {}", event.event_type(), room_id);
        self.transport.send_raw(&room_id, &text)?;
        Ok(())
    }

    /// Receives and dispatches until the transport closes or
    /// [`ChannelSession::shutdown`] is called.
    ///
    /// A shutdown requested before the loop starts still stops it; the
    /// request holds until the next successful [`ChannelSession::connect`].
    /// A message that fails to decode is logged and skipped. Transport
    /// errors other than close and lag end the loop with that error.
    pub async fn run(&self, registry: &ResponderRegistry) -> SessionResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut received_count: u64 = 0;
        info!("Receive loop started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    info!("Receive loop stopped by shutdown");
                    return Ok(());
                }
                received = self.transport.receive_next() => match received {
                    Ok(message) => {
                        received_count += 1;
                        self.deliver(message, registry);
                    }
                    Err(TransportError::Closed) if received_count == 0 => {
                        info!("Receive loop stopped, transport closed before any message arrived");
                        return Ok(());
                    }
                    Err(TransportError::Closed) => {
                        info!("Receive loop stopped, transport closed after {} messages", received_count);
                        return Ok(());
                    }
                    Err(TransportError::Lagged { count }) => {
                        warn!("Receive loop lagged, {} messages skipped", count);
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
    }

    /// Decodes one inbound message, attaches its addressing and dispatches
    /// it. Returns whether a responder ran.
    pub fn deliver(&self, message: InboundMessage, registry: &ResponderRegistry) -> bool {
        let mut event = match codec::decode(&message.body) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping undecodable message from {}: {}", message.from, e);
                return false;
            }
        };

        event.attach_delivery(Delivery {
            from: message.from,
            to: message.to,
            raw_stanza: message.raw_stanza,
        });
        registry.dispatch(&event)
    }

    /// Stops the receive loop, including one that has not started yet.
    /// Has no effect on the connection.
    pub fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            debug!("Receive loop shutdown requested");
        }
    }

    /// `user@host` once authenticated.
    pub fn agent_jid(&self) -> Option<String> {
        let machine = self.machine();
        let username = machine.username()?;
        let endpoint = machine.endpoint()?;
        Some(format!("{}@{}", username, endpoint.host))
    }

    pub fn room_jid(&self) -> Option<String> {
        self.machine().channel().map(|c| c.room_id.clone())
    }

    /// `room/resource`, the address other members see as the sender.
    pub fn agent_jid_in_room(&self) -> Option<String> {
        self.machine()
            .channel()
            .map(|c| format!("{}/{}", c.room_id, c.resource))
    }

    fn machine(&self) -> MutexGuard<'_, ConnectionStateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, operation: Operation) -> SessionResult<()> {
        let mut machine = self.machine();
        machine.reconcile(Liveness::probe(self.transport.as_ref()));
        machine.guard(operation)?;
        Ok(())
    }

    fn commit(&self, transition: Transition) -> SessionResult<()> {
        self.machine().apply(transition)?;
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    State(#[from] ConnectionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    use secrecy::SecretString;

    use super::*;
    use crate::transport::MockTransport;

    const ROOM: &str = "lab@conference.localhost";

    /// A transport that accepts every lifecycle call and reports the link
    /// as live until `alive` is cleared.
    fn healthy_mock(alive: Arc<AtomicBool>) -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect_configure().returning(|_| Ok(()));
        mock.expect_connect().returning(|| Ok(()));
        mock.expect_authenticate().returning(|_| Ok(()));
        mock.expect_join_channel().returning(|_| Ok(()));
        mock.expect_disconnect().returning(|| Ok(()));
        let connected = alive.clone();
        mock.expect_is_connected()
            .returning(move || connected.load(Ordering::SeqCst));
        mock.expect_is_authenticated()
            .returning(move || alive.load(Ordering::SeqCst));
        mock
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "greeter".to_string(),
            password: SecretString::from("secret".to_string()),
            resource: "Greeter".to_string(),
        }
    }

    async fn joined(session: &ChannelSession) {
        session
            .configure(Endpoint::new("localhost", 5222))
            .await
            .unwrap();
        session.connect().await.unwrap();
        session.authenticate(credentials()).await.unwrap();
        session
            .join_channel(ChannelInfo {
                room_id: ROOM.to_string(),
                resource: "Greeter".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_before_authenticate_never_reaches_transport() {
        let mut mock = MockTransport::new();
        mock.expect_is_connected().return_const(false);
        mock.expect_is_authenticated().return_const(false);
        mock.expect_send_raw().times(0);

        let session = ChannelSession::new(Arc::new(mock));
        let result = session.send(Event::new("hello"));
        assert!(matches!(
            result,
            Err(SessionError::State(ConnectionError::IllegalState {
                operation: Operation::Send,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_connect_before_configure_fails() {
        let mut mock = MockTransport::new();
        mock.expect_is_connected().return_const(false);
        mock.expect_is_authenticated().return_const(false);
        mock.expect_connect().times(0);

        let session = ChannelSession::new(Arc::new(mock));
        assert!(matches!(
            session.connect().await,
            Err(SessionError::State(_))
        ));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_encodes_and_stamps() {
        let alive = Arc::new(AtomicBool::new(true));
        let mut mock = healthy_mock(alive);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        mock.expect_send_raw().returning(move |room, text| {
            sink.lock()
                .unwrap()
                .push((room.to_string(), text.to_string()));
            Ok(())
        });

        let session = ChannelSession::new(Arc::new(mock));
        joined(&session).await;
        session
            .send(Event::new("welcome").with_payload("Hello Alice!"))
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ROOM);
        let event = codec::decode(&sent[0].1).unwrap();
        assert_eq!(event.event_type(), "welcome");
        assert!(event.timestamp().is_some());
    }

    #[tokio::test]
    async fn test_silent_drop_is_reconciled_before_send() {
        let alive = Arc::new(AtomicBool::new(true));
        let mut mock = healthy_mock(alive.clone());
        mock.expect_send_raw().times(0);

        let session = ChannelSession::new(Arc::new(mock));
        joined(&session).await;
        assert_eq!(session.state(), ConnectionState::Authenticated);

        alive.store(false, Ordering::SeqCst);
        assert!(matches!(
            session.send(Event::new("hello")),
            Err(SessionError::State(_))
        ));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_then_reconnect() {
        let alive = Arc::new(AtomicBool::new(true));
        let mock = healthy_mock(alive);
        let session = ChannelSession::new(Arc::new(mock));

        joined(&session).await;
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.room_jid(), None);

        session.connect().await.unwrap();
        session.authenticate(credentials()).await.unwrap();
        assert_eq!(session.state(), ConnectionState::Authenticated);
    }

    #[tokio::test]
    async fn test_transport_error_leaves_state_unchanged() {
        let mut mock = MockTransport::new();
        mock.expect_is_connected().return_const(false);
        mock.expect_is_authenticated().return_const(false);
        mock.expect_configure().returning(|_| Ok(()));
        mock.expect_connect().returning(|| {
            Err(TransportError::Network {
                message: "refused".to_string(),
            })
        });

        let session = ChannelSession::new(Arc::new(mock));
        session
            .configure(Endpoint::new("localhost", 5222))
            .await
            .unwrap();
        assert!(matches!(
            session.connect().await,
            Err(SessionError::Transport(TransportError::Network { .. }))
        ));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_run_skips_undecodable_and_stops_on_close() {
        let mut inbound = VecDeque::from(vec![
            Ok(InboundMessage {
                body: "not json".to_string(),
                from: format!("{}/Mallory", ROOM),
                to: "greeter@localhost/Greeter".to_string(),
                raw_stanza: String::new(),
            }),
            Ok(InboundMessage {
                body: r#"{"eventType":"ping"}"#.to_string(),
                from: format!("{}/Alice", ROOM),
                to: "greeter@localhost/Greeter".to_string(),
                raw_stanza: "<message/>".to_string(),
            }),
        ]);
        let mut mock = MockTransport::new();
        mock.expect_receive_next()
            .returning(move || inbound.pop_front().unwrap_or(Err(TransportError::Closed)));

        let registry = ResponderRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry
            .register("ping", move |event| {
                sink.lock().unwrap().push((
                    event.sender_nickname().map(str::to_string),
                    event.raw_stanza().map(str::to_string),
                ));
            })
            .unwrap();

        let session = ChannelSession::new(Arc::new(mock));
        session.run(&registry).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Some("Alice".to_string()), Some("<message/>".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_run_returns_transport_failure() {
        let mut mock = MockTransport::new();
        mock.expect_receive_next().returning(|| {
            Err(TransportError::Protocol {
                message: "stream error".to_string(),
            })
        });

        let session = ChannelSession::new(Arc::new(mock));
        let result = session.run(&ResponderRegistry::new()).await;
        assert!(matches!(
            result,
            Err(SessionError::Transport(TransportError::Protocol { .. }))
        ));
    }

    #[tokio::test]
    async fn test_identity_helpers() {
        let alive = Arc::new(AtomicBool::new(true));
        let session = ChannelSession::new(Arc::new(healthy_mock(alive)));
        assert_eq!(session.agent_jid(), None);

        joined(&session).await;
        assert_eq!(session.agent_jid(), Some("greeter@localhost".to_string()));
        assert_eq!(session.room_jid(), Some(ROOM.to_string()));
        assert_eq!(
            session.agent_jid_in_room(),
            Some(format!("{}/Greeter", ROOM))
        );
    }

    /// Accepts every lifecycle call; `receive_next` never completes.
    struct SilentTransport;

    #[async_trait::async_trait]
    impl Transport for SilentTransport {
        async fn configure(&self, _: &Endpoint) -> crate::transport::TransportResult<()> {
            Ok(())
        }
        async fn connect(&self) -> crate::transport::TransportResult<()> {
            Ok(())
        }
        async fn authenticate(&self, _: &Credentials) -> crate::transport::TransportResult<()> {
            Ok(())
        }
        async fn join_channel(&self, _: &ChannelInfo) -> crate::transport::TransportResult<()> {
            Ok(())
        }
        async fn disconnect(&self) -> crate::transport::TransportResult<()> {
            Ok(())
        }
        fn send_raw(&self, _: &str, _: &str) -> crate::transport::TransportResult<()> {
            Ok(())
        }
        async fn receive_next(&self) -> crate::transport::TransportResult<InboundMessage> {
            std::future::pending().await
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn is_authenticated(&self) -> bool {
            true
        }
    }

    const LOOP_DEADLINE: std::time::Duration = std::time::Duration::from_secs(1);

    #[tokio::test]
    async fn test_shutdown_before_run_stops_loop() {
        let session = ChannelSession::new(Arc::new(SilentTransport));
        session.shutdown();

        let result = tokio::time::timeout(LOOP_DEADLINE, session.run(&ResponderRegistry::new()))
            .await
            .expect("receive loop ignored an earlier shutdown");
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_receive() {
        let session = Arc::new(ChannelSession::new(Arc::new(SilentTransport)));
        let looping = session.clone();
        let handle = tokio::spawn(async move { looping.run(&ResponderRegistry::new()).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        session.shutdown();
        let result = tokio::time::timeout(LOOP_DEADLINE, handle)
            .await
            .expect("receive loop kept waiting after shutdown")
            .unwrap();
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_connect_clears_previous_shutdown() {
        let session = Arc::new(ChannelSession::new(Arc::new(SilentTransport)));
        session.shutdown();
        session
            .configure(Endpoint::new("localhost", 5222))
            .await
            .unwrap();
        session.connect().await.unwrap();

        let looping = session.clone();
        let handle = tokio::spawn(async move { looping.run(&ResponderRegistry::new()).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        session.shutdown();
        let result = tokio::time::timeout(LOOP_DEADLINE, handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Ok(()));
    }
}
