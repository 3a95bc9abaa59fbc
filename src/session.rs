//! Session orchestration
//!
//! The session owns the lifetime of one chat participation: it starts
//! local media, joins the signalling channel, and runs a single
//! coordination loop that is the only writer of the connection set.
//! Signalling events, transport state changes and caller commands all
//! arrive as messages on that loop, so duplicate-presence suppression
//! and the exactly-once notification guarantees need no locking.

use crate::config::{Config, IceServer, MediaConfig, SignallingMode};
use crate::connection::{
    ConnectionError, ConnectionState, PeerConnection, TransportFactory,
};
use crate::media::{
    BindingKind, MediaBinding, MediaEngine, MediaError, MediaHandle, MediaProfile,
};
use crate::registry::SessionRegistry;
use crate::signalling::{
    ClientId, Participant, PeerRecord, SignallingChannel, SignallingError, SignallingEvent,
};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Session-level errors
#[derive(Debug)]
pub enum SessionError {
    /// Configuration rejected before any side effect
    Config(String),
    /// The signalling channel reported a failure
    Signalling(SignallingError),
    /// Media construction or lifecycle failure
    Media(MediaError),
    /// Connection-level failure surfaced to the caller
    Connection(ConnectionError),
    /// Operation shaped for the other signalling mode
    ModeMismatch(SignallingMode),
    /// The session has been left or its loop is gone
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            SessionError::Signalling(e) => write!(f, "{}", e),
            SessionError::Media(e) => write!(f, "{}", e),
            SessionError::Connection(e) => write!(f, "{}", e),
            SessionError::ModeMismatch(mode) => {
                write!(f, "Operation not available in {} signalling mode", mode.as_str())
            }
            SessionError::Closed => write!(f, "Session is closed"),
        }
    }
}

impl Error for SessionError {}

impl From<SignallingError> for SessionError {
    fn from(e: SignallingError) -> Self {
        SessionError::Signalling(e)
    }
}

impl From<MediaError> for SessionError {
    fn from(e: MediaError) -> Self {
        SessionError::Media(e)
    }
}

impl From<ConnectionError> for SessionError {
    fn from(e: ConnectionError) -> Self {
        SessionError::Connection(e)
    }
}

/// Callbacks delivered to the embedding UI. Invoked from the
/// coordination loop, one at a time, in session order.
pub trait SessionObserver: Send + Sync {
    /// A remote peer's connection reached Connected. Fired once per
    /// connection lifetime.
    fn on_peer_joined(&self, name: &str);

    /// A previously-joined peer reached a terminal state. Never fired
    /// for a peer that was not announced via `on_peer_joined`.
    fn on_peer_left(&self, name: &str);

    /// A text record arrived from a remote participant.
    fn on_received_text(&self, from: &str, body: &str);
}

enum LoopEvent {
    Signalling(SignallingEvent),
    ConnState {
        peer: ClientId,
        state: ConnectionState,
    },
    Command(Command),
}

enum Command {
    Leave {
        done: oneshot::Sender<()>,
    },
    StopLocalMedia {
        done: oneshot::Sender<Result<(), SessionError>>,
    },
    AcceptPeer {
        record: PeerRecord,
        done: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Handle to a joined session.
///
/// All mutation is forwarded to the coordination loop; the handle
/// itself is cheap to share across threads.
pub struct Session {
    tx: mpsc::UnboundedSender<LoopEvent>,
    registry: Arc<SessionRegistry>,
    channel: Arc<dyn SignallingChannel>,
    local_participant: Participant,
    local_handle: MediaHandle,
    mode: SignallingMode,
    left: AtomicBool,
}

impl Session {
    /// Start local media, join the signalling channel and spawn the
    /// coordination loop.
    ///
    /// On any failure everything already acquired is released and the
    /// caller observes no partial session.
    pub async fn join(
        config: &Config,
        channel: Arc<dyn SignallingChannel>,
        engine: Arc<dyn MediaEngine>,
        transports: Arc<dyn TransportFactory>,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Session, SessionError> {
        config
            .validate()
            .map_err(|e| SessionError::Config(e.to_string()))?;

        let profile = MediaProfile {
            audio: config.media.audio_send,
            video: config.media.video_send,
            screen_share: config.media.screen_share,
        };
        let endpoint = engine.create_local(&profile)?;
        let local = Arc::new(MediaBinding::new(
            BindingKind::Local,
            config.media.audio_send,
            config.media.video_send,
            endpoint,
        ));
        local.start().await?;

        let registry = Arc::new(SessionRegistry::new());
        registry.set_local(local.clone());
        let local_handle = local.handle();

        let local_participant =
            Participant::new(config.session.display_name.clone(), channel.local_id());

        let events = match channel
            .join(&config.session.session_id, local_participant.clone())
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                registry.clear_local();
                if let Err(stop_err) = local.stop().await {
                    debug!("local media stop during join rollback: {}", stop_err);
                }
                local.destroy();
                return Err(e.into());
            }
        };

        info!(
            "joined session {} as {} ({} mode)",
            config.session.session_id,
            local_participant.name,
            config.session.signalling_mode.as_str()
        );

        let (loop_tx, loop_rx) = mpsc::unbounded_channel();

        // Signalling events feed the loop through a forwarder task so
        // the loop sees one ordered stream of inputs.
        let sig_tx = loop_tx.clone();
        let mut events = events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if sig_tx.send(LoopEvent::Signalling(event)).is_err() {
                    break;
                }
            }
        });

        let core = SessionCore {
            mode: config.session.signalling_mode,
            media: config.media.clone(),
            ice_servers: config.ice.servers.clone(),
            max_reconnect_attempts: config.session.max_reconnect_attempts,
            registry: registry.clone(),
            engine,
            transports,
            channel: channel.clone(),
            observer,
            loop_tx: loop_tx.downgrade(),
            connections: HashMap::new(),
            reconnects: HashMap::new(),
            left: false,
        };
        tokio::spawn(core.run(loop_rx));

        Ok(Session {
            tx: loop_tx,
            registry,
            channel,
            local_participant,
            local_handle,
            mode: config.session.signalling_mode,
            left: AtomicBool::new(false),
        })
    }

    pub fn local_participant(&self) -> &Participant {
        &self.local_participant
    }

    /// Handle of the local media binding, for UI-routed mute/record.
    pub fn local_handle(&self) -> MediaHandle {
        self.local_handle
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn mode(&self) -> SignallingMode {
        self.mode
    }

    /// Publish a text record to all current participants.
    pub fn send_text(&self, body: &str) -> Result<(), SignallingError> {
        if self.left.load(Ordering::SeqCst) {
            return Err(SignallingError::NotJoined);
        }
        self.channel.send_text(&self.local_participant, body)
    }

    /// Tear down every connection, release remote media and deregister
    /// from the signalling channel. Idempotent. Joined peers get their
    /// peer-left notification before this returns.
    pub async fn leave(&self) -> Result<(), SessionError> {
        if self.left.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(LoopEvent::Command(Command::Leave { done: done_tx }))
            .map_err(|_| SessionError::Closed)?;
        done_rx.await.map_err(|_| SessionError::Closed)?;
        Ok(())
    }

    /// Stop and destroy local media. Rejected while any connection is
    /// still alive, and after local media is already gone.
    pub async fn stop_local_media(&self) -> Result<(), SessionError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(LoopEvent::Command(Command::StopLocalMedia { done: done_tx }))
            .map_err(|_| SessionError::Closed)?;
        done_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Admit a peer from an out-of-band session record (manual
    /// signalling mode only).
    pub async fn accept_peer(&self, record: PeerRecord) -> Result<(), SessionError> {
        if self.left.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(LoopEvent::Command(Command::AcceptPeer {
                record,
                done: done_tx,
            }))
            .map_err(|_| SessionError::Closed)?;
        done_rx.await.map_err(|_| SessionError::Closed)?
    }
}

/// Loop-owned state. Nothing outside the loop task touches the
/// connection set or the reconnect counters.
struct SessionCore {
    mode: SignallingMode,
    media: MediaConfig,
    ice_servers: Vec<IceServer>,
    max_reconnect_attempts: u32,
    registry: Arc<SessionRegistry>,
    engine: Arc<dyn MediaEngine>,
    transports: Arc<dyn TransportFactory>,
    channel: Arc<dyn SignallingChannel>,
    observer: Arc<dyn SessionObserver>,
    // weak so the loop's own receiver can close once every handle is gone
    loop_tx: mpsc::WeakUnboundedSender<LoopEvent>,
    connections: HashMap<ClientId, PeerConnection>,
    reconnects: HashMap<ClientId, u32>,
    left: bool,
}

impl SessionCore {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<LoopEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                LoopEvent::Signalling(event) => self.handle_signalling(event),
                LoopEvent::ConnState { peer, state } => self.handle_conn_state(peer, state),
                LoopEvent::Command(command) => self.handle_command(command).await,
            }
        }
        debug!("coordination loop finished");
    }

    fn handle_signalling(&mut self, event: SignallingEvent) {
        if self.left {
            return;
        }
        match event {
            SignallingEvent::Presence(participant) => {
                if self.mode == SignallingMode::Manual {
                    warn!(
                        "ignoring presence of {} in manual signalling mode",
                        participant.name
                    );
                    return;
                }
                if self.connections.contains_key(&participant.client_id) {
                    debug!(
                        "duplicate presence for {} ({}), already connected",
                        participant.name, participant.client_id
                    );
                    return;
                }
                if let Err(e) = self.connect_peer(participant.clone()) {
                    error!("connection to {} not created: {}", participant.name, e);
                }
            }
            SignallingEvent::Departure(client_id) => {
                let Some(mut conn) = self.connections.remove(&client_id) else {
                    debug!("departure of unknown client {}", client_id);
                    return;
                };
                info!("{} departed", conn.participant().name);
                finalize_connection(&mut conn, &self.registry, self.observer.as_ref());
                self.reconnects.remove(&client_id);
            }
            SignallingEvent::Text { from, body } => {
                self.observer.on_received_text(&from, &body);
            }
        }
    }

    fn handle_conn_state(&mut self, peer: ClientId, state: ConnectionState) {
        let Some(conn) = self.connections.get_mut(&peer) else {
            // late event from a transport already torn down
            debug!("state {} for unknown connection {}", state, peer);
            return;
        };
        let name = conn.participant().name.clone();
        let participant = conn.participant().clone();

        let actions = match conn.apply_transition(state) {
            Ok(actions) => actions,
            Err(e) => {
                warn!("connection {}: {}", peer, e);
                return;
            }
        };
        if actions.release_media {
            conn.release_media(&self.registry);
        }

        if actions.notify_joined {
            self.reconnects.remove(&peer);
            info!("{} joined", name);
            self.observer.on_peer_joined(&name);
        }
        if actions.notify_left {
            info!("{} left", name);
            self.observer.on_peer_left(&name);
        }

        if state.is_terminal() {
            if let Some(mut conn) = self.connections.remove(&peer) {
                conn.destroy(&self.registry);
            }
            if actions.reconnect_eligible {
                self.maybe_reconnect(participant);
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Leave { done } => {
                self.teardown_all().await;
                let _ = done.send(());
            }
            Command::StopLocalMedia { done } => {
                let _ = done.send(self.stop_local_media().await);
            }
            Command::AcceptPeer { record, done } => {
                let _ = done.send(self.accept_peer(record));
            }
        }
    }

    /// Create the remote binding, the transport, and the connection
    /// for one remote participant. The binding is registered before
    /// anything observer-facing can happen.
    fn connect_peer(&mut self, participant: Participant) -> Result<(), SessionError> {
        let endpoint = self.engine.create_remote(&participant)?;
        let remote = Arc::new(MediaBinding::new(
            BindingKind::Remote,
            self.media.audio_receive,
            self.media.video_receive,
            endpoint,
        ));
        self.registry.register(remote.clone());

        let (state_tx, mut state_rx) = mpsc::unbounded_channel();
        let transport = self
            .transports
            .create(&participant, &self.ice_servers, state_tx);
        let conn = PeerConnection::connect(
            participant.clone(),
            transport,
            self.registry.local(),
            remote,
            &self.media,
        );

        // Transport state changes are folded into the loop's event
        // stream, preserving per-peer ordering.
        let loop_tx = self.loop_tx.clone();
        let peer = participant.client_id.clone();
        tokio::spawn(async move {
            while let Some(state) = state_rx.recv().await {
                let Some(tx) = loop_tx.upgrade() else {
                    break;
                };
                if tx
                    .send(LoopEvent::ConnState {
                        peer: peer.clone(),
                        state,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        info!(
            "connection created for {} ({})",
            participant.name, participant.client_id
        );
        self.connections.insert(participant.client_id, conn);
        Ok(())
    }

    fn maybe_reconnect(&mut self, participant: Participant) {
        if self.left {
            return;
        }
        if self.mode != SignallingMode::Automatic {
            debug!("manual mode: failure of {} is terminal", participant.name);
            return;
        }
        let attempts = self
            .reconnects
            .entry(participant.client_id.clone())
            .or_insert(0);
        if *attempts >= self.max_reconnect_attempts {
            warn!(
                "reconnect budget for {} exhausted after {} attempts",
                participant.name, attempts
            );
            return;
        }
        *attempts += 1;
        info!(
            "reconnecting to {} (attempt {}/{})",
            participant.name, attempts, self.max_reconnect_attempts
        );
        let attempts = *attempts;
        if let Err(e) = self.connect_peer(participant.clone()) {
            error!(
                "reconnect {} to {} failed: {}",
                attempts, participant.name, e
            );
        }
    }

    fn accept_peer(&mut self, record: PeerRecord) -> Result<(), SessionError> {
        if self.left {
            return Err(SessionError::Closed);
        }
        if self.mode != SignallingMode::Manual {
            return Err(SessionError::ModeMismatch(self.mode));
        }
        let participant = record.participant.clone();
        if self.connections.contains_key(&participant.client_id) {
            debug!(
                "duplicate session record for {} ({}), already connected",
                participant.name, participant.client_id
            );
            return Ok(());
        }
        self.connect_peer(participant.clone())?;

        let apply = self
            .connections
            .get(&participant.client_id)
            .map(|conn| conn.apply_session_record(&record.payload));
        if let Some(Err(e)) = apply {
            // record was unusable: back the connection out again
            if let Some(mut conn) = self.connections.remove(&participant.client_id) {
                conn.destroy(&self.registry);
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn teardown_all(&mut self) {
        if self.left {
            return;
        }
        self.left = true;

        let peers: Vec<ClientId> = self.connections.keys().cloned().collect();
        for peer in peers {
            if let Some(mut conn) = self.connections.remove(&peer) {
                finalize_connection(&mut conn, &self.registry, self.observer.as_ref());
            }
        }
        self.reconnects.clear();

        if let Err(e) = self.channel.leave().await {
            warn!("signalling leave: {}", e);
        }
        info!("session left");
    }

    async fn stop_local_media(&mut self) -> Result<(), SessionError> {
        if !self.connections.is_empty() {
            return Err(MediaError::InvalidState(format!(
                "{} connection(s) still active",
                self.connections.len()
            ))
            .into());
        }
        let Some(local) = self.registry.clear_local() else {
            return Err(
                MediaError::InvalidState("local media has already been stopped".to_string())
                    .into(),
            );
        };
        local.stop().await?;
        local.destroy();
        info!("local media stopped");
        Ok(())
    }
}

/// Walk a connection to its terminal state locally, releasing media
/// and owing at most one peer-left. Used for departures and session
/// leave, where the transport is not going to report the transitions
/// itself.
fn finalize_connection(
    conn: &mut PeerConnection,
    registry: &SessionRegistry,
    observer: &dyn SessionObserver,
) {
    let name = conn.participant().name.clone();
    conn.destroy(registry);

    let path: &[ConnectionState] = match conn.state() {
        ConnectionState::Failing => &[ConnectionState::Failed],
        _ => &[ConnectionState::Closing, ConnectionState::Closed],
    };
    for next in path {
        if !conn.state().can_transition(*next) {
            continue;
        }
        if let Ok(actions) = conn.apply_transition(*next) {
            if actions.notify_left {
                observer.on_peer_left(&name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{PeerTransport, StreamKind};
    use crate::media::NullMediaEngine;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Observed {
        Joined(String),
        Left(String),
        Text(String, String),
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<Observed>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<Observed> {
            self.events.lock().clone()
        }

        fn count(&self, wanted: &Observed) -> usize {
            self.events.lock().iter().filter(|e| *e == wanted).count()
        }
    }

    impl SessionObserver for RecordingObserver {
        fn on_peer_joined(&self, name: &str) {
            self.events.lock().push(Observed::Joined(name.to_string()));
        }

        fn on_peer_left(&self, name: &str) {
            self.events.lock().push(Observed::Left(name.to_string()));
        }

        fn on_received_text(&self, from: &str, body: &str) {
            self.events
                .lock()
                .push(Observed::Text(from.to_string(), body.to_string()));
        }
    }

    struct FakeChannel {
        id: ClientId,
        rx: Mutex<Option<mpsc::UnboundedReceiver<SignallingEvent>>>,
        sent: Mutex<Vec<String>>,
        left: AtomicBool,
        fail_join: bool,
    }

    impl FakeChannel {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<SignallingEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let channel = Arc::new(Self {
                id: ClientId::from("local-1"),
                rx: Mutex::new(Some(rx)),
                sent: Mutex::new(Vec::new()),
                left: AtomicBool::new(false),
                fail_join: false,
            });
            (channel, tx)
        }

        fn unreachable() -> Arc<Self> {
            Arc::new(Self {
                id: ClientId::from("local-1"),
                rx: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                left: AtomicBool::new(false),
                fail_join: true,
            })
        }
    }

    impl SignallingChannel for FakeChannel {
        fn local_id(&self) -> ClientId {
            self.id.clone()
        }

        fn join(
            &self,
            _session_id: &str,
            _local: Participant,
        ) -> BoxFuture<'static, Result<mpsc::UnboundedReceiver<SignallingEvent>, SignallingError>>
        {
            let rx = self.rx.lock().take();
            let fail = self.fail_join;
            Box::pin(async move {
                if fail {
                    return Err(SignallingError::Unreachable("fake outage".to_string()));
                }
                rx.ok_or_else(|| SignallingError::Rejected("already joined".to_string()))
            })
        }

        fn leave(&self) -> BoxFuture<'static, Result<(), SignallingError>> {
            self.left.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn send_text(&self, _from: &Participant, body: &str) -> Result<(), SignallingError> {
            self.sent.lock().push(body.to_string());
            Ok(())
        }
    }

    struct ScriptedTransport {
        closes: Arc<AtomicU32>,
    }

    impl PeerTransport for ScriptedTransport {
        fn attach_stream(
            &self,
            _kind: StreamKind,
            _send: Option<MediaHandle>,
            _receive: Option<MediaHandle>,
        ) {
        }

        fn apply_session_record(&self, record: &serde_json::Value) -> Result<(), ConnectionError> {
            if record.is_object() {
                Ok(())
            } else {
                Err(ConnectionError::InvalidRecord("not an object".to_string()))
            }
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Factory whose created transports the test drives by hand. With
    /// `auto_connect` it scripts Connecting -> Connected up front.
    struct ScriptedTransportFactory {
        auto_connect: bool,
        created: Mutex<Vec<mpsc::UnboundedSender<ConnectionState>>>,
        closes: Arc<AtomicU32>,
    }

    impl ScriptedTransportFactory {
        fn new(auto_connect: bool) -> Arc<Self> {
            Arc::new(Self {
                auto_connect,
                created: Mutex::new(Vec::new()),
                closes: Arc::new(AtomicU32::new(0)),
            })
        }

        fn created_count(&self) -> usize {
            self.created.lock().len()
        }

        fn send_states(&self, index: usize, states: &[ConnectionState]) {
            let created = self.created.lock();
            for state in states {
                let _ = created[index].send(*state);
            }
        }
    }

    impl TransportFactory for ScriptedTransportFactory {
        fn create(
            &self,
            _remote: &Participant,
            _ice_servers: &[IceServer],
            state_tx: mpsc::UnboundedSender<ConnectionState>,
        ) -> Box<dyn PeerTransport> {
            if self.auto_connect {
                let _ = state_tx.send(ConnectionState::Connecting);
                let _ = state_tx.send(ConnectionState::Connected);
            } else {
                let _ = state_tx.send(ConnectionState::Connecting);
            }
            self.created.lock().push(state_tx);
            Box::new(ScriptedTransport {
                closes: self.closes.clone(),
            })
        }
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    fn test_config(mode: SignallingMode) -> Config {
        let mut config = Config::default();
        config.session.session_id = "S1".to_string();
        config.session.display_name = "Alice".to_string();
        config.session.signalling_mode = mode;
        config
    }

    fn bob() -> Participant {
        Participant::new("Bob", ClientId::from("bob-1"))
    }

    fn carol() -> Participant {
        Participant::new("Carol", ClientId::from("carol-1"))
    }

    async fn join_session(
        config: Config,
        factory: Arc<ScriptedTransportFactory>,
    ) -> (
        Session,
        Arc<FakeChannel>,
        mpsc::UnboundedSender<SignallingEvent>,
        Arc<RecordingObserver>,
    ) {
        let (channel, events_tx) = FakeChannel::new();
        let observer = Arc::new(RecordingObserver::default());
        let session = Session::join(
            &config,
            channel.clone(),
            Arc::new(NullMediaEngine::new()),
            factory,
            observer.clone(),
        )
        .await
        .unwrap();
        (session, channel, events_tx, observer)
    }

    #[tokio::test]
    async fn test_presence_creates_connection_and_joined_fires_once() {
        let factory = ScriptedTransportFactory::new(true);
        let (session, _channel, events_tx, observer) =
            join_session(test_config(SignallingMode::Automatic), factory.clone()).await;

        events_tx
            .send(SignallingEvent::Presence(bob()))
            .unwrap();
        wait_until("Bob joined", || {
            observer.count(&Observed::Joined("Bob".to_string())) == 1
        })
        .await;

        assert_eq!(factory.created_count(), 1);
        assert_eq!(session.registry().remote_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_presence_is_suppressed() {
        let factory = ScriptedTransportFactory::new(true);
        let (session, _channel, events_tx, observer) =
            join_session(test_config(SignallingMode::Automatic), factory.clone()).await;

        events_tx.send(SignallingEvent::Presence(bob())).unwrap();
        events_tx.send(SignallingEvent::Presence(bob())).unwrap();
        wait_until("Bob joined", || {
            observer.count(&Observed::Joined("Bob".to_string())) >= 1
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(factory.created_count(), 1);
        assert_eq!(observer.count(&Observed::Joined("Bob".to_string())), 1);
        assert_eq!(session.registry().remote_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_notifies_left_once_and_reconnects_once() {
        let factory = ScriptedTransportFactory::new(true);
        let (session, _channel, events_tx, observer) =
            join_session(test_config(SignallingMode::Automatic), factory.clone()).await;

        events_tx.send(SignallingEvent::Presence(bob())).unwrap();
        wait_until("Bob joined", || {
            observer.count(&Observed::Joined("Bob".to_string())) == 1
        })
        .await;

        factory.send_states(0, &[ConnectionState::Failing, ConnectionState::Failed]);
        wait_until("Bob left", || {
            observer.count(&Observed::Left("Bob".to_string())) == 1
        })
        .await;
        // one replacement connection, which connects again
        wait_until("reconnect", || factory.created_count() == 2).await;
        wait_until("Bob rejoined", || {
            observer.count(&Observed::Joined("Bob".to_string())) == 2
        })
        .await;

        assert_eq!(observer.count(&Observed::Left("Bob".to_string())), 1);
        assert_eq!(session.registry().remote_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_budget_is_bounded() {
        let factory = ScriptedTransportFactory::new(false);
        let mut config = test_config(SignallingMode::Automatic);
        config.session.max_reconnect_attempts = 2;
        let (_session, _channel, events_tx, _observer) =
            join_session(config, factory.clone()).await;

        events_tx.send(SignallingEvent::Presence(bob())).unwrap();
        wait_until("first transport", || factory.created_count() == 1).await;

        for attempt in 0..2 {
            factory.send_states(attempt, &[ConnectionState::Failing, ConnectionState::Failed]);
            wait_until("reconnect transport", || {
                factory.created_count() == attempt + 2
            })
            .await;
        }

        // budget spent: the third failure creates nothing new
        factory.send_states(2, &[ConnectionState::Failing, ConnectionState::Failed]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(factory.created_count(), 3);
    }

    #[tokio::test]
    async fn test_connected_resets_reconnect_budget() {
        let factory = ScriptedTransportFactory::new(true);
        let mut config = test_config(SignallingMode::Automatic);
        config.session.max_reconnect_attempts = 1;
        let (_session, _channel, events_tx, observer) =
            join_session(config, factory.clone()).await;

        events_tx.send(SignallingEvent::Presence(bob())).unwrap();
        wait_until("Bob joined", || {
            observer.count(&Observed::Joined("Bob".to_string())) == 1
        })
        .await;

        // each failure lands after a Connected, so the budget never runs out
        for round in 0..3 {
            factory.send_states(round, &[ConnectionState::Failing, ConnectionState::Failed]);
            wait_until("replacement transport", || {
                factory.created_count() == round + 2
            })
            .await;
            wait_until("rejoined", || {
                observer.count(&Observed::Joined("Bob".to_string())) == round + 2
            })
            .await;
        }
    }

    #[tokio::test]
    async fn test_leave_during_connecting_emits_no_notifications() {
        let factory = ScriptedTransportFactory::new(false);
        let (session, channel, events_tx, observer) =
            join_session(test_config(SignallingMode::Automatic), factory.clone()).await;

        events_tx.send(SignallingEvent::Presence(carol())).unwrap();
        wait_until("Carol transport", || factory.created_count() == 1).await;
        wait_until("Carol media registered", || {
            session.registry().remote_count() == 1
        })
        .await;

        session.leave().await.unwrap();

        assert!(observer.events().is_empty());
        assert_eq!(session.registry().remote_count(), 0);
        assert!(channel.left.load(Ordering::SeqCst));
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_leave_notifies_left_for_joined_peers() {
        let factory = ScriptedTransportFactory::new(true);
        let (session, _channel, events_tx, observer) =
            join_session(test_config(SignallingMode::Automatic), factory.clone()).await;

        events_tx.send(SignallingEvent::Presence(bob())).unwrap();
        wait_until("Bob joined", || {
            observer.count(&Observed::Joined("Bob".to_string())) == 1
        })
        .await;

        session.leave().await.unwrap();
        session.leave().await.unwrap(); // idempotent

        assert_eq!(observer.count(&Observed::Left("Bob".to_string())), 1);
        assert_eq!(session.registry().remote_count(), 0);
    }

    #[tokio::test]
    async fn test_departure_tears_down_peer() {
        let factory = ScriptedTransportFactory::new(true);
        let (session, _channel, events_tx, observer) =
            join_session(test_config(SignallingMode::Automatic), factory.clone()).await;

        events_tx.send(SignallingEvent::Presence(bob())).unwrap();
        wait_until("Bob joined", || {
            observer.count(&Observed::Joined("Bob".to_string())) == 1
        })
        .await;

        events_tx
            .send(SignallingEvent::Departure(ClientId::from("bob-1")))
            .unwrap();
        wait_until("Bob left", || {
            observer.count(&Observed::Left("Bob".to_string())) == 1
        })
        .await;

        assert_eq!(session.registry().remote_count(), 0);
        // departure is terminal, never a reconnect trigger
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(factory.created_count(), 1);
    }

    #[tokio::test]
    async fn test_text_forwarded_to_observer() {
        let factory = ScriptedTransportFactory::new(true);
        let (_session, _channel, events_tx, observer) =
            join_session(test_config(SignallingMode::Automatic), factory).await;

        events_tx
            .send(SignallingEvent::Text {
                from: "Bob".to_string(),
                body: "hello".to_string(),
            })
            .unwrap();
        wait_until("text", || {
            observer.count(&Observed::Text("Bob".to_string(), "hello".to_string())) == 1
        })
        .await;
    }

    #[tokio::test]
    async fn test_send_text_after_leave_fails() {
        let factory = ScriptedTransportFactory::new(true);
        let (session, channel, _events_tx, _observer) =
            join_session(test_config(SignallingMode::Automatic), factory).await;

        session.send_text("hi").unwrap();
        assert_eq!(channel.sent.lock().as_slice(), ["hi"]);

        session.leave().await.unwrap();
        match session.send_text("too late") {
            Err(SignallingError::NotJoined) => {}
            other => panic!("Expected NotJoined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_manual_mode_ignores_presence() {
        let factory = ScriptedTransportFactory::new(true);
        let (_session, _channel, events_tx, observer) =
            join_session(test_config(SignallingMode::Manual), factory.clone()).await;

        events_tx.send(SignallingEvent::Presence(bob())).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(factory.created_count(), 0);
        assert!(observer.events().is_empty());
    }

    #[tokio::test]
    async fn test_manual_mode_accepts_record_without_reconnect() {
        let factory = ScriptedTransportFactory::new(true);
        let (session, _channel, _events_tx, observer) =
            join_session(test_config(SignallingMode::Manual), factory.clone()).await;

        let record = PeerRecord {
            participant: bob(),
            payload: serde_json::json!({ "offer": "v=0..." }),
        };
        session.accept_peer(record).await.unwrap();
        wait_until("Bob joined", || {
            observer.count(&Observed::Joined("Bob".to_string())) == 1
        })
        .await;

        factory.send_states(0, &[ConnectionState::Failing, ConnectionState::Failed]);
        wait_until("Bob left", || {
            observer.count(&Observed::Left("Bob".to_string())) == 1
        })
        .await;

        // failure is terminal in manual mode
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(factory.created_count(), 1);
    }

    #[tokio::test]
    async fn test_automatic_mode_rejects_manual_record() {
        let factory = ScriptedTransportFactory::new(true);
        let (session, _channel, _events_tx, _observer) =
            join_session(test_config(SignallingMode::Automatic), factory).await;

        let record = PeerRecord {
            participant: bob(),
            payload: serde_json::json!({}),
        };
        match session.accept_peer(record).await {
            Err(SessionError::ModeMismatch(SignallingMode::Automatic)) => {}
            other => panic!("Expected ModeMismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_manual_record_backs_connection_out() {
        let factory = ScriptedTransportFactory::new(false);
        let (session, _channel, _events_tx, _observer) =
            join_session(test_config(SignallingMode::Manual), factory.clone()).await;

        let record = PeerRecord {
            participant: bob(),
            payload: serde_json::json!("not an object"),
        };
        match session.accept_peer(record).await {
            Err(SessionError::Connection(ConnectionError::InvalidRecord(_))) => {}
            other => panic!("Expected InvalidRecord, got {:?}", other),
        }
        assert_eq!(session.registry().remote_count(), 0);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_local_media_guarded_by_connections() {
        let factory = ScriptedTransportFactory::new(true);
        let (session, _channel, events_tx, observer) =
            join_session(test_config(SignallingMode::Automatic), factory).await;

        events_tx.send(SignallingEvent::Presence(bob())).unwrap();
        wait_until("Bob joined", || {
            observer.count(&Observed::Joined("Bob".to_string())) == 1
        })
        .await;

        match session.stop_local_media().await {
            Err(SessionError::Media(MediaError::InvalidState(_))) => {}
            other => panic!("Expected InvalidState, got {:?}", other),
        }

        session.leave().await.unwrap();
        session.stop_local_media().await.unwrap();

        // stopping twice is an error
        match session.stop_local_media().await {
            Err(SessionError::Media(MediaError::InvalidState(_))) => {}
            other => panic!("Expected InvalidState, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_failure_leaves_no_session() {
        let channel = FakeChannel::unreachable();
        let observer = Arc::new(RecordingObserver::default());
        let result = Session::join(
            &test_config(SignallingMode::Automatic),
            channel,
            Arc::new(NullMediaEngine::new()),
            ScriptedTransportFactory::new(true),
            observer.clone(),
        )
        .await;

        match result {
            Err(SessionError::Signalling(SignallingError::Unreachable(_))) => {}
            other => panic!("Expected Unreachable, got {:?}", other.err()),
        }
        assert!(observer.events().is_empty());
    }

    #[tokio::test]
    async fn test_two_sessions_over_local_hub() {
        use crate::connection::LoopbackTransportFactory;
        use crate::signalling::LocalSignallingHub;

        let hub = LocalSignallingHub::new();
        let alice_observer = Arc::new(RecordingObserver::default());
        let bob_observer = Arc::new(RecordingObserver::default());

        let mut alice_config = test_config(SignallingMode::Automatic);
        alice_config.session.display_name = "Alice".to_string();
        let mut bob_config = test_config(SignallingMode::Automatic);
        bob_config.session.display_name = "Bob".to_string();

        let alice = Session::join(
            &alice_config,
            Arc::new(hub.channel()),
            Arc::new(NullMediaEngine::new()),
            Arc::new(LoopbackTransportFactory::new()),
            alice_observer.clone(),
        )
        .await
        .unwrap();
        let bob = Session::join(
            &bob_config,
            Arc::new(hub.channel()),
            Arc::new(NullMediaEngine::new()),
            Arc::new(LoopbackTransportFactory::new()),
            bob_observer.clone(),
        )
        .await
        .unwrap();

        wait_until("mutual join", || {
            alice_observer.count(&Observed::Joined("Bob".to_string())) == 1
                && bob_observer.count(&Observed::Joined("Alice".to_string())) == 1
        })
        .await;

        alice.send_text("hello bob").unwrap();
        wait_until("text delivered", || {
            bob_observer.count(&Observed::Text(
                "Alice".to_string(),
                "hello bob".to_string(),
            )) == 1
        })
        .await;

        bob.leave().await.unwrap();
        wait_until("departure seen", || {
            alice_observer.count(&Observed::Left("Bob".to_string())) == 1
        })
        .await;
        wait_until("alice registry drained", || {
            alice.registry().remote_count() == 0
        })
        .await;

        alice.leave().await.unwrap();
    }
}
