//! Peer connections.
//!
//! A [`PeerConnection`] wraps one transport endpoint together with the
//! signaling exchange needed to establish it: the outbound
//! [`SignalSequence`], the identity used to sign outbound messages, the
//! (possibly not-yet-known) peer identity, and event registrations for
//! connect/data/error/close and verified signed messages.

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::envelope::SignedEnvelope;
use crate::error::OverlayError;
use crate::identity::{Identity, PublicKey};
use crate::message::Message;
use crate::sequence::{SignalEvent, SignalPayload, SignalSequence};
use crate::transport::{TransportBackend, TransportEvent, TransportRole};

/// Transport state of a connection. Transitions are monotonic:
/// `Connecting -> Connected -> Closed`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Negotiation in progress.
    Connecting,
    /// The byte channel is established.
    Connected,
    /// Torn down. Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns true if the connection can carry data.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true if the connection has terminated.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Per-connection traffic counters.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTraffic {
    /// Signed messages sent.
    pub messages_sent: u64,
    /// Verified signed messages received.
    pub messages_received: u64,
    /// Frames dropped for failing decode, verification, or pinning.
    pub frames_dropped: u64,
    /// When the transport reached `Connected`, if it has.
    pub established_at: Option<DateTime<Utc>>,
}

impl ConnectionTraffic {
    fn record_message_sent(&mut self) {
        self.messages_sent += 1;
    }

    fn record_message_received(&mut self) {
        self.messages_received += 1;
    }

    fn record_frame_dropped(&mut self) {
        self.frames_dropped += 1;
    }

    fn record_established(&mut self) {
        self.established_at = Some(Utc::now());
    }
}

/// Options for constructing a [`PeerConnection`].
#[derive(Debug)]
pub struct ConnectionOptions {
    identity: Option<Identity>,
    peer_public_key: Option<PublicKey>,
    role: TransportRole,
    url: Option<String>,
    verbose: bool,
}

impl ConnectionOptions {
    /// Options for an initiator-role connection.
    #[must_use]
    pub const fn initiator() -> Self {
        Self {
            identity: None,
            peer_public_key: None,
            role: TransportRole::Initiator,
            url: None,
            verbose: false,
        }
    }

    /// Options for a responder-role connection.
    #[must_use]
    pub const fn responder() -> Self {
        Self {
            identity: None,
            peer_public_key: None,
            role: TransportRole::Responder,
            url: None,
            verbose: false,
        }
    }

    /// Signs outbound messages with `identity` instead of a fresh key pair.
    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Pins the expected peer identity; frames signed by anyone else are
    /// dropped.
    #[must_use]
    pub const fn with_peer_public_key(mut self, key: PublicKey) -> Self {
        self.peer_public_key = Some(key);
        self
    }

    /// Records the rendezvous URL this connection was dialed through.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Enables per-frame diagnostics.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

type ConnectCallback = Box<dyn FnOnce() + Send>;
type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(&SignedEnvelope) + Send + Sync>;
type ErrorCallback = Box<dyn FnOnce(&str) + Send>;
type CloseCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Callbacks {
    on_connect: Vec<ConnectCallback>,
    on_data: Vec<DataCallback>,
    on_message: Vec<MessageCallback>,
    on_error: Vec<ErrorCallback>,
    on_close: Vec<CloseCallback>,
}

struct ConnIo {
    data_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    signal_in: Option<mpsc::UnboundedSender<SignalPayload>>,
}

/// A connection to a single other node.
pub struct PeerConnection {
    identity: Identity,
    url: Option<String>,
    verbose: bool,
    signals: Arc<SignalSequence>,
    peer_public_key: Mutex<Option<PublicKey>>,
    state_tx: watch::Sender<ConnectionState>,
    callbacks: Mutex<Callbacks>,
    io: Mutex<ConnIo>,
    traffic: Mutex<ConnectionTraffic>,
}

impl PeerConnection {
    /// Creates a connection over a fresh endpoint from `backend` and starts
    /// driving its negotiation.
    pub fn new(options: ConnectionOptions, backend: &dyn TransportBackend) -> Arc<Self> {
        let channel = backend.open(options.role);
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        let conn = Arc::new(Self {
            identity: options.identity.unwrap_or_else(Identity::generate),
            url: options.url,
            verbose: options.verbose,
            signals: Arc::new(SignalSequence::new()),
            peer_public_key: Mutex::new(options.peer_public_key),
            state_tx,
            callbacks: Mutex::new(Callbacks::default()),
            io: Mutex::new(ConnIo {
                data_tx: Some(channel.data_tx),
                signal_in: Some(channel.signal_tx),
            }),
            traffic: Mutex::new(ConnectionTraffic::default()),
        });

        // Negotiation output -> our signal sequence.
        let signals = Arc::clone(&conn.signals);
        let mut backend_signals = channel.signals;
        tokio::spawn(async move {
            while let Some(payload) = backend_signals.recv().await {
                if signals.append(payload).is_err() {
                    break;
                }
            }
        });

        // Transport events -> state machine and callbacks.
        let driver = Arc::clone(&conn);
        let mut events = channel.events;
        let mut state_rx = conn.state_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(TransportEvent::Connected) => driver.mark_connected(),
                        Some(TransportEvent::Data(frame)) => driver.handle_frame(&frame),
                        Some(TransportEvent::Error(e)) => {
                            driver.fire_error(&e);
                            driver.teardown();
                            break;
                        }
                        Some(TransportEvent::Closed) | None => {
                            driver.teardown();
                            break;
                        }
                    },
                    changed = state_rx.changed() => {
                        if changed.is_err()
                            || state_rx.borrow_and_update().is_terminal()
                        {
                            break;
                        }
                    }
                }
            }
        });

        conn
    }

    /// Creates an initiator-role connection and dials the rendezvous URL for
    /// its signaling exchange. Returns immediately; completion is
    /// asynchronous and observable via [`Self::on_connect`] or
    /// [`Self::wait_until_connected`].
    pub fn connect_to_server(
        identity: Identity,
        url: impl Into<String>,
        verbose: bool,
        backend: &dyn TransportBackend,
    ) -> Arc<Self> {
        let url = url.into();
        let options = ConnectionOptions::initiator()
            .with_identity(identity)
            .with_url(url.clone())
            .with_verbose(verbose);
        let conn = Self::new(options, backend);

        let task_conn = Arc::clone(&conn);
        tokio::spawn(async move {
            if let Err(e) = run_signaling_client(&task_conn, &url).await {
                warn!(%url, error = %e, "signaling channel failed");
            }
        });

        conn
    }

    /// Feeds each payload of `incoming` into the transport negotiation, in
    /// order, for as long as the sequence is open.
    pub fn connect(&self, incoming: &SignalSequence) {
        let Some(signal_in) = self.io.lock().signal_in.clone() else {
            return;
        };
        let mut rx = incoming.subscribe();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    SignalEvent::Payload(payload) => {
                        if signal_in.send(payload).is_err() {
                            break;
                        }
                    }
                    SignalEvent::Finished => break,
                }
            }
        });
    }

    /// The sequence of signaling payloads this connection's negotiation
    /// produces.
    #[must_use]
    pub fn signals(&self) -> &SignalSequence {
        &self.signals
    }

    /// The rendezvous URL this connection was dialed through, if any.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// This side's public key.
    #[must_use]
    pub const fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    /// The peer's identity, once known.
    #[must_use]
    pub fn peer_public_key(&self) -> Option<PublicKey> {
        *self.peer_public_key.lock()
    }

    /// Pins the peer's identity. Frames signed by any other key are dropped
    /// from now on.
    pub fn set_peer_public_key(&self, key: PublicKey) {
        *self.peer_public_key.lock() = Some(key);
    }

    /// Current transport state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Returns true if the transport is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_usable()
    }

    /// Traffic counters snapshot.
    #[must_use]
    pub fn traffic(&self) -> ConnectionTraffic {
        self.traffic.lock().clone()
    }

    /// Registers a callback for the moment the transport connects. Fires
    /// exactly once; if already connected, fires immediately.
    pub fn on_connect(&self, callback: impl FnOnce() + Send + 'static) {
        // State is checked under the callbacks lock: the connect transition
        // drains this list under the same lock, so a registration either
        // lands in the drained list or observes the connected state.
        let mut callbacks = self.callbacks.lock();
        match self.state() {
            ConnectionState::Connecting => callbacks.on_connect.push(Box::new(callback)),
            ConnectionState::Connected => {
                drop(callbacks);
                callback();
            }
            ConnectionState::Closed => {}
        }
    }

    /// Registers a callback for every inbound data frame, before any
    /// envelope decoding. Collaborators layering non-protocol payloads on
    /// top of the overlay consume this.
    pub fn on_data(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.callbacks.lock().on_data.push(Arc::new(callback));
    }

    /// Registers a callback for every verified signed message.
    ///
    /// Frames that fail to decode or verify, and frames whose signer
    /// mismatches a pinned peer identity, are logged and dropped without
    /// invoking the callback.
    pub fn on_signed_message(&self, callback: impl Fn(&SignedEnvelope) + Send + Sync + 'static) {
        self.callbacks.lock().on_message.push(Arc::new(callback));
    }

    /// Registers a callback for a transport error. Fires at most once.
    pub fn on_error(&self, callback: impl FnOnce(&str) + Send + 'static) {
        self.callbacks.lock().on_error.push(Box::new(callback));
    }

    /// Registers a callback for connection teardown. Fires at most once.
    pub fn on_close(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self.callbacks.lock();
        if self.state().is_terminal() {
            drop(callbacks);
            callback();
            return;
        }
        callbacks.on_close.push(Box::new(callback));
    }

    /// Signs `message` with this side's identity and sends it.
    ///
    /// Fails silently (logged) if the transport is not connected; callers
    /// should not send before [`Self::on_connect`].
    pub fn send_message(&self, message: Message) {
        if !self.is_connected() {
            warn!(
                kind = message.message_type(),
                "dropping message: transport not connected"
            );
            return;
        }
        let encoded = SignedEnvelope::sign(message, &self.identity)
            .and_then(|envelope| envelope.to_bytes().map_err(OverlayError::from));
        match encoded {
            Ok(bytes) => {
                if self.send_frame(bytes).is_ok() {
                    self.traffic.lock().record_message_sent();
                }
            }
            Err(e) => warn!(error = %e, "failed to encode message"),
        }
    }

    /// Sends raw bytes over the data channel, outside the signed protocol.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Transport`] if the transport is not connected.
    pub fn send_data(&self, bytes: Vec<u8>) -> Result<(), OverlayError> {
        if !self.is_connected() {
            return Err(OverlayError::Transport(
                "cannot send: transport not connected".into(),
            ));
        }
        self.send_frame(bytes)
    }

    /// Sends a liveness probe.
    pub fn ping(&self) {
        self.send_message(Message::ping());
    }

    /// Suspends until the transport connects, returning immediately if it
    /// already has.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Transport`] if the connection closes before
    /// connecting.
    pub async fn wait_until_connected(&self) -> Result<(), OverlayError> {
        let mut rx = self.state_tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => {
                    return Err(OverlayError::Transport("closed before connecting".into()));
                }
                ConnectionState::Connecting => {}
            }
            rx.changed().await.map_err(|_| OverlayError::Destroyed)?;
        }
    }

    /// Tears down the transport, finishes the signal sequence, and releases
    /// all pending event callbacks. Idempotent.
    pub fn destroy(&self) {
        self.teardown();
    }

    fn send_frame(&self, bytes: Vec<u8>) -> Result<(), OverlayError> {
        let io = self.io.lock();
        match io.data_tx.as_ref() {
            Some(tx) => tx
                .send(bytes)
                .map_err(|_| OverlayError::Transport("data channel closed".into())),
            None => Err(OverlayError::Transport("data channel closed".into())),
        }
    }

    fn mark_connected(&self) {
        let transitioned = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if !transitioned {
            return;
        }
        self.traffic.lock().record_established();
        let pending = std::mem::take(&mut self.callbacks.lock().on_connect);
        for callback in pending {
            callback();
        }
    }

    fn handle_frame(&self, frame: &[u8]) {
        let data_callbacks: Vec<DataCallback> = self.callbacks.lock().on_data.clone();
        for callback in &data_callbacks {
            callback(frame);
        }

        let envelope = match SignedEnvelope::from_bytes(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                if self.verbose {
                    debug!(error = %e, "dropping frame: not a signed envelope");
                }
                self.traffic.lock().record_frame_dropped();
                return;
            }
        };
        if let Err(e) = envelope.verify() {
            warn!(signer = %envelope.signer(), error = %e, "dropping frame: verification failed");
            self.traffic.lock().record_frame_dropped();
            return;
        }
        if let Some(expected) = self.peer_public_key() {
            if expected != envelope.signer() {
                warn!(
                    expected = %expected,
                    got = %envelope.signer(),
                    "dropping frame: signer mismatches pinned identity"
                );
                self.traffic.lock().record_frame_dropped();
                return;
            }
        }
        self.traffic.lock().record_message_received();

        let message_callbacks: Vec<MessageCallback> = self.callbacks.lock().on_message.clone();
        for callback in &message_callbacks {
            callback(&envelope);
        }
    }

    fn fire_error(&self, error: &str) {
        let pending = std::mem::take(&mut self.callbacks.lock().on_error);
        for callback in pending {
            callback(error);
        }
    }

    fn teardown(&self) {
        let transitioned = self.state_tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });
        if !transitioned {
            return;
        }
        self.signals.finish();
        {
            let mut io = self.io.lock();
            io.data_tx = None;
            io.signal_in = None;
        }
        // Releasing every registration here also breaks any reference cycle
        // a handler closure created back to this connection.
        let pending = std::mem::take(&mut *self.callbacks.lock());
        for callback in pending.on_close {
            callback();
        }
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("public_key", &self.public_key())
            .field("peer_public_key", &self.peer_public_key())
            .field("state", &self.state())
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Dials `url`, pipes the connection's outbound signals over the socket and
/// inbound frames into its negotiation, and closes the socket once the
/// transport connects.
async fn run_signaling_client(conn: &Arc<PeerConnection>, url: &str) -> Result<(), OverlayError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    let mut outbound = conn.signals.subscribe();
    let incoming = SignalSequence::new();
    conn.connect(&incoming);
    let mut state_rx = conn.state_tx.subscribe();

    loop {
        tokio::select! {
            event = outbound.recv() => match event {
                Some(SignalEvent::Payload(payload)) => match serde_json::to_string(&payload) {
                    Ok(text) => sink.send(WsMessage::Text(text)).await?,
                    Err(e) => warn!(error = %e, "failed to encode signal payload"),
                },
                Some(SignalEvent::Finished) | None => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str(&text) {
                    Ok(payload) => {
                        let _ = incoming.append(payload);
                    }
                    // Malformed frames are dropped without closing the channel.
                    Err(e) => warn!(error = %e, "signaling payload decode error"),
                },
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // Once connected the rendezvous has served its purpose.
                if *state_rx.borrow_and_update() != ConnectionState::Connecting {
                    break;
                }
            }
        }
    }

    incoming.finish();
    let _ = sink.close().await;
    Ok(())
}
