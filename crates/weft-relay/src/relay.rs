//! The signaling relay.
//!
//! A [`SignalingRelay`] listens for WebSocket signaling channels and
//! exchanges enough payloads over each to construct a responder-role
//! [`PeerConnection`]. Connected peers are handed to the single registered
//! peer handler, usually the [`SignalingRelay::connect_node`] binding that
//! routes them into a [`Node`]'s peer table. A small HTTP surface
//! (`/health`, `/status`) serves external liveness checks.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use weft_overlay::{
    ConnectionOptions, Identity, Node, PeerConnection, SignalEvent, SignalSequence,
    TransportBackend,
};

use crate::error::RelayError;

type PeerHandler = Arc<dyn Fn(Arc<PeerConnection>) + Send + Sync>;

struct RelayState {
    identity: Identity,
    backend: Arc<dyn TransportBackend>,
    verbose: bool,
    handler: Mutex<Option<PeerHandler>>,
    node: Mutex<Option<Arc<Node>>>,
}

/// Accepts inbound signaling channels and bootstraps responder-role peer
/// connections from them.
#[derive(Clone)]
pub struct SignalingRelay {
    state: Arc<RelayState>,
}

impl SignalingRelay {
    /// Creates a relay that signs as `identity` and negotiates transports
    /// through `backend`.
    #[must_use]
    pub fn new(identity: Identity, backend: Arc<dyn TransportBackend>, verbose: bool) -> Self {
        Self {
            state: Arc::new(RelayState {
                identity,
                backend,
                verbose,
                handler: Mutex::new(None),
                node: Mutex::new(None),
            }),
        }
    }

    /// Registers the handler that receives every accepted peer connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Configuration`] on a second registration.
    pub fn on_peer(
        &self,
        handler: impl Fn(Arc<PeerConnection>) + Send + Sync + 'static,
    ) -> Result<(), RelayError> {
        let mut slot = self.state.handler.lock();
        if slot.is_some() {
            return Err(RelayError::Configuration(
                "peer handler can only be registered once".into(),
            ));
        }
        *slot = Some(Arc::new(handler));
        Ok(())
    }

    /// Binds `node` to this relay: every accepted connection is added to the
    /// node's peer table once its transport completes.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Configuration`] if the node's identity differs
    /// from the relay's, if a node is already bound, or if a peer handler
    /// was already registered.
    pub fn connect_node(&self, node: Arc<Node>) -> Result<(), RelayError> {
        if node.public_key() != self.state.identity.public_key() {
            return Err(RelayError::Configuration(format!(
                "node identity {} does not match relay identity {}",
                node.public_key(),
                self.state.identity.public_key()
            )));
        }
        if self.state.node.lock().is_some() {
            return Err(RelayError::Configuration(
                "a node is already bound to this relay".into(),
            ));
        }

        let bound = Arc::clone(&node);
        self.on_peer(move |conn| {
            let node = Arc::clone(&bound);
            tokio::spawn(async move {
                if let Err(e) = conn.wait_until_connected().await {
                    debug!(error = %e, "relay connection never completed");
                    return;
                }
                if let Err(e) = node.add_peer(conn) {
                    warn!(error = %e, "failed to add relayed peer");
                }
            });
        })?;
        *self.state.node.lock() = Some(node);
        Ok(())
    }

    /// The bound node, if any.
    #[must_use]
    pub fn node(&self) -> Option<Arc<Node>> {
        self.state.node.lock().clone()
    }

    /// Builds the relay's HTTP router: `/health`, `/status`, and the
    /// `/signal` WebSocket endpoint.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/status", get(status))
            .route("/signal", get(signal_upgrade))
            .with_state(Arc::clone(&self.state))
            .layer(TraceLayer::new_for_http())
    }

    /// Binds `addr` and serves until a fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::BindFailed`] if the address cannot be bound.
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), RelayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::BindFailed(addr, e))?;
        self.serve_on(listener).await
    }

    /// Serves on an already-bound listener.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the server fails.
    pub async fn serve_on(&self, listener: TcpListener) -> Result<(), RelayError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "signaling relay listening");
        }
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

impl std::fmt::Debug for SignalingRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingRelay")
            .field("identity", &self.state.identity.public_key())
            .field("node_bound", &self.state.node.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// Handle GET /health.
async fn health() -> &'static str {
    "ok"
}

/// Handle GET /status: human-readable lines describing the bound node's
/// peer set.
async fn status(State(state): State<Arc<RelayState>>) -> String {
    let Some(node) = state.node.lock().clone() else {
        return "no node bound\n".to_string();
    };
    let keys = node.peer_keys();
    let mut lines = format!("node {}\npeers: {}\n", node.public_key(), keys.len());
    for key in keys {
        lines.push_str(&format!("{key}\n"));
    }
    lines
}

/// Handle GET /signal: upgrade to a WebSocket signaling channel.
async fn signal_upgrade(State(state): State<Arc<RelayState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_signaling(socket, state))
}

/// Drives one signaling channel: construct a responder connection, feed it
/// inbound payloads, forward its outbound payloads, and hand it to the
/// registered peer handler.
async fn handle_signaling(socket: WebSocket, state: Arc<RelayState>) {
    let conn = PeerConnection::new(
        ConnectionOptions::responder()
            .with_identity(state.identity.clone())
            .with_verbose(state.verbose),
        state.backend.as_ref(),
    );
    let incoming = SignalSequence::new();
    conn.connect(&incoming);
    let mut outbound = conn.signals().subscribe();

    match state.handler.lock().clone() {
        Some(handler) => handler(Arc::clone(&conn)),
        None => {
            warn!("inbound signaling channel but no peer handler registered, dropping");
            conn.destroy();
            return;
        }
    }

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            event = outbound.recv() => match event {
                Some(SignalEvent::Payload(payload)) => match serde_json::to_string(&payload) {
                    Ok(text) => {
                        if sink.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
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
                Some(Err(e)) => {
                    debug!(error = %e, "signaling channel read error");
                    break;
                }
            },
        }
    }
    incoming.finish();
    // A channel that ends before negotiation completed can never complete
    // it; release the half-built connection and its waiters.
    if !conn.is_connected() {
        conn.destroy();
    }
    debug!("signaling channel closed");
}
