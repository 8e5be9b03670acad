//! Overlay nodes.
//!
//! A [`Node`] owns the set of live peer connections keyed by peer identity,
//! the dial attempts in flight per rendezvous URL, and runs the
//! discovery/dispatch protocol over authenticated messages. A node does not
//! start connecting until [`Node::bootstrap`] is called.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::connection::PeerConnection;
use crate::envelope::SignedEnvelope;
use crate::error::OverlayError;
use crate::identity::{Identity, PublicKey};
use crate::message::Message;
use crate::registry::ConnectionRegistry;
use crate::transport::TransportBackend;

/// Configuration for a [`Node`].
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Rendezvous URLs dialed by [`Node::bootstrap`], in order.
    pub rendezvous_urls: Vec<String>,
    /// Enables per-frame diagnostics on every component.
    pub verbose: bool,
}

impl NodeConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rendezvous URLs.
    #[must_use]
    pub fn with_rendezvous_urls(mut self, urls: Vec<String>) -> Self {
        self.rendezvous_urls = urls;
        self
    }

    /// Enables verbose diagnostics.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Counters describing a node's activity.
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    /// Times [`Node::bootstrap`] ran (including automatic re-bootstraps).
    pub bootstraps: u64,
    /// Authenticated messages dispatched.
    pub messages_received: u64,
    /// Frames dropped from superseded connections.
    pub messages_dropped: u64,
    /// Connections indexed into the peer table.
    pub peers_added: u64,
    /// Connections removed from the peer table.
    pub peers_removed: u64,
}

impl NodeStats {
    const fn record_bootstrap(&mut self) {
        self.bootstraps += 1;
    }

    const fn record_message_received(&mut self) {
        self.messages_received += 1;
    }

    const fn record_message_dropped(&mut self) {
        self.messages_dropped += 1;
    }

    const fn record_peer_added(&mut self) {
        self.peers_added += 1;
    }

    const fn record_peer_removed(&mut self) {
        self.peers_removed += 1;
    }
}

type NextMessageCallback = Box<dyn FnOnce(&SignedEnvelope) + Send>;
type EveryMessageCallback = Arc<dyn Fn(&SignedEnvelope) + Send + Sync>;

struct NodeState {
    registry: ConnectionRegistry,
    next_callbacks: Vec<NextMessageCallback>,
    every_callbacks: Vec<EveryMessageCallback>,
    destroyed: bool,
    stats: NodeStats,
}

/// A member of the overlay network.
pub struct Node {
    identity: Identity,
    config: NodeConfig,
    backend: Arc<dyn TransportBackend>,
    state: Mutex<NodeState>,
    weak_self: Weak<Node>,
}

impl Node {
    /// Creates a node with a freshly generated identity.
    #[must_use]
    pub fn new(config: NodeConfig, backend: Arc<dyn TransportBackend>) -> Arc<Self> {
        Self::with_identity(Identity::generate(), config, backend)
    }

    /// Creates a node with the given identity.
    #[must_use]
    pub fn with_identity(
        identity: Identity,
        config: NodeConfig,
        backend: Arc<dyn TransportBackend>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            identity,
            state: Mutex::new(NodeState {
                registry: ConnectionRegistry::new(&config.rendezvous_urls),
                next_callbacks: Vec::new(),
                every_callbacks: Vec::new(),
                destroyed: false,
                stats: NodeStats::default(),
            }),
            config,
            backend,
            weak_self: weak.clone(),
        })
    }

    /// This node's address on the network.
    #[must_use]
    pub const fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    /// The node's configuration.
    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Activity counters snapshot.
    #[must_use]
    pub fn stats(&self) -> NodeStats {
        self.state.lock().stats.clone()
    }

    /// Number of peers whose identity is known and indexed.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.state.lock().registry.peer_count()
    }

    /// Identities of all indexed peers.
    #[must_use]
    pub fn peer_keys(&self) -> Vec<PublicKey> {
        self.state.lock().registry.peer_keys()
    }

    /// The live connection for `key`, if one is indexed. Collaborators use
    /// this to reach a peer's raw data channel.
    #[must_use]
    pub fn peer_connection(&self, key: PublicKey) -> Option<Arc<PeerConnection>> {
        self.state.lock().registry.peer(key).cloned()
    }

    /// Returns true if the node has been destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Dials every configured rendezvous URL whose pending slot is empty.
    ///
    /// Safe to call repeatedly: URLs already in flight or already indexed
    /// are skipped. This is also the retry mechanism; nothing else redials.
    pub fn bootstrap(&self) {
        let urls = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.stats.record_bootstrap();
            state.registry.retryable_urls()
        };
        for url in urls {
            if let Err(e) = self.connect_to_server(&url) {
                warn!(%url, error = %e, "bootstrap dial failed");
            }
        }
    }

    /// Starts a connection attempt through the rendezvous at `url`.
    /// Returns immediately; the connection is added once it completes.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Configuration`] if `url` was not part of the
    /// original configuration. A dial already in flight is a no-op.
    pub fn connect_to_server(&self, url: &str) -> Result<(), OverlayError> {
        let conn = {
            let mut state = self.state.lock();
            if state.destroyed {
                return Ok(());
            }
            if !state.registry.is_configured(url) {
                return Err(OverlayError::Configuration(format!(
                    "cannot connect to unconfigured url: {url}"
                )));
            }
            if state.registry.is_dialing(url) {
                return Ok(());
            }
            let conn = PeerConnection::connect_to_server(
                self.identity.clone(),
                url,
                self.config.verbose,
                self.backend.as_ref(),
            );
            state.registry.begin_dial(url, Arc::clone(&conn))?;
            conn
        };

        let node = self.weak_self.clone();
        let pending = Arc::clone(&conn);
        conn.on_connect(move || {
            if let Some(node) = node.upgrade() {
                if let Err(e) = node.add_peer(pending) {
                    warn!(error = %e, "failed to add connected peer");
                }
            }
        });
        Ok(())
    }

    /// Takes ownership of a connected peer connection.
    ///
    /// No-op (the connection is torn down) if the node is destroyed. Clears
    /// the connection's rendezvous pending slot. A connection whose identity
    /// is already indexed, including the self-connection case, is destroyed;
    /// one with an unknown identity is probed so the peer reveals itself
    /// through its reply's signer.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Invariant`] if the connection is not
    /// transport-connected or its pending slot does not hold it.
    pub fn add_peer(&self, conn: Arc<PeerConnection>) -> Result<(), OverlayError> {
        let mut discard = false;
        {
            let mut state = self.state.lock();
            if state.destroyed {
                discard = true;
            } else {
                if !conn.is_connected() {
                    return Err(OverlayError::Invariant(
                        "only connected peers can be added to a node".into(),
                    ));
                }
                if let Some(url) = conn.url() {
                    state.registry.clear_dial(url, &conn)?;
                }
                if let Some(key) = conn.peer_public_key() {
                    if key == self.public_key() {
                        debug!("connected to ourselves, hanging up");
                        discard = true;
                    } else if state.registry.index(key, Arc::clone(&conn)) {
                        state.stats.record_peer_added();
                    } else {
                        debug!(peer = %key, "duplicate connection, hanging up");
                        discard = true;
                    }
                }
            }
        }
        if discard {
            conn.destroy();
            return Ok(());
        }

        self.register_handlers(&conn);
        if conn.peer_public_key().is_none() {
            // Prompt the peer to reveal its identity via the reply's signer.
            conn.ping();
        }
        Ok(())
    }

    fn register_handlers(&self, conn: &Arc<PeerConnection>) {
        let node = self.weak_self.clone();
        let peer = Arc::clone(conn);
        conn.on_close(move || {
            if let Some(node) = node.upgrade() {
                node.handle_close(&peer);
            }
        });

        let node = self.weak_self.clone();
        let peer = Arc::clone(conn);
        conn.on_signed_message(move |envelope| {
            if let Some(node) = node.upgrade() {
                node.handle_signed_message(&peer, envelope);
            }
        });
    }

    fn handle_close(&self, conn: &Arc<PeerConnection>) {
        let rebootstrap = {
            let mut state = self.state.lock();
            let already_empty = state.registry.is_empty();
            if let Some(key) = conn.peer_public_key() {
                if state.registry.remove_if_current(key, conn) {
                    state.stats.record_peer_removed();
                }
            }
            !already_empty && state.registry.is_empty() && !state.destroyed
        };
        if rebootstrap {
            info!("lost connection to every peer, re-bootstrapping");
            self.bootstrap();
        }
    }

    fn handle_signed_message(&self, conn: &Arc<PeerConnection>, envelope: &SignedEnvelope) {
        let mut discard = false;
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            match conn.peer_public_key() {
                Some(key) => {
                    let current = state
                        .registry
                        .peer(key)
                        .is_some_and(|c| Arc::ptr_eq(c, conn));
                    if !current {
                        // A message from a connection we previously removed.
                        state.stats.record_message_dropped();
                        return;
                    }
                }
                None => {
                    // We have just learned the identity of this peer.
                    let signer = envelope.signer();
                    if signer == self.public_key() {
                        debug!("connected to ourselves, hanging up");
                        discard = true;
                    } else {
                        conn.set_peer_public_key(signer);
                        if state.registry.index(signer, Arc::clone(conn)) {
                            state.stats.record_peer_added();
                        } else {
                            debug!(peer = %signer, "duplicate connection, hanging up");
                            discard = true;
                        }
                    }
                }
            }
            if !discard {
                state.stats.record_message_received();
            }
        }
        if discard {
            conn.destroy();
            return;
        }

        match envelope.message() {
            Message::Ping => conn.send_message(Message::pong()),
            Message::Pong => {}
            Message::FindPeers { request_id } => {
                let requester = conn.peer_public_key();
                let peers: Vec<PublicKey> = self
                    .state
                    .lock()
                    .registry
                    .peer_keys()
                    .into_iter()
                    .filter(|key| Some(*key) != requester)
                    .collect();
                conn.send_message(Message::peers(*request_id, peers));
            }
            Message::Peers { peers, .. } => {
                for key in peers {
                    self.connect_to_peer(*key, conn);
                }
            }
        }

        let (next, every) = {
            let mut state = self.state.lock();
            // Swap before invoking: callbacks registered while these run see
            // the next message, not this one.
            let next = std::mem::take(&mut state.next_callbacks);
            let every = state.every_callbacks.clone();
            (next, every)
        };
        for callback in next {
            callback(envelope);
        }
        for callback in &every {
            callback(envelope);
        }
    }

    /// Records interest in reaching `key` through the already-connected
    /// `via`. The introduction handshake itself is not performed; the entry
    /// only marks the identity as pending so discovery responses do not
    /// churn.
    fn connect_to_peer(&self, key: PublicKey, via: &Arc<PeerConnection>) {
        let mut state = self.state.lock();
        if state.destroyed || key == self.public_key() {
            return;
        }
        let Some(via_key) = via.peer_public_key() else {
            return;
        };
        if state.registry.note_introduction(key, via_key) {
            debug!(peer = %key, via = %via_key, "noted peer for introduction");
        }
    }

    /// Registers a callback for the next authenticated message from any
    /// peer. Fires exactly once.
    pub fn on_next_message(&self, callback: impl FnOnce(&SignedEnvelope) + Send + 'static) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.next_callbacks.push(Box::new(callback));
    }

    /// Registers a callback for every authenticated message from the moment
    /// of registration onward.
    pub fn on_every_message(&self, callback: impl Fn(&SignedEnvelope) + Send + Sync + 'static) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.every_callbacks.push(Arc::new(callback));
    }

    /// Suspends until the next authenticated message arrives.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Destroyed`] if the node is (or becomes)
    /// destroyed before a message arrives.
    pub async fn wait_for_message(&self) -> Result<SignedEnvelope, OverlayError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return Err(OverlayError::Destroyed);
            }
            state.next_callbacks.push(Box::new(move |envelope| {
                let _ = tx.send(envelope.clone());
            }));
        }
        rx.await.map_err(|_| OverlayError::Destroyed)
    }

    /// Checks `predicate` now and after every received message, returning
    /// once it holds.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Destroyed`] if the node is destroyed while
    /// waiting.
    pub async fn wait_until(&self, predicate: impl Fn() -> bool) -> Result<(), OverlayError> {
        while !predicate() {
            self.wait_for_message().await?;
        }
        Ok(())
    }

    /// Destroys the node: tears down every held connection and releases all
    /// waiters. Subsequent [`Node::add_peer`]/[`Node::connect_to_server`]
    /// calls become no-ops. Idempotent.
    pub fn destroy(&self) {
        let connections = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.next_callbacks.clear();
            state.every_callbacks.clear();
            state.registry.drain()
        };
        for conn in connections {
            conn.destroy();
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("public_key", &self.public_key())
            .field("peer_count", &self.peer_count())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionOptions;
    use crate::transport::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn make_node(backend: &MemoryTransport) -> Arc<Node> {
        Node::new(NodeConfig::new(), Arc::new(backend.clone()))
    }

    /// A connected pair: `ours` is the side handed to the node under test,
    /// `theirs` plays the remote peer with the given identity.
    async fn connected_pair(
        backend: &MemoryTransport,
        remote_identity: Identity,
    ) -> (Arc<PeerConnection>, Arc<PeerConnection>) {
        let ours = PeerConnection::new(ConnectionOptions::initiator(), backend);
        let theirs = PeerConnection::new(
            ConnectionOptions::responder().with_identity(remote_identity),
            backend,
        );
        ours.connect(theirs.signals());
        theirs.connect(ours.signals());
        ours.wait_until_connected().await.unwrap();
        theirs.wait_until_connected().await.unwrap();
        (ours, theirs)
    }

    /// Makes the remote side answer liveness probes, as a real node would.
    fn auto_pong(conn: &Arc<PeerConnection>) {
        let responder = Arc::clone(conn);
        conn.on_signed_message(move |envelope| {
            if envelope.message() == &Message::Ping {
                responder.send_message(Message::pong());
            }
        });
    }

    async fn add_remote_peer(
        node: &Arc<Node>,
        backend: &MemoryTransport,
        remote_identity: Identity,
    ) -> (Arc<PeerConnection>, Arc<PeerConnection>) {
        let before = node.peer_count();
        let (ours, theirs) = connected_pair(backend, remote_identity).await;
        auto_pong(&theirs);
        node.add_peer(Arc::clone(&ours)).unwrap();
        node.wait_until(|| node.peer_count() > before).await.unwrap();
        (ours, theirs)
    }

    // ==================== add_peer Tests ====================

    #[tokio::test]
    async fn add_peer_rejects_unconnected_connection() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        let conn = PeerConnection::new(ConnectionOptions::initiator(), &backend);

        assert!(matches!(
            node.add_peer(conn),
            Err(OverlayError::Invariant(_))
        ));
    }

    #[tokio::test]
    async fn peer_identity_learned_from_first_reply() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        let remote = Identity::generate();

        let (ours, _theirs) = add_remote_peer(&node, &backend, remote.clone()).await;

        assert_eq!(node.peer_count(), 1);
        assert_eq!(node.peer_keys(), vec![remote.public_key()]);
        assert_eq!(ours.peer_public_key(), Some(remote.public_key()));
        assert_eq!(node.stats().peers_added, 1);
    }

    #[tokio::test]
    async fn duplicate_identity_keeps_first_connection() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        let remote = Identity::generate();

        let (first, _theirs) = add_remote_peer(&node, &backend, remote.clone()).await;

        // A second connection claiming the same identity loses the tie.
        let (second, second_remote) = connected_pair(&backend, remote).await;
        auto_pong(&second_remote);
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        second.on_close(move || {
            let _ = closed_tx.send(());
        });
        node.add_peer(Arc::clone(&second)).unwrap();

        closed_rx.recv().await.unwrap();
        assert_eq!(node.peer_count(), 1);
        assert!(second.state().is_terminal());
        assert!(first.is_connected());
    }

    #[tokio::test]
    async fn self_connection_is_destroyed() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);

        let (ours, theirs) = connected_pair(&backend, Identity::generate()).await;
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        ours.on_close(move || {
            let _ = closed_tx.send(());
        });
        node.add_peer(Arc::clone(&ours)).unwrap();

        // Reply to the probe signed with the node's own identity, as a
        // loopback connection would.
        let envelope = SignedEnvelope::sign(Message::pong(), &node.identity).unwrap();
        theirs.send_data(envelope.to_bytes().unwrap()).unwrap();

        closed_rx.recv().await.unwrap();
        assert_eq!(node.peer_count(), 0);
        assert!(ours.state().is_terminal());
    }

    #[tokio::test]
    async fn add_peer_on_destroyed_node_discards_connection() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        node.destroy();

        let (ours, _theirs) = connected_pair(&backend, Identity::generate()).await;
        node.add_peer(Arc::clone(&ours)).unwrap();
        assert!(ours.state().is_terminal());
        assert_eq!(node.peer_count(), 0);
    }

    // ==================== Dispatch Tests ====================

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        let (_ours, theirs) = add_remote_peer(&node, &backend, Identity::generate()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        theirs.on_signed_message(move |envelope| {
            let _ = tx.send(envelope.message().clone());
        });

        theirs.send_message(Message::ping());
        loop {
            let message = rx.recv().await.unwrap();
            if message == Message::Pong {
                break;
            }
        }
    }

    #[tokio::test]
    async fn find_peers_lists_everyone_but_the_requester() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        let requester = Identity::generate();
        let other = Identity::generate();

        let (_c1, remote1) = add_remote_peer(&node, &backend, requester.clone()).await;
        let (_c2, _remote2) = add_remote_peer(&node, &backend, other.clone()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        remote1.on_signed_message(move |envelope| {
            let _ = tx.send(envelope.message().clone());
        });

        let request_id = uuid::Uuid::new_v4();
        remote1.send_message(Message::FindPeers { request_id });

        loop {
            let message = rx.recv().await.unwrap();
            if let Message::Peers { request_id: rid, peers } = message {
                assert_eq!(rid, request_id);
                assert_eq!(peers, vec![other.public_key()]);
                assert!(!peers.contains(&requester.public_key()));
                assert!(!peers.contains(&node.public_key()));
                break;
            }
        }
    }

    #[tokio::test]
    async fn discovery_response_records_introductions() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        let remote = Identity::generate();
        let (_ours, theirs) = add_remote_peer(&node, &backend, remote.clone()).await;

        let unknown = Identity::generate().public_key();
        theirs.send_message(Message::peers(uuid::Uuid::new_v4(), vec![unknown]));

        node.wait_until(|| node.state.lock().registry.introduction_via(unknown).is_some())
            .await
            .unwrap();
        assert_eq!(
            node.state.lock().registry.introduction_via(unknown),
            Some(remote.public_key())
        );
    }

    // ==================== Callback Round Tests ====================

    #[tokio::test]
    async fn next_message_callback_fires_exactly_once() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        let (_ours, theirs) = add_remote_peer(&node, &backend, Identity::generate()).await;

        // Observer synchronizes on dispatch rounds completing.
        let (round_tx, mut round_rx) = mpsc::unbounded_channel();
        node.on_every_message(move |_| {
            let _ = round_tx.send(());
        });

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        node.on_next_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        theirs.send_message(Message::pong());
        theirs.send_message(Message::pong());
        round_rx.recv().await.unwrap();
        round_rx.recv().await.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn every_message_callback_fires_per_message() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        let (_ours, theirs) = add_remote_peer(&node, &backend, Identity::generate()).await;

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let (round_tx, mut round_rx) = mpsc::unbounded_channel();
        node.on_every_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = round_tx.send(());
        });

        theirs.send_message(Message::pong());
        theirs.send_message(Message::pong());
        round_rx.recv().await.unwrap();
        round_rx.recv().await.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    // ==================== Bootstrap / Teardown Tests ====================

    #[tokio::test]
    async fn connect_to_unconfigured_url_fails() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        assert!(matches!(
            node.connect_to_server("ws://unconfigured"),
            Err(OverlayError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn losing_last_peer_triggers_one_rebootstrap() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        let (ours, theirs) = add_remote_peer(&node, &backend, Identity::generate()).await;
        assert_eq!(node.stats().bootstraps, 0);

        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        ours.on_close(move || {
            let _ = closed_tx.send(());
        });
        theirs.destroy();
        closed_rx.recv().await.unwrap();

        assert_eq!(node.peer_count(), 0);
        assert_eq!(node.stats().bootstraps, 1);
    }

    #[tokio::test]
    async fn losing_peers_on_destroyed_node_does_not_rebootstrap() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);
        let (_ours, _theirs) = add_remote_peer(&node, &backend, Identity::generate()).await;

        node.destroy();
        tokio::task::yield_now().await;

        assert_eq!(node.peer_count(), 0);
        assert_eq!(node.stats().bootstraps, 0);
        assert!(node.is_destroyed());
    }

    #[tokio::test]
    async fn destroy_wakes_message_waiters() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);

        let waiter = Arc::clone(&node);
        let handle = tokio::spawn(async move { waiter.wait_for_message().await });
        tokio::task::yield_now().await;

        node.destroy();
        assert!(matches!(
            handle.await.unwrap(),
            Err(OverlayError::Destroyed)
        ));
    }

    #[tokio::test]
    async fn wait_until_completes_when_predicate_holds() {
        let backend = MemoryTransport::new();
        let node = make_node(&backend);

        let observer = Arc::clone(&node);
        let handle = tokio::spawn(async move {
            observer.wait_until(|| observer.peer_count() == 1).await
        });

        let _pair = add_remote_peer(&node, &backend, Identity::generate()).await;
        handle.await.unwrap().unwrap();
    }
}
