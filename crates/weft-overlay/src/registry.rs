//! Connection bookkeeping for a node.
//!
//! A node tracks three keyed tables: live authenticated peers, dial attempts
//! in flight per rendezvous URL, and identities it wants an introduction to.
//! [`ConnectionRegistry`] owns all three behind one mutation surface so the
//! cross-table invariants hold at every site:
//!
//! - a public key appears in the peer table at most once;
//! - a URL's pending slot is cleared the instant its connection is indexed;
//! - an identity that is connected or already awaiting introduction is never
//!   recorded for introduction again.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::PeerConnection;
use crate::error::OverlayError;
use crate::identity::PublicKey;

/// The keyed connection tables of one node.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Live, authenticated connections by peer identity.
    peers: HashMap<PublicKey, Arc<PeerConnection>>,
    /// Dial state per configured rendezvous URL. `None` means retryable.
    pending_by_url: HashMap<String, Option<Arc<PeerConnection>>>,
    /// Identity we want to reach, mapped to the intermediary that knows it.
    pending_by_key: HashMap<PublicKey, PublicKey>,
}

impl ConnectionRegistry {
    /// Creates a registry with one empty (retryable) slot per configured
    /// rendezvous URL.
    #[must_use]
    pub fn new(urls: &[String]) -> Self {
        Self {
            peers: HashMap::new(),
            pending_by_url: urls.iter().map(|u| (u.clone(), None)).collect(),
            pending_by_key: HashMap::new(),
        }
    }

    /// Returns true if `url` was part of the original configuration.
    #[must_use]
    pub fn is_configured(&self, url: &str) -> bool {
        self.pending_by_url.contains_key(url)
    }

    /// Returns true if a dial for `url` is currently in flight.
    #[must_use]
    pub fn is_dialing(&self, url: &str) -> bool {
        matches!(self.pending_by_url.get(url), Some(Some(_)))
    }

    /// Returns the configured URLs whose slots are empty, i.e. retryable.
    #[must_use]
    pub fn retryable_urls(&self) -> Vec<String> {
        self.pending_by_url
            .iter()
            .filter(|(_, slot)| slot.is_none())
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Occupies `url`'s slot with an in-flight dial.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Configuration`] for an unconfigured URL and
    /// [`OverlayError::Invariant`] if a dial is already in flight (callers
    /// check [`Self::is_dialing`] first).
    pub fn begin_dial(
        &mut self,
        url: &str,
        conn: Arc<PeerConnection>,
    ) -> Result<(), OverlayError> {
        match self.pending_by_url.get_mut(url) {
            None => Err(OverlayError::Configuration(format!(
                "cannot connect to unconfigured url: {url}"
            ))),
            Some(slot @ None) => {
                *slot = Some(conn);
                Ok(())
            }
            Some(Some(_)) => Err(OverlayError::Invariant(format!(
                "dial already in flight for {url}"
            ))),
        }
    }

    /// Clears `url`'s slot, which must currently hold exactly `conn`.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Invariant`] if the slot holds anything else.
    pub fn clear_dial(&mut self, url: &str, conn: &Arc<PeerConnection>) -> Result<(), OverlayError> {
        match self.pending_by_url.get_mut(url) {
            Some(slot @ Some(_)) if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(OverlayError::Invariant(format!(
                "pending slot for {url} does not hold this connection"
            ))),
        }
    }

    /// Returns true if a live connection exists for `key`.
    #[must_use]
    pub fn contains(&self, key: PublicKey) -> bool {
        self.peers.contains_key(&key)
    }

    /// Returns the live connection for `key`, if any.
    #[must_use]
    pub fn peer(&self, key: PublicKey) -> Option<&Arc<PeerConnection>> {
        self.peers.get(&key)
    }

    /// Indexes `conn` under `key` unless a live connection already exists.
    ///
    /// Returns true if the connection was stored. Indexing consumes any
    /// pending introduction for the same identity.
    pub fn index(&mut self, key: PublicKey, conn: Arc<PeerConnection>) -> bool {
        if self.peers.contains_key(&key) {
            return false;
        }
        self.pending_by_key.remove(&key);
        self.peers.insert(key, conn);
        true
    }

    /// Removes `key` if it still maps to exactly `conn`. Returns true if an
    /// entry was removed.
    pub fn remove_if_current(&mut self, key: PublicKey, conn: &Arc<PeerConnection>) -> bool {
        if self.peers.get(&key).is_some_and(|c| Arc::ptr_eq(c, conn)) {
            self.peers.remove(&key);
            return true;
        }
        false
    }

    /// Records the intent to reach `target` through `via`. Returns false if
    /// `target` is already connected or already awaiting introduction.
    pub fn note_introduction(&mut self, target: PublicKey, via: PublicKey) -> bool {
        if self.peers.contains_key(&target) || self.pending_by_key.contains_key(&target) {
            return false;
        }
        self.pending_by_key.insert(target, via);
        true
    }

    /// Returns the intermediary recorded for `target`, if any.
    #[must_use]
    pub fn introduction_via(&self, target: PublicKey) -> Option<PublicKey> {
        self.pending_by_key.get(&target).copied()
    }

    /// Number of live peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if the peer table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Identities of all live peers.
    #[must_use]
    pub fn peer_keys(&self) -> Vec<PublicKey> {
        self.peers.keys().copied().collect()
    }

    /// All live peer connections.
    #[must_use]
    pub fn peer_connections(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.values().cloned().collect()
    }

    /// Empties every table, returning all connections that were held (live
    /// peers and in-flight dials) so the caller can tear them down.
    pub fn drain(&mut self) -> Vec<Arc<PeerConnection>> {
        let mut connections: Vec<Arc<PeerConnection>> =
            self.peers.drain().map(|(_, conn)| conn).collect();
        for (_, slot) in &mut self.pending_by_url {
            if let Some(conn) = slot.take() {
                connections.push(conn);
            }
        }
        self.pending_by_key.clear();
        connections
    }
}
