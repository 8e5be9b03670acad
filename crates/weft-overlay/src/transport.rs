//! Transport backend abstraction.
//!
//! The overlay does not implement NAT traversal itself: a
//! [`TransportBackend`] is injected into every component that opens
//! connections. A backend negotiates a direct bidirectional byte channel by
//! exchanging opaque signaling payloads out-of-band; the overlay only moves
//! those payloads around.
//!
//! [`MemoryTransport`] is the in-process backend used by tests and
//! same-process deployments: endpoints opened on the same backend instance
//! find each other through an offer/answer handshake keyed by session id.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::sequence::SignalPayload;

/// Which side of the negotiation this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRole {
    /// Starts the negotiation by emitting the first signaling payload.
    Initiator,
    /// Waits for the initiator's payload and answers it.
    Responder,
}

/// Events emitted by a transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The byte channel is established; data may now flow.
    Connected,
    /// One inbound data frame.
    Data(Vec<u8>),
    /// The transport failed. Terminal.
    Error(String),
    /// The peer closed the channel. Terminal.
    Closed,
}

/// The handles a backend returns for one endpoint.
///
/// The overlay pipes `signals` to the remote side (via a rendezvous channel)
/// and feeds remote payloads into `signal_tx`; once
/// [`TransportEvent::Connected`] arrives on `events`, frames written to
/// `data_tx` reach the peer.
#[derive(Debug)]
pub struct TransportChannel {
    /// Signaling payloads produced by the local negotiation, in order.
    pub signals: mpsc::UnboundedReceiver<SignalPayload>,
    /// Intake for signaling payloads produced by the remote negotiation.
    pub signal_tx: mpsc::UnboundedSender<SignalPayload>,
    /// Connection lifecycle and inbound data.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    /// Outbound data frames. Dropping this sender closes the channel.
    pub data_tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// A pluggable transport negotiation backend.
pub trait TransportBackend: Send + Sync {
    /// Opens a new endpoint. Must be called from within a tokio runtime.
    fn open(&self, role: TransportRole) -> TransportChannel;
}

/// An endpoint offered by an initiator, waiting for a responder to claim it.
struct OfferSlot {
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    data_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// In-process transport backend.
///
/// Initiators emit an `offer` payload carrying a fresh session id; a
/// responder on the same backend instance that receives the offer wires the
/// two endpoints' data channels together and emits an `answer`. Both sides
/// then observe [`TransportEvent::Connected`]. Clones share the session
/// table.
#[derive(Default, Clone)]
pub struct MemoryTransport {
    offers: Arc<Mutex<HashMap<Uuid, OfferSlot>>>,
}

impl MemoryTransport {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn offer_payload(session: Uuid) -> SignalPayload {
        serde_json::json!({ "kind": "offer", "session": session })
    }

    fn answer_payload(session: Uuid) -> SignalPayload {
        serde_json::json!({ "kind": "answer", "session": session })
    }

    fn parse(payload: &SignalPayload) -> Option<(&str, Uuid)> {
        let kind = payload.get("kind")?.as_str()?;
        let session = payload.get("session")?.as_str()?.parse().ok()?;
        Some((kind, session))
    }
}

impl TransportBackend for MemoryTransport {
    fn open(&self, role: TransportRole) -> TransportChannel {
        let (sig_out_tx, sig_out_rx) = mpsc::unbounded_channel();
        let (sig_in_tx, mut sig_in_rx) = mpsc::unbounded_channel::<SignalPayload>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        match role {
            TransportRole::Initiator => {
                let session = Uuid::new_v4();
                self.offers.lock().insert(
                    session,
                    OfferSlot {
                        event_tx: event_tx.clone(),
                        data_rx,
                    },
                );
                // Negotiation starts immediately; the signal sequence buffers
                // the offer until a rendezvous channel subscribes.
                let _ = sig_out_tx.send(Self::offer_payload(session));

                let offers = Arc::clone(&self.offers);
                tokio::spawn(async move {
                    let mut connected = false;
                    while let Some(payload) = sig_in_rx.recv().await {
                        match Self::parse(&payload) {
                            Some(("answer", s)) if s == session && !connected => {
                                connected = true;
                                let _ = event_tx.send(TransportEvent::Connected);
                            }
                            _ => debug!(?payload, "ignoring unexpected signal"),
                        }
                    }
                    if !connected {
                        // Abandoned before any responder claimed the offer.
                        offers.lock().remove(&session);
                        let _ = event_tx.send(TransportEvent::Closed);
                    }
                });
            }
            TransportRole::Responder => {
                let offers = Arc::clone(&self.offers);
                tokio::spawn(async move {
                    let mut data_rx = Some(data_rx);
                    let mut connected = false;
                    while let Some(payload) = sig_in_rx.recv().await {
                        match Self::parse(&payload) {
                            Some(("offer", session)) if !connected => {
                                let Some(slot) = offers.lock().remove(&session) else {
                                    warn!(%session, "offer for unknown session");
                                    let _ = event_tx.send(TransportEvent::Error(format!(
                                        "unknown session {session}"
                                    )));
                                    continue;
                                };
                                connected = true;

                                // Responder outbound -> initiator events.
                                if let Some(rx) = data_rx.take() {
                                    tokio::spawn(pump(rx, slot.event_tx));
                                }
                                // Initiator outbound -> responder events.
                                tokio::spawn(pump(slot.data_rx, event_tx.clone()));

                                let _ = sig_out_tx.send(Self::answer_payload(session));
                                let _ = event_tx.send(TransportEvent::Connected);
                            }
                            _ => debug!(?payload, "ignoring unexpected signal"),
                        }
                    }
                    if !connected {
                        let _ = event_tx.send(TransportEvent::Closed);
                    }
                });
            }
        }

        TransportChannel {
            signals: sig_out_rx,
            signal_tx: sig_in_tx,
            events: event_rx,
            data_tx,
        }
    }
}

/// Forwards one side's outbound frames to the other side's event stream,
/// delivering `Closed` when the source hangs up.
async fn pump(mut rx: mpsc::UnboundedReceiver<Vec<u8>>, tx: mpsc::UnboundedSender<TransportEvent>) {
    while let Some(frame) = rx.recv().await {
        if tx.send(TransportEvent::Data(frame)).is_err() {
            return;
        }
    }
    let _ = tx.send(TransportEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pipes each side's outbound signals into the other's intake, as a
    /// rendezvous channel would.
    fn wire(a: &mut TransportChannel, b: &mut TransportChannel) {
        let a_to_b = b.signal_tx.clone();
        let mut a_signals = std::mem::replace(&mut a.signals, mpsc::unbounded_channel().1);
        tokio::spawn(async move {
            while let Some(p) = a_signals.recv().await {
                let _ = a_to_b.send(p);
            }
        });
        let b_to_a = a.signal_tx.clone();
        let mut b_signals = std::mem::replace(&mut b.signals, mpsc::unbounded_channel().1);
        tokio::spawn(async move {
            while let Some(p) = b_signals.recv().await {
                let _ = b_to_a.send(p);
            }
        });
    }

    async fn expect_connected(chan: &mut TransportChannel) {
        match chan.events.recv().await {
            Some(TransportEvent::Connected) => {}
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    // ==================== Handshake Tests ====================

    #[tokio::test]
    async fn pair_connects_after_offer_answer() {
        let backend = MemoryTransport::new();
        let mut a = backend.open(TransportRole::Initiator);
        let mut b = backend.open(TransportRole::Responder);
        wire(&mut a, &mut b);

        expect_connected(&mut a).await;
        expect_connected(&mut b).await;
    }

    #[tokio::test]
    async fn data_flows_both_ways() {
        let backend = MemoryTransport::new();
        let mut a = backend.open(TransportRole::Initiator);
        let mut b = backend.open(TransportRole::Responder);
        wire(&mut a, &mut b);
        expect_connected(&mut a).await;
        expect_connected(&mut b).await;

        a.data_tx.send(b"from a".to_vec()).unwrap();
        b.data_tx.send(b"from b".to_vec()).unwrap();

        assert_eq!(
            a.events.recv().await,
            Some(TransportEvent::Data(b"from b".to_vec()))
        );
        assert_eq!(
            b.events.recv().await,
            Some(TransportEvent::Data(b"from a".to_vec()))
        );
    }

    #[tokio::test]
    async fn dropping_sender_closes_peer() {
        let backend = MemoryTransport::new();
        let mut a = backend.open(TransportRole::Initiator);
        let mut b = backend.open(TransportRole::Responder);
        wire(&mut a, &mut b);
        expect_connected(&mut a).await;
        expect_connected(&mut b).await;

        drop(a.data_tx);
        assert_eq!(b.events.recv().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn offer_for_unknown_session_errors() {
        let backend = MemoryTransport::new();
        let mut b = backend.open(TransportRole::Responder);

        b.signal_tx
            .send(MemoryTransport::offer_payload(Uuid::new_v4()))
            .unwrap();

        match b.events.recv().await {
            Some(TransportEvent::Error(_)) => {}
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn abandoned_initiator_cleans_up_offer() {
        let backend = MemoryTransport::new();
        let TransportChannel {
            signals: _signals,
            signal_tx,
            mut events,
            data_tx: _data_tx,
        } = backend.open(TransportRole::Initiator);

        // Hang up the signaling intake before any responder claims the offer.
        drop(signal_tx);

        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
        assert!(backend.offers.lock().is_empty());
    }
}
