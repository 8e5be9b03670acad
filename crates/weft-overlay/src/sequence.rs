//! Ordered, replayable signaling-payload log.
//!
//! Transport negotiation may emit signaling payloads before the channel that
//! should carry them is ready. [`SignalSequence`] decouples the two sides:
//! producers append payloads, and a consumer attached at any point first
//! replays everything already buffered, then receives new payloads in
//! arrival order until the sequence finishes.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::OverlayError;

/// An opaque signaling payload, passed verbatim between transport layers.
pub type SignalPayload = serde_json::Value;

/// One delivery to a sequence consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalEvent {
    /// A signaling payload, in arrival order.
    Payload(SignalPayload),
    /// The sequence finished; no further events follow.
    Finished,
}

#[derive(Default)]
struct SequenceInner {
    payloads: Vec<SignalPayload>,
    finished: bool,
    consumers: Vec<mpsc::UnboundedSender<SignalEvent>>,
}

/// An append-only, multi-consumer log of signaling payloads with a terminal
/// finished state.
#[derive(Default)]
pub struct SignalSequence {
    inner: Mutex<SequenceInner>,
}

impl SignalSequence {
    /// Creates an empty, unfinished sequence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a payload and delivers it to every live consumer in
    /// registration order.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::SequenceFinished`] if the sequence has
    /// finished.
    pub fn append(&self, payload: SignalPayload) -> Result<(), OverlayError> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(OverlayError::SequenceFinished);
        }
        inner.payloads.push(payload.clone());
        inner
            .consumers
            .retain(|tx| tx.send(SignalEvent::Payload(payload.clone())).is_ok());
        Ok(())
    }

    /// Attaches a consumer.
    ///
    /// All existing payloads are replayed into the returned channel in
    /// order before any subsequently appended payload is delivered. If the
    /// sequence has already finished, the replay is followed by
    /// [`SignalEvent::Finished`] and nothing more is delivered.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SignalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        for payload in &inner.payloads {
            // A receiver dropped this early just discards the replay.
            let _ = tx.send(SignalEvent::Payload(payload.clone()));
        }
        if inner.finished {
            let _ = tx.send(SignalEvent::Finished);
        } else {
            inner.consumers.push(tx);
        }
        rx
    }

    /// Marks the sequence finished and notifies consumers. Idempotent.
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        if inner.finished {
            return;
        }
        inner.finished = true;
        for tx in inner.consumers.drain(..) {
            let _ = tx.send(SignalEvent::Finished);
        }
    }

    /// Returns the number of payloads appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().payloads.len()
    }

    /// Returns true if no payloads have been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().payloads.is_empty()
    }

    /// Returns true if the sequence has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }
}

impl std::fmt::Debug for SignalSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SignalSequence")
            .field("len", &inner.payloads.len())
            .field("finished", &inner.finished)
            .field("consumers", &inner.consumers.len())
            .finish()
    }
}
