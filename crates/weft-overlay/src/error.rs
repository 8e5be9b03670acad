//! Error types for weft-overlay.

use thiserror::Error;

/// Errors that can occur in overlay operations.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// A signature failed verification, or a frame's signer mismatched a
    /// pinned identity.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Bytes could not be decoded as an envelope or signaling payload.
    #[error("deserialization failed: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A caller misused the API: unconfigured rendezvous URL, double
    /// registration, mismatched identities.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An internal invariant was violated. Indicates a programming defect,
    /// not a network condition.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Appending to a signal sequence that has already finished.
    #[error("signal sequence already finished")]
    SequenceFinished,

    /// The underlying transport or signaling channel failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A wait was abandoned because the node or connection was destroyed.
    #[error("destroyed while waiting")]
    Destroyed,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for OverlayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type for overlay operations.
pub type OverlayResult<T> = Result<T, OverlayError>;
