//! Error types for the signaling relay.

use std::net::SocketAddr;

use thiserror::Error;
use weft_overlay::OverlayError;

/// Errors that can occur in the signaling relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// A caller misused the relay API: double handler registration, double
    /// node binding, or a node whose identity mismatches the relay's.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An overlay operation failed.
    #[error(transparent)]
    Overlay(#[from] OverlayError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
