//! # weft-overlay
//!
//! Connection and message-dispatch engine for the Weft peer-to-peer overlay.
//!
//! Nodes discover each other, establish direct authenticated connections,
//! and exchange typed, signed messages; the only central piece is a
//! signaling rendezvous used to bootstrap new connections.
//!
//! This crate provides:
//!
//! - Ed25519 identities and signed message envelopes
//! - The replayable signaling-payload sequence used during connection setup
//! - The peer connection abstraction (transport + signaling handshake)
//! - The node: peer table, discovery protocol, and message dispatch
//! - A pluggable transport backend boundary with an in-process
//!   implementation
//!
//! ## Core Types
//!
//! - [`Identity`] / [`PublicKey`]: a node's key pair and wire address
//! - [`Message`] / [`SignedEnvelope`]: typed payloads and their signed form
//! - [`SignalSequence`]: ordered, replayable signaling log
//! - [`PeerConnection`]: one authenticated connection to another node
//! - [`Node`]: peer table plus discovery/dispatch state machine
//! - [`TransportBackend`] / [`MemoryTransport`]: the injected transport seam

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod message;
pub mod node;
pub mod registry;
pub mod sequence;
pub mod transport;

pub use connection::{ConnectionOptions, ConnectionState, ConnectionTraffic, PeerConnection};
pub use envelope::SignedEnvelope;
pub use error::{OverlayError, OverlayResult};
pub use identity::{Identity, PublicKey};
pub use message::Message;
pub use node::{Node, NodeConfig, NodeStats};
pub use registry::ConnectionRegistry;
pub use sequence::{SignalEvent, SignalPayload, SignalSequence};
pub use transport::{
    MemoryTransport, TransportBackend, TransportChannel, TransportEvent, TransportRole,
};
