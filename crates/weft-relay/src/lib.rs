//! # weft-relay
//!
//! Signaling relay for the Weft overlay network.
//!
//! The relay is the one central piece of the overlay: a rendezvous that
//! accepts WebSocket signaling channels, builds responder-role peer
//! connections from them, and hands completed connections to a bound
//! [`weft_overlay::Node`]. It also exposes a small HTTP surface for health
//! checks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod relay;

pub use error::{RelayError, RelayResult};
pub use relay::SignalingRelay;
