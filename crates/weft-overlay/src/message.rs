//! Protocol messages exchanged between peers.
//!
//! These are the typed payloads carried inside signed envelopes: liveness
//! probes and the discovery request/response pair.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::PublicKey;

/// Messages exchanged between peers over an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Liveness probe; the peer replies with [`Message::Pong`].
    Ping,

    /// Reply to a [`Message::Ping`].
    Pong,

    /// Request for the peers the receiver currently knows.
    FindPeers {
        /// Correlates the response with this request.
        request_id: Uuid,
    },

    /// Response to a [`Message::FindPeers`].
    Peers {
        /// Echo of the request id.
        request_id: Uuid,
        /// Addresses of the responder's peers, excluding the requester.
        peers: Vec<PublicKey>,
    },
}

impl Message {
    /// Creates a liveness probe.
    #[must_use]
    pub const fn ping() -> Self {
        Self::Ping
    }

    /// Creates a liveness reply.
    #[must_use]
    pub const fn pong() -> Self {
        Self::Pong
    }

    /// Creates a discovery request with a fresh request id.
    #[must_use]
    pub fn find_peers() -> Self {
        Self::FindPeers {
            request_id: Uuid::new_v4(),
        }
    }

    /// Creates a discovery response for the given request.
    #[must_use]
    pub const fn peers(request_id: Uuid, peers: Vec<PublicKey>) -> Self {
        Self::Peers { request_id, peers }
    }

    /// Returns the message kind as a string (for logging).
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::FindPeers { .. } => "FindPeers",
            Self::Peers { .. } => "Peers",
        }
    }

    /// Serializes the message to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes a message from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
