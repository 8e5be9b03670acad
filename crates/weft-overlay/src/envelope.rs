//! Signed message envelopes.
//!
//! A [`SignedEnvelope`] is the unit actually transmitted between peers: a
//! [`Message`] plus the signer's public key and an Ed25519 signature over the
//! canonical (JSON) serialization of the message. Envelopes that fail
//! verification are never delivered to application logic.

use ed25519_dalek::{Signature, Verifier};
use serde::{Deserialize, Serialize};

use crate::error::OverlayError;
use crate::identity::{Identity, PublicKey};
use crate::message::Message;

/// A message bound to the identity that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    message: Message,
    signer: PublicKey,
    #[serde(with = "signature_serde")]
    signature: Signature,
}

/// Custom serde for `Signature` since it carries no Serialize/Deserialize of
/// its own on the wire format we want (raw byte vector).
mod signature_serde {
    use ed25519_dalek::Signature;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(sig: &Signature, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&sig.to_bytes())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Signature, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid signature length"))?;
        Ok(Signature::from_bytes(&arr))
    }
}

impl SignedEnvelope {
    /// Signs `message` with `identity`, producing the envelope to transmit.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    pub fn sign(message: Message, identity: &Identity) -> Result<Self, OverlayError> {
        let canonical = message.to_bytes()?;
        let signature = identity.sign_bytes(&canonical);
        Ok(Self {
            message,
            signer: identity.public_key(),
            signature,
        })
    }

    /// Verifies the signature against the stated signer and returns the
    /// message.
    ///
    /// Verification never consults any secret state: it is a pure function
    /// of the envelope's public fields.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Authentication`] on a malformed signer key or
    /// a signature mismatch.
    pub fn verify(&self) -> Result<&Message, OverlayError> {
        let canonical = self.message.to_bytes()?;
        let verifying_key = self.signer.verifying_key()?;
        verifying_key
            .verify(&canonical, &self.signature)
            .map_err(|e| OverlayError::Authentication(format!("signature mismatch: {e}")))?;
        Ok(&self.message)
    }

    /// Returns the message without verifying. Prefer [`Self::verify`].
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Returns the public key the envelope claims produced it.
    #[must_use]
    pub const fn signer(&self) -> PublicKey {
        self.signer
    }

    /// Serializes the envelope to JSON bytes, one data-channel frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
