//! Node identities.
//!
//! Every node is addressed by an Ed25519 public key. [`Identity`] holds the
//! key pair used to sign outbound messages; [`PublicKey`] is the address form
//! that travels on the wire, serialized as a base58 string.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::OverlayError;

/// A node's address on the network: the raw 32 bytes of an Ed25519 public key.
///
/// Displayed and serialized as base58 for human readability.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    bytes: [u8; 32],
}

impl PublicKey {
    /// Creates a `PublicKey` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Creates a `PublicKey` from an Ed25519 verifying key.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self {
            bytes: key.to_bytes(),
        }
    }

    /// Returns the raw bytes of the key.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Reconstructs the Ed25519 verifying key.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Authentication`] if the bytes do not encode a
    /// valid curve point.
    pub fn verifying_key(&self) -> Result<VerifyingKey, OverlayError> {
        VerifyingKey::from_bytes(&self.bytes)
            .map_err(|e| OverlayError::Authentication(format!("invalid public key: {e}")))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.bytes).into_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| OverlayError::Authentication(format!("invalid base58 key: {e}")))?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| OverlayError::Authentication("public key must be 32 bytes".into()))?;
        Ok(Self { bytes })
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// An Ed25519 key pair addressing this node.
///
/// The signing half never leaves the owning process: `Identity` is not
/// serializable and its `Debug` output shows only the public key.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl Identity {
    /// Generates a fresh random key pair. Always succeeds.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = PublicKey::from_verifying_key(&signing_key.verifying_key());
        Self {
            signing_key,
            public_key,
        }
    }

    /// Returns the public half of the key pair.
    #[must_use]
    pub const fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Signs arbitrary bytes with the private half.
    #[must_use]
    pub fn sign_bytes(&self, bytes: &[u8]) -> Signature {
        self.signing_key.sign(bytes)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== PublicKey Tests ====================

    #[test]
    fn generated_identities_differ() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn public_key_display_is_base58() {
        let id = Identity::generate();
        let displayed = id.public_key().to_string();

        // Base58 alphabet doesn't contain 0, O, I, l
        assert!(!displayed.contains('0'));
        assert!(!displayed.contains('O'));
        assert!(!displayed.contains('I'));
        assert!(!displayed.contains('l'));
        assert!(!displayed.is_empty());
    }

    #[test]
    fn public_key_parse_roundtrip() {
        let key = Identity::generate().public_key();
        let parsed: PublicKey = key.to_string().parse().unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn public_key_parse_rejects_garbage() {
        assert!("not base58 0OIl".parse::<PublicKey>().is_err());
        // Valid base58 but wrong length
        assert!("abc".parse::<PublicKey>().is_err());
    }

    #[test]
    fn public_key_serde_roundtrip() {
        let key = Identity::generate().public_key();
        let json = serde_json::to_string(&key).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }

    #[test]
    fn public_key_serializes_as_string() {
        let key = Identity::generate().public_key();
        let json = serde_json::to_string(&key).unwrap();
        assert!(json.starts_with('"') && json.ends_with('"'));
    }

    #[test]
    fn verifying_key_roundtrip() {
        let id = Identity::generate();
        let vk = id.public_key().verifying_key().unwrap();
        assert_eq!(PublicKey::from_verifying_key(&vk), id.public_key());
    }

    // ==================== Identity Tests ====================

    #[test]
    fn sign_bytes_verifies_against_public_key() {
        use ed25519_dalek::Verifier;

        let id = Identity::generate();
        let sig = id.sign_bytes(b"hello");
        let vk = id.public_key().verifying_key().unwrap();
        assert!(vk.verify(b"hello", &sig).is_ok());
        assert!(vk.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn identity_debug_hides_private_key() {
        let id = Identity::generate();
        let debug = format!("{id:?}");
        assert!(debug.contains("public_key"));
        assert!(!debug.contains("signing_key"));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn public_key_from_bytes_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
                let key = PublicKey::from_bytes(bytes);
                prop_assert_eq!(*key.as_bytes(), bytes);
            }

            #[test]
            fn public_key_display_parse_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
                let key = PublicKey::from_bytes(bytes);
                let parsed: PublicKey = key.to_string().parse().unwrap();
                prop_assert_eq!(key, parsed);
            }
        }
    }
}
