//! Signing keys, signatures and the sender-key directory.
//!
//! Signature schemes are an external concern: consensus code only sees the
//! [`SignatureVerifier`] trait and opaque [`Signature`] bytes. The ed25519
//! implementation here is the default collaborator used by the runner and tests.

use crate::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Errors from key handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Public key bytes are not a valid curve point.
    #[error("invalid public key for {0}")]
    InvalidPublicKey(NodeId),
}

/// An ed25519 signing key.
#[derive(Clone)]
pub struct KeyPair(ed25519_dalek::SigningKey);

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        KeyPair(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Build a keypair from a seed (for testing and local clusters).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        KeyPair(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message).to_bytes().to_vec())
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.public_key())
    }
}

/// An ed25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        use ed25519_dalek::Verifier;
        let key = match ed25519_dalek::VerifyingKey::from_bytes(&self.0) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let sig_array: [u8; 64] = match signature.0.as_slice().try_into() {
            Ok(arr) => arr,
            Err(_) => return false,
        };
        let sig = ed25519_dalek::Signature::from_bytes(&sig_array);
        key.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", hex::encode(&self.0[..4]))
    }
}

/// Opaque signature bytes.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// An empty signature. Never verifies.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw signature bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check whether the signature carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() >= 4 {
            write!(f, "Signature({}..)", hex::encode(&self.0[..4]))
        } else {
            write!(f, "Signature({})", hex::encode(&self.0))
        }
    }
}

/// Verifies that a message was signed by a given cluster member.
pub trait SignatureVerifier: Send + Sync {
    /// Returns true if `signature` is valid for `message` under `signer`'s key.
    fn verify(&self, signer: &NodeId, message: &[u8], signature: &Signature) -> bool;
}

/// Public keys of known cluster members.
#[derive(Debug, Default)]
pub struct KeyDirectory {
    keys: RwLock<HashMap<NodeId, PublicKey>>,
}

impl KeyDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a member's public key.
    pub fn insert(&self, node_id: NodeId, key: PublicKey) {
        self.keys.write().insert(node_id, key);
    }

    /// Register a member's public key from raw bytes, rejecting invalid points.
    pub fn insert_bytes(&self, node_id: NodeId, bytes: [u8; 32]) -> Result<(), KeyError> {
        if ed25519_dalek::VerifyingKey::from_bytes(&bytes).is_err() {
            return Err(KeyError::InvalidPublicKey(node_id));
        }
        self.insert(node_id, PublicKey(bytes));
        Ok(())
    }

    /// Forget a member's key.
    pub fn remove(&self, node_id: &NodeId) -> Option<PublicKey> {
        self.keys.write().remove(node_id)
    }

    /// Look up a member's key.
    pub fn get(&self, node_id: &NodeId) -> Option<PublicKey> {
        self.keys.read().get(node_id).copied()
    }

    /// Number of known keys.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Check if the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl SignatureVerifier for KeyDirectory {
    fn verify(&self, signer: &NodeId, message: &[u8], signature: &Signature) -> bool {
        match self.get(signer) {
            Some(key) => key.verify(message, signature),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = KeyPair::from_seed(&[7u8; 32]);
        let sig = key.sign(b"message");
        assert!(key.public_key().verify(b"message", &sig));
        assert!(!key.public_key().verify(b"other message", &sig));
    }

    #[test]
    fn test_empty_signature_never_verifies() {
        let key = KeyPair::from_seed(&[7u8; 32]);
        assert!(!key.public_key().verify(b"message", &Signature::empty()));
    }

    #[test]
    fn test_directory_verifies_by_signer() {
        let directory = KeyDirectory::new();
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let mallory = KeyPair::from_seed(&[2u8; 32]);
        directory.insert(NodeId::from("alice"), alice.public_key());

        let genuine = alice.sign(b"vote");
        let forged = mallory.sign(b"vote");

        assert!(directory.verify(&NodeId::from("alice"), b"vote", &genuine));
        assert!(!directory.verify(&NodeId::from("alice"), b"vote", &forged));
        assert!(!directory.verify(&NodeId::from("unknown"), b"vote", &genuine));
    }
}
