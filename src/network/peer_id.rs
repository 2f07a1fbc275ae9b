//! Peer identity
//!
//! A `PeerId` is the SHA-256 digest of a node's compressed secp256k1
//! public key. It is rendered as base58 and doubles as the Kademlia key,
//! so XOR distance is computed directly over its 32 bytes.

use crate::crypto::sha256;
use secp256k1::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a peer identity in bytes
pub const PEER_ID_LEN: usize = 32;

/// Errors parsing a textual peer identity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("invalid base58 encoding: {0}")]
    InvalidEncoding(String),
    #[error("invalid peer id length: expected {PEER_ID_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// Globally unique peer identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    pub const fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the identity belonging to a public key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(sha256(&public_key.serialize()))
    }

    /// A random identity with no key behind it, for tests and placeholders
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// XOR distance between two identities
    pub fn distance(&self, other: &PeerId) -> Distance {
        let mut out = [0u8; PEER_ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| PeerIdError::InvalidEncoding(e.to_string()))?;
        let bytes: [u8; PEER_ID_LEN] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| PeerIdError::InvalidLength(v.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// XOR distance between two identities, ordered as a big-endian integer
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Distance([u8; PEER_ID_LEN]);

impl Distance {
    /// Number of significant bits; 0 only for identical identities
    pub fn bit_len(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return (PEER_ID_LEN - i) * 8 - byte.leading_zeros() as usize;
            }
        }
        0
    }
}
