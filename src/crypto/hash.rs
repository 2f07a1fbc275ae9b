//! Hashing utilities
//!
//! SHA-256 derives peer identities from public keys and digests handshake
//! challenges before signing.

use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
