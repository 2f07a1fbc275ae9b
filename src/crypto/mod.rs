//! Cryptographic utilities for the networking engine
//!
//! This module provides:
//! - SHA-256 hashing
//! - Node key management and signatures (secp256k1)

pub mod hash;
pub mod keys;

pub use hash::sha256;
pub use keys::{public_key_from_hex, sign_message, verify_signature, KeyError, KeyPair};
