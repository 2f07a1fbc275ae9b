//! Node key management
//!
//! Every node owns one secp256k1 key pair. The peer identity is derived
//! from the compressed public key, and the secret is persisted under the
//! data directory so a restarted node keeps its identity.

use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::crypto::hash::sha256;
use crate::network::PeerId;

/// Directory (relative to the data dir) holding network key material
pub const NETWORK_DIR: &str = "network";

/// File name of the hex-encoded node secret key
pub const KEY_FILE: &str = "p2p.key";

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// The peer identity derived from this key pair's public key
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public_key)
    }

    /// Path of the key file inside a data directory
    pub fn key_path(data_dir: &Path) -> PathBuf {
        data_dir.join(NETWORK_DIR).join(KEY_FILE)
    }

    /// Load the node key from `data_dir`, generating and persisting a new
    /// one if none exists yet.
    pub fn load_or_generate(data_dir: &Path) -> Result<Self, KeyError> {
        let path = Self::key_path(data_dir);

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let keypair = Self::from_private_key_hex(&contents)?;
            log::debug!("Loaded node key from {}", path.display());
            return Ok(keypair);
        }

        let keypair = Self::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, keypair.private_key_hex())?;
        log::info!(
            "Generated new node key {} at {}",
            keypair.peer_id(),
            path.display()
        );

        Ok(keypair)
    }

    /// Sign a message with this key pair's private key
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        sign_message(&self.secret_key, message)
    }
}

/// Parse a compressed or uncompressed public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Sign a message; inputs other than a 32-byte digest are hashed first
pub fn sign_message(secret_key: &SecretKey, message: &[u8]) -> Result<Vec<u8>, KeyError> {
    let secp = Secp256k1::new();
    let digest = Message::from_digest_slice(&digest(message))?;
    let signature = secp.sign_ecdsa(&digest, secret_key);
    Ok(signature.serialize_compact().to_vec())
}

/// Verify a compact signature against a public key
pub fn verify_signature(
    public_key: &PublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::new();
    let digest = Message::from_digest_slice(&digest(message))?;
    let sig = Signature::from_compact(signature).map_err(|_| KeyError::InvalidSignature)?;

    match secp.verify_ecdsa(&digest, &sig, public_key) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

fn digest(message: &[u8]) -> [u8; 32] {
    match <[u8; 32]>::try_from(message) {
        Ok(hash) => hash,
        Err(_) => sha256(message),
    }
}
