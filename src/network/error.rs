//! Networking error types

use crate::crypto::KeyError;
use crate::network::addr::AddrError;
use crate::network::message::RejectReason;
use crate::network::peer_id::PeerId;
use thiserror::Error;

/// Transport-level failures. Per-dial errors of this kind are absorbed by
/// the dial workers and only surface as peer events.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dial failed: {0}")]
    DialFailed(String),
    #[error("timed out")]
    Timeout,
    #[error("identity mismatch: expected {expected}, remote is {actual}")]
    IdentityMismatch { expected: PeerId, actual: PeerId },
    #[error("peer {0} failed to prove it holds its key")]
    Unauthenticated(PeerId),
    #[error("rejected by remote: {0}")]
    Rejected(RejectReason),
    #[error("link closed")]
    Closed,
    #[error("codec error: {0}")]
    Codec(String),
    #[error("no dialable address for {0}")]
    NoDialableAddress(PeerId),
}

/// Errors returned by the networking server
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Malformed address: {0}")]
    MalformedAddress(#[from] AddrError),
    #[error("Insufficient bootnodes: found {found}, need at least {required}")]
    InsufficientBootnodes { found: usize, required: usize },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Peer {0} is not connected")]
    NotConnected(PeerId),
    #[error("Discovery is disabled")]
    DiscoveryDisabled,
    #[error("Protocol error: {0}")]
    Protocol(String),
}
