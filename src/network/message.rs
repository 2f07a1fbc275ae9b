//! Network message types for P2P communication
//!
//! Every frame on a link carries one [`Message`]. A link opens with a
//! `Hello` and an `Auth` from each side and the listener's verdict, after
//! which both sides exchange numbered requests and responses.

use crate::network::peer_id::PeerId;
use crate::network::slots::Direction;
use serde::{Deserialize, Serialize};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = [0x4D, 0x50, 0x32, 0x50]; // "MP2P"

/// Domain tag mixed into every signed handshake challenge
const CHALLENGE_DOMAIN: &[u8] = b"mini-p2p/handshake/1";

/// Why a link was refused during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The receiving node already has a connection to this identity
    AlreadyConnected,
    /// No free slot in the relevant direction
    NoSlots,
    /// The dialer reached itself
    SelfConnection,
    /// The receiving node is shutting down
    ShuttingDown,
    /// Incompatible protocol version
    Version,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::AlreadyConnected => "already connected",
            RejectReason::NoSlots => "no free slots",
            RejectReason::SelfConnection => "self connection",
            RejectReason::ShuttingDown => "shutting down",
            RejectReason::Version => "protocol version mismatch",
        };
        f.write_str(s)
    }
}

/// Network message types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Identity announcement, sent first by both sides
    Hello(Handshake),

    /// Hex signature over the other side's nonce, see [`challenge`]
    Auth { signature: String },

    /// Listener accepted the link
    Welcome,

    /// Listener refused the link
    Reject(RejectReason),

    /// Numbered request
    Request { id: u64, body: Request },

    /// Answer to the request with the same id
    Response { id: u64, body: Response },
}

/// Handshake message for initial connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    /// Protocol version
    pub version: u32,
    /// Hex-encoded compressed secp256k1 public key
    pub public_key: String,
    /// Advertised dial addresses, `/ip4/<ip>/tcp/<port>` form
    pub listen_addrs: Vec<String>,
    /// Node's user agent string
    pub user_agent: String,
    /// Random hex string the other side must sign
    pub nonce: String,
}

impl Handshake {
    /// Create a new handshake message
    pub fn new(public_key: String, listen_addrs: Vec<String>, nonce: String) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            public_key,
            listen_addrs,
            user_agent: format!("mini-p2p/{}", env!("CARGO_PKG_VERSION")),
            nonce,
        }
    }
}

/// Fresh 32-byte handshake nonce, hex encoded
pub fn new_nonce() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Bytes a node signs to answer `nonce`. The signer's side of the link is
/// part of the message, so a listener's answer cannot be replayed as a
/// dialer's and the other way round.
pub fn challenge(nonce: &str, signer: Direction) -> Vec<u8> {
    let role: &[u8] = match signer {
        Direction::Outbound => b"dialer",
        Direction::Inbound => b"listener",
    };
    let mut message = CHALLENGE_DOMAIN.to_vec();
    message.push(b'/');
    message.extend_from_slice(role);
    message.push(b'/');
    message.extend_from_slice(nonce.as_bytes());
    message
}

/// Requests served over an established link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Ask for up to `count` peers near `target`
    FindPeers { target: PeerId, count: u32 },
    /// Round-trip check
    Ping(u64),
}

/// Responses to [`Request`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Dial strings of the peers found
    Peers(Vec<String>),
    /// Echo of a ping nonce
    Pong(u64),
    /// The request could not be served
    Error(String),
}

impl Message {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Hello(_) => "Hello",
            Message::Auth { .. } => "Auth",
            Message::Welcome => "Welcome",
            Message::Reject(_) => "Reject",
            Message::Request { .. } => "Request",
            Message::Response { .. } => "Response",
        }
    }
}
