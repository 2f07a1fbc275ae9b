//! Mini-P2P: the peer-to-peer networking engine of a blockchain node
//!
//! This crate decides who a node is connected to and how it finds and keeps
//! peers:
//! - Canonical peer dial strings (`/ip4/<ip>/tcp/<port>/p2p/<id>`)
//! - Connection slots with inbound/outbound sub-limits
//! - A prioritized dial queue with retries and exponential backoff
//! - Kademlia routing table and a `FindPeers` discovery protocol
//! - Bootnode reconnection after total connectivity loss
//! - A peer event bus for higher layers
//! - secp256k1 node identities persisted to disk
//!
//! # Example
//!
//! ```rust,no_run
//! use mini_p2p::network::{NetworkConfig, Server};
//!
//! # async fn run() -> Result<(), mini_p2p::network::NetworkError> {
//! let config = NetworkConfig {
//!     no_discover: true,
//!     ..Default::default()
//! };
//! let server = Server::new_tcp(config).await?;
//! println!("Dial me at {}", server.addr_info());
//!
//! let mut events = server.subscribe();
//! while let Some(event) = events.next().await {
//!     println!("{:?} {}", event.kind, event.peer_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod crypto;
pub mod network;

// Re-export commonly used types
pub use crypto::KeyPair;
pub use network::{
    AddrInfo, DialPriority, NetworkConfig, NetworkError, PeerEvent, PeerEventType, PeerId, Server,
};
