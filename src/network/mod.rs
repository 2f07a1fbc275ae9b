//! P2P Networking module
//!
//! Decides who this node is connected to and how it finds and keeps peers.
//!
//! # Features
//! - Canonical `/ip4/<ip>/tcp/<port>/p2p/<id>` peer addresses
//! - Inbound/outbound connection slots under a total limit
//! - Prioritized dial queue with exponential backoff
//! - Kademlia routing table and `FindPeers` discovery
//! - Automatic re-dialing of bootnodes after total connectivity loss
//! - Peer event bus for higher layers
//! - Swappable transport (TCP, in-process)

pub mod addr;
pub mod config;
pub mod dial_queue;
pub mod discovery;
pub mod error;
pub mod event;
pub mod message;
pub mod peer;
pub mod peer_id;
pub mod routing;
pub mod server;
pub mod slots;
pub mod supervisor;
pub mod testing;
pub mod transport;

#[cfg(test)]
mod tests;

pub use addr::{
    addr_info_to_string, advertised_addrs, string_to_addr_info, AddrError, AddrInfo, PeerAddr,
};
pub use config::{NetworkConfig, DEFAULT_MAX_PEERS, DEFAULT_PORT};
pub use dial_queue::{DialPriority, DialQueue, DialTask};
pub use discovery::{Discovery, MAX_FIND_PEERS, MIN_BOOTNODES};
pub use error::{NetworkError, TransportError};
pub use event::{EventBus, PeerEvent, PeerEventType, Subscription};
pub use message::{Message, RejectReason, Request, Response, MAGIC, PROTOCOL_VERSION};
pub use peer::{Admission, PeerInfo, PeerManager};
pub use peer_id::{PeerId, PEER_ID_LEN};
pub use routing::{RoutingTable, DEFAULT_BUCKET_SIZE};
pub use server::Server;
pub use slots::{Direction, SlotLimits};
pub use transport::{
    reachable_addrs, Link, MemoryNetwork, MemoryTransport, TcpTransport, Transport, TransportEvent,
};
