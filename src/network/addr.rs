//! Peer address codec
//!
//! Addresses are written as an ordered path of typed components:
//!
//! ```text
//! /ip4/192.168.1.1/tcp/1478/p2p/<peer-id>
//! /ip6/2001:db8::1/tcp/1478/p2p/<peer-id>
//! ```
//!
//! Encoding picks a single dial address out of the peer's address set,
//! preferring routable addresses over loopback ones. Decoding is the
//! inverse for anything the encoder produced.

use crate::network::peer_id::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

/// Address decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddrError {
    #[error("malformed address '{0}'")]
    Malformed(String),
    #[error("address '{0}' has no /p2p/<peer-id> component")]
    MissingPeerId(String),
    #[error("address '{0}' has no dialable ip/tcp component")]
    MissingTransport(String),
    #[error("invalid ip address '{0}'")]
    InvalidIp(String),
    #[error("invalid tcp port '{0}'")]
    InvalidPort(String),
    #[error("invalid peer id '{0}'")]
    InvalidPeerId(String),
}

/// A single transport address (IP + TCP port)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(ip: impl Into<IpAddr>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    pub fn is_loopback(&self) -> bool {
        self.ip.is_loopback()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    fn protocol(&self) -> &'static str {
        match self.ip {
            IpAddr::V4(_) => "ip4",
            IpAddr::V6(_) => "ip6",
        }
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for PeerAddr {
    // Ipv6Addr's Display already yields the compressed canonical form
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/tcp/{}", self.protocol(), self.ip, self.port)
    }
}

impl fmt::Debug for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for PeerAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = components(s)?;
        match parts.as_slice() {
            [proto, ip, "tcp", port] => parse_ip_port(proto, ip, port),
            _ => Err(AddrError::MissingTransport(s.to_string())),
        }
    }
}

/// A peer identity with the addresses it can be dialed at
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AddrInfo {
    pub id: PeerId,
    pub addrs: Vec<PeerAddr>,
}

impl AddrInfo {
    pub fn new(id: PeerId, addrs: Vec<PeerAddr>) -> Self {
        Self { id, addrs }
    }

    /// The address the encoder would pick for dialing this peer
    pub fn dial_addr(&self) -> Option<PeerAddr> {
        if self.addrs.len() > 1 {
            if let Some(addr) = self.addrs.iter().find(|a| !a.is_loopback()) {
                return Some(*addr);
            }
        }
        self.addrs.first().copied()
    }
}

impl fmt::Display for AddrInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&addr_info_to_string(self))
    }
}

impl FromStr for AddrInfo {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        string_to_addr_info(s)
    }
}

/// Encode a peer's identity and address set into its dial string.
///
/// Loopback addresses are skipped whenever a non-loopback address is
/// available. A peer without addresses encodes to `/p2p/<id>`, which does
/// not decode.
pub fn addr_info_to_string(info: &AddrInfo) -> String {
    match info.dial_addr() {
        Some(addr) => format!("{}/p2p/{}", addr, info.id),
        None => format!("/p2p/{}", info.id),
    }
}

/// Decode a dial string produced by [`addr_info_to_string`]
pub fn string_to_addr_info(s: &str) -> Result<AddrInfo, AddrError> {
    let parts = components(s)?;
    match parts.as_slice() {
        [proto, ip, "tcp", port, "p2p", id] => {
            let addr = parse_ip_port(proto, ip, port)?;
            let id = id
                .parse::<PeerId>()
                .map_err(|_| AddrError::InvalidPeerId(id.to_string()))?;
            Ok(AddrInfo::new(id, vec![addr]))
        }
        ["p2p", _] => Err(AddrError::MissingTransport(s.to_string())),
        [_, _, "tcp", _] => Err(AddrError::MissingPeerId(s.to_string())),
        _ => Err(AddrError::Malformed(s.to_string())),
    }
}

/// The addresses a node advertises for itself. A configured NAT address
/// replaces the whole set, keeping the first listening port.
pub fn advertised_addrs(listen: &[PeerAddr], nat: Option<IpAddr>) -> Vec<PeerAddr> {
    match (nat, listen.first()) {
        (Some(ip), Some(first)) => vec![PeerAddr::new(ip, first.port)],
        _ => listen.to_vec(),
    }
}

fn components(s: &str) -> Result<Vec<&str>, AddrError> {
    let rest = s
        .strip_prefix('/')
        .ok_or_else(|| AddrError::Malformed(s.to_string()))?;
    let parts: Vec<&str> = rest.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(AddrError::Malformed(s.to_string()));
    }
    Ok(parts)
}

fn parse_ip_port(proto: &str, ip: &str, port: &str) -> Result<PeerAddr, AddrError> {
    let ip: IpAddr = match proto {
        "ip4" => ip
            .parse::<std::net::Ipv4Addr>()
            .map(IpAddr::V4)
            .map_err(|_| AddrError::InvalidIp(ip.to_string()))?,
        "ip6" => ip
            .parse::<std::net::Ipv6Addr>()
            .map(IpAddr::V6)
            .map_err(|_| AddrError::InvalidIp(ip.to_string()))?,
        other => return Err(AddrError::Malformed(other.to_string())),
    };
    let port = port
        .parse::<u16>()
        .map_err(|_| AddrError::InvalidPort(port.to_string()))?;
    Ok(PeerAddr::new(ip, port))
}
