//! Network configuration

use crate::network::addr::{string_to_addr_info, AddrInfo};
use crate::network::discovery::MIN_BOOTNODES;
use crate::network::error::NetworkError;
use crate::network::slots::SlotLimits;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default TCP listening port
pub const DEFAULT_PORT: u16 = 1478;

/// Default total connection limit
pub const DEFAULT_MAX_PEERS: usize = 40;

/// Configuration of a networking server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to listen on
    pub listen_addr: SocketAddr,
    /// Public IP advertised instead of the listening address
    pub nat_addr: Option<IpAddr>,
    /// Total connection limit across both directions
    pub max_peers: usize,
    /// Optional inbound sub-limit
    pub max_inbound_peers: Option<usize>,
    /// Optional outbound sub-limit
    pub max_outbound_peers: Option<usize>,
    /// Disable the discovery protocol and bootnode validation
    pub no_discover: bool,
    /// Bootnode dial strings, `/ip4/<ip>/tcp/<port>/p2p/<id>`
    pub bootnodes: Vec<String>,
    /// Directory holding the node key
    pub data_dir: PathBuf,

    pub dial_timeout_ms: u64,
    pub dial_workers: usize,
    pub max_dial_attempts: u32,
    pub dial_backoff_base_ms: u64,
    pub dial_backoff_max_ms: u64,
    pub discovery_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    pub bucket_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            nat_addr: None,
            max_peers: DEFAULT_MAX_PEERS,
            max_inbound_peers: None,
            max_outbound_peers: None,
            no_discover: false,
            bootnodes: Vec::new(),
            data_dir: PathBuf::from("./data"),
            dial_timeout_ms: 15_000,
            dial_workers: 4,
            max_dial_attempts: 5,
            dial_backoff_base_ms: 1_000,
            dial_backoff_max_ms: 30_000,
            discovery_interval_ms: 5_000,
            reconnect_interval_ms: 10_000,
            bucket_size: crate::network::routing::DEFAULT_BUCKET_SIZE,
        }
    }
}

impl NetworkConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, NetworkError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| NetworkError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn discovery_enabled(&self) -> bool {
        !self.no_discover
    }

    /// Parse and check the bootnode list. Runs before any key material is
    /// touched or socket bound.
    pub fn validate(&self) -> Result<Vec<AddrInfo>, NetworkError> {
        if self.dial_workers == 0 {
            return Err(NetworkError::Config("dial_workers must be at least 1".into()));
        }
        if self.max_dial_attempts == 0 {
            return Err(NetworkError::Config("max_dial_attempts must be at least 1".into()));
        }

        let mut bootnodes: Vec<AddrInfo> = Vec::with_capacity(self.bootnodes.len());
        for raw in &self.bootnodes {
            let info = string_to_addr_info(raw)?;
            if !bootnodes.iter().any(|b| b.id == info.id) {
                bootnodes.push(info);
            }
        }

        if self.discovery_enabled() && bootnodes.len() < MIN_BOOTNODES {
            return Err(NetworkError::InsufficientBootnodes {
                found: bootnodes.len(),
                required: MIN_BOOTNODES,
            });
        }
        Ok(bootnodes)
    }

    pub fn slot_limits(&self) -> SlotLimits {
        SlotLimits::new(self.max_peers, self.max_inbound_peers, self.max_outbound_peers)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn dial_backoff_base(&self) -> Duration {
        Duration::from_millis(self.dial_backoff_base_ms)
    }

    pub fn dial_backoff_max(&self) -> Duration {
        Duration::from_millis(self.dial_backoff_max_ms.max(self.dial_backoff_base_ms))
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms.max(1))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.max(1))
    }
}
