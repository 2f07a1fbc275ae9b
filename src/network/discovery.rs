//! Peer Discovery for P2P networking
//!
//! Coordinates peer discovery through:
//! - A Kademlia routing table fed by live connections
//! - `FindPeers` exchanges with connected peers

use crate::network::addr::{addr_info_to_string, string_to_addr_info, AddrInfo};
use crate::network::error::NetworkError;
use crate::network::message::{Request, Response};
use crate::network::peer_id::PeerId;
use crate::network::routing::{InsertOutcome, RoutingTable};
use crate::network::transport::Link;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of peers returned by one `FindPeers` request
pub const MAX_FIND_PEERS: usize = 16;

/// Minimum number of distinct bootnodes when discovery is enabled
pub const MIN_BOOTNODES: usize = 2;

// =============================================================================
// Peer Discovery
// =============================================================================

/// Peer discovery coordinator
pub struct Discovery {
    local_id: PeerId,
    /// Routing table, owned here and only read by the server
    table: RwLock<RoutingTable>,
    size: watch::Sender<usize>,
}

impl Discovery {
    pub fn new(local_id: PeerId, bucket_size: usize) -> Self {
        let (size, _) = watch::channel(0);
        Self {
            local_id,
            table: RwLock::new(RoutingTable::new(local_id, bucket_size)),
            size,
        }
    }

    // =========================================================================
    // Routing table access
    // =========================================================================

    /// Insert or refresh a peer
    pub async fn add_peer(&self, info: AddrInfo) -> InsertOutcome {
        let mut table = self.table.write().await;
        let outcome = table.insert(info);
        self.size.send_replace(table.size());
        outcome
    }

    /// Drop a peer from the table
    pub async fn remove_peer(&self, id: &PeerId) -> bool {
        let mut table = self.table.write().await;
        let removed = table.remove(id).is_some();
        if removed {
            log::debug!("Removed {} from routing table", id);
            self.size.send_replace(table.size());
        }
        removed
    }

    pub async fn routing_table_size(&self) -> usize {
        self.table.read().await.size()
    }

    pub async fn list_peers(&self) -> Vec<PeerId> {
        self.table.read().await.list_peers()
    }

    /// Wait until the table holds at least `n` peers. Returns false on
    /// timeout.
    pub async fn wait_for_size(&self, n: usize, timeout: Duration) -> bool {
        let mut rx = self.size.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() >= n {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    // =========================================================================
    // Protocol
    // =========================================================================

    /// Serve a `FindPeers` request: the peers closest to `target`, never
    /// including the requester itself.
    pub async fn handle_find_peers(&self, from: &PeerId, target: &PeerId, count: u32) -> Vec<String> {
        let count = (count as usize).min(MAX_FIND_PEERS);
        let table = self.table.read().await;
        table
            .closest_to(target, count + 1)
            .into_iter()
            .filter(|info| &info.id != from && !info.addrs.is_empty())
            .take(count)
            .map(|info| addr_info_to_string(&info))
            .collect()
    }

    /// Ask a connected peer for the peers it knows near `target`.
    /// Malformed entries and the local identity are skipped.
    pub async fn find_peers(&self, link: &Link, target: PeerId) -> Result<Vec<AddrInfo>, NetworkError> {
        let request = Request::FindPeers {
            target,
            count: MAX_FIND_PEERS as u32,
        };
        match link.request(request).await? {
            Response::Peers(entries) => Ok(entries
                .iter()
                .filter_map(|s| match string_to_addr_info(s) {
                    Ok(info) => Some(info),
                    Err(e) => {
                        log::debug!("Skipping peer entry from {}: {}", link.remote_id(), e);
                        None
                    }
                })
                .filter(|info| info.id != self.local_id)
                .take(MAX_FIND_PEERS)
                .collect()),
            Response::Error(msg) => Err(NetworkError::Protocol(msg)),
            other => Err(NetworkError::Protocol(format!(
                "unexpected response to FindPeers: {:?}",
                other
            ))),
        }
    }

    /// Run one exchange with a connected peer: ask for the peers near us
    /// and add everything learned to the table.
    pub async fn exchange(&self, link: &Link) -> Result<Vec<AddrInfo>, NetworkError> {
        let found = self.find_peers(link, self.local_id).await?;
        for info in &found {
            self.add_peer(info.clone()).await;
        }
        log::debug!(
            "Discovered {} peers via {}",
            found.len(),
            link.remote_id()
        );
        Ok(found)
    }
}
