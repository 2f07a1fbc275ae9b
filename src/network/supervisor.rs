//! Reconnection supervisor
//!
//! Decides when the bootnode list has to be pushed back into the dial
//! queue: right away when the last connection drops, and on every tick
//! while the node sits at zero connections with no bootnode dial pending
//! (which covers startup and bootnodes that were abandoned after too many
//! failed attempts). The server runs the loop; this type only holds the
//! state it needs to decide.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Supervisor {
    interval: Duration,
    had_peers: bool,
    reseeds: u64,
}

impl Supervisor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            had_peers: false,
            reseeds: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of reseeds decided so far
    pub fn reseeds(&self) -> u64 {
        self.reseeds
    }

    pub fn on_connected(&mut self) {
        self.had_peers = true;
    }

    /// Called after a disconnect with the remaining connection count.
    /// True when the node just lost its last connection.
    pub fn on_disconnected(&mut self, remaining: usize) -> bool {
        if remaining == 0 && self.had_peers {
            self.had_peers = false;
            self.reseeds += 1;
            return true;
        }
        false
    }

    /// Called on every tick. True when the node has no connections and no
    /// bootnode is queued or being dialed.
    pub fn on_tick(&mut self, connected: usize, bootnode_pending: bool) -> bool {
        if connected > 0 {
            self.had_peers = true;
            return false;
        }
        if bootnode_pending {
            return false;
        }
        self.reseeds += 1;
        true
    }
}
