//! Kademlia routing table
//!
//! Known peers are grouped into buckets by the bit length of their XOR
//! distance from the local identity. Each bucket keeps its entries ordered
//! from least to most recently seen; when a full bucket receives a new
//! peer, the least recently seen entry is evicted.

use crate::network::addr::AddrInfo;
use crate::network::peer_id::{PeerId, PEER_ID_LEN};
use std::collections::VecDeque;
use tokio::time::Instant;

/// Default maximum occupancy of a bucket
pub const DEFAULT_BUCKET_SIZE: usize = 20;

/// Number of buckets, one per possible distance bit length
pub const NUM_BUCKETS: usize = PEER_ID_LEN * 8;

/// A routing table entry
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    pub info: AddrInfo,
    pub last_seen: Instant,
}

/// Result of [`RoutingTable::insert`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New entry added
    Added,
    /// Existing entry refreshed
    Refreshed,
    /// New entry added after evicting the least recently seen one
    Evicted(PeerId),
    /// Local identity, not stored
    Ignored,
}

#[derive(Debug, Clone, Default)]
struct KBucket {
    // front = least recently seen
    entries: VecDeque<RoutingEntry>,
}

impl KBucket {
    fn position(&self, id: &PeerId) -> Option<usize> {
        self.entries.iter().position(|e| &e.info.id == id)
    }

    fn insert(&mut self, info: AddrInfo, capacity: usize) -> InsertOutcome {
        let now = Instant::now();
        if let Some(pos) = self.position(&info.id) {
            if let Some(mut entry) = self.entries.remove(pos) {
                if !info.addrs.is_empty() {
                    entry.info = info;
                }
                entry.last_seen = now;
                self.entries.push_back(entry);
            }
            return InsertOutcome::Refreshed;
        }

        let mut outcome = InsertOutcome::Added;
        if self.entries.len() >= capacity {
            match self.entries.pop_front() {
                Some(evicted) => outcome = InsertOutcome::Evicted(evicted.info.id),
                None => return InsertOutcome::Ignored,
            }
        }
        self.entries.push_back(RoutingEntry {
            info,
            last_seen: now,
        });
        outcome
    }

    fn remove(&mut self, id: &PeerId) -> Option<RoutingEntry> {
        let pos = self.position(id)?;
        self.entries.remove(pos)
    }
}

/// XOR-distance routing table around a local identity
#[derive(Debug, Clone)]
pub struct RoutingTable {
    local_id: PeerId,
    bucket_size: usize,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local_id: PeerId, bucket_size: usize) -> Self {
        Self {
            local_id,
            bucket_size: bucket_size.max(1),
            buckets: vec![KBucket::default(); NUM_BUCKETS],
        }
    }

    fn bucket_index(&self, id: &PeerId) -> Option<usize> {
        match self.local_id.distance(id).bit_len() {
            0 => None,
            n => Some(n - 1),
        }
    }

    /// Insert or refresh a peer. Inserting the local identity is a no-op.
    pub fn insert(&mut self, info: AddrInfo) -> InsertOutcome {
        let Some(index) = self.bucket_index(&info.id) else {
            return InsertOutcome::Ignored;
        };
        let outcome = self.buckets[index].insert(info, self.bucket_size);
        if let InsertOutcome::Evicted(old) = &outcome {
            log::debug!("Routing table bucket {} full, evicted {}", index, old);
        }
        outcome
    }

    /// Remove a peer, returning its entry if it was present
    pub fn remove(&mut self, id: &PeerId) -> Option<RoutingEntry> {
        let index = self.bucket_index(id)?;
        self.buckets[index].remove(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &PeerId) -> Option<&RoutingEntry> {
        let index = self.bucket_index(id)?;
        let bucket = &self.buckets[index];
        bucket.position(id).and_then(|pos| bucket.entries.get(pos))
    }

    /// Every identity in the table
    pub fn list_peers(&self) -> Vec<PeerId> {
        self.entries().map(|e| e.info.id).collect()
    }

    pub fn size(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Up to `n` peers ordered by ascending XOR distance to `target`
    pub fn closest_to(&self, target: &PeerId, n: usize) -> Vec<AddrInfo> {
        let mut all: Vec<&RoutingEntry> = self.entries().collect();
        all.sort_by_key(|e| target.distance(&e.info.id));
        all.into_iter().take(n).map(|e| e.info.clone()).collect()
    }

    fn entries(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.buckets.iter().flat_map(|b| b.entries.iter())
    }
}
