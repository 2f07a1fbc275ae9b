//! Peer management for P2P networking
//!
//! Owns the set of live connections and the slot counters. Admission,
//! replacement and removal are single critical sections, and the matching
//! peer event is emitted before the lock is released, so subscribers see
//! events in the same order the state changed.

use crate::network::addr::AddrInfo;
use crate::network::event::{EventBus, PeerEvent, PeerEventType};
use crate::network::peer_id::PeerId;
use crate::network::slots::{Direction, SlotLimits, Slots};
use crate::network::transport::{Link, LinkId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// A live, admitted connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub info: AddrInfo,
    pub direction: Direction,
    pub link: Link,
    pub connected_at: Instant,
}

/// Snapshot of a connection, for callers outside the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub info: AddrInfo,
    pub direction: Direction,
    pub connected_for: std::time::Duration,
}

/// Result of running a new link through admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Recorded as a new connection
    Accepted,
    /// Took over from an existing link to the same identity
    Replaced,
    /// An existing link to the identity was kept; the new one is closed
    AlreadyConnected,
    /// No free slot in the link's direction; the link is closed
    NoSlot,
}

#[derive(Debug)]
struct ConnectionSet {
    connections: HashMap<PeerId, Connection>,
    slots: Slots,
}

/// Manages all peer connections
pub struct PeerManager {
    state: Mutex<ConnectionSet>,
    events: Arc<EventBus>,
    slot_freed: Notify,
}

impl PeerManager {
    pub fn new(limits: SlotLimits, events: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(ConnectionSet {
                connections: HashMap::new(),
                slots: Slots::new(limits),
            }),
            events,
            slot_freed: Notify::new(),
        }
    }

    /// Admit a freshly opened link. `reserved` releases the dial
    /// reservation the link was opened under.
    ///
    /// Of two live links to the same identity, the one dialed by the
    /// smaller identity wins on both ends, so simultaneous dials settle on
    /// a single connection.
    pub async fn admit(&self, link: Link, reserved: bool) -> Admission {
        let mut state = self.state.lock().await;
        if reserved {
            state.slots.release_dial();
        }

        let peer = link.remote_id();
        let direction = link.direction();

        if let Some(existing) = state.connections.get(&peer) {
            let prefer_new =
                existing.link.is_closed() || link.initiator() < existing.link.initiator();
            if !prefer_new || existing.link.id() == link.id() {
                if existing.link.id() != link.id() {
                    link.close();
                }
                self.emit(peer, PeerEventType::AlreadyConnected);
                if reserved {
                    self.slot_freed.notify_waiters();
                }
                return Admission::AlreadyConnected;
            }

            let old_direction = existing.direction;
            state.slots.release(old_direction);
            if !state.slots.acquire(direction) {
                state.slots.acquire(old_direction);
                link.close();
                self.emit(peer, PeerEventType::AlreadyConnected);
                return Admission::AlreadyConnected;
            }

            let connection = Connection {
                info: link.remote().clone(),
                direction,
                link: link.clone(),
                connected_at: Instant::now(),
            };
            if let Some(old) = state.connections.insert(peer, connection) {
                old.link.close();
            }
            log::debug!("Replaced link to {} with {} ({:?})", peer, link.id(), direction);
            if old_direction != direction {
                self.slot_freed.notify_waiters();
            }
            return Admission::Replaced;
        }

        if !state.slots.acquire(direction) {
            link.close();
            log::debug!("No {:?} slot for {}", direction, peer);
            self.emit(peer, PeerEventType::FailedToConnect);
            if reserved {
                self.slot_freed.notify_waiters();
            }
            return Admission::NoSlot;
        }

        state.connections.insert(
            peer,
            Connection {
                info: link.remote().clone(),
                direction,
                link,
                connected_at: Instant::now(),
            },
        );
        log::info!(
            "Peer {} connected ({:?}, {} total)",
            peer,
            direction,
            state.connections.len()
        );
        self.emit(peer, PeerEventType::Connected);
        Admission::Accepted
    }

    /// Close and forget the connection to `peer`
    pub async fn disconnect(&self, peer: &PeerId, reason: &str) -> Option<Connection> {
        let mut state = self.state.lock().await;
        let connection = state.connections.remove(peer)?;
        self.release(&mut state, &connection);
        log::info!("Peer {} disconnected: {}", peer, reason);
        self.emit(*peer, PeerEventType::Disconnected);
        Some(connection)
    }

    /// Forget a connection whose link went down. Stale link ids, e.g. of
    /// a link that lost a tie-break, are ignored.
    pub async fn link_closed(&self, peer: &PeerId, link: LinkId) -> bool {
        let mut state = self.state.lock().await;
        match state.connections.get(peer) {
            Some(conn) if conn.link.id() == link => {}
            _ => return false,
        }
        if let Some(connection) = state.connections.remove(peer) {
            self.release(&mut state, &connection);
            log::info!("Peer {} disconnected: link closed", peer);
            self.emit(*peer, PeerEventType::Disconnected);
        }
        true
    }

    /// Close every connection
    pub async fn disconnect_all(&self, reason: &str) {
        let mut state = self.state.lock().await;
        let peers: Vec<PeerId> = state.connections.keys().copied().collect();
        for peer in peers {
            if let Some(connection) = state.connections.remove(&peer) {
                self.release(&mut state, &connection);
                log::info!("Peer {} disconnected: {}", peer, reason);
                self.emit(peer, PeerEventType::Disconnected);
            }
        }
    }

    fn release(&self, state: &mut ConnectionSet, connection: &Connection) {
        connection.link.close();
        state.slots.release(connection.direction);
        self.slot_freed.notify_waiters();
    }

    fn emit(&self, peer: PeerId, kind: PeerEventType) {
        self.events.emit(PeerEvent::new(peer, kind));
    }

    /// Reserve an outbound slot for a dial about to start
    pub async fn try_reserve_dial(&self) -> bool {
        self.state.lock().await.slots.reserve_dial()
    }

    pub async fn release_dial(&self) {
        self.state.lock().await.slots.release_dial();
        self.slot_freed.notify_waiters();
    }

    /// Notified whenever a slot or dial reservation is freed
    pub fn slot_freed(&self) -> &Notify {
        &self.slot_freed
    }

    /// Whether a connection in `direction` could be admitted right now
    pub async fn has_free_slot(&self, direction: Direction) -> bool {
        self.state.lock().await.slots.has_free(direction)
    }

    pub async fn num_peers(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    pub async fn num_direction(&self, direction: Direction) -> usize {
        self.state.lock().await.slots.used(direction)
    }

    pub async fn is_connected(&self, peer: &PeerId) -> bool {
        self.state.lock().await.connections.contains_key(peer)
    }

    pub async fn link(&self, peer: &PeerId) -> Option<Link> {
        let state = self.state.lock().await;
        state.connections.get(peer).map(|c| c.link.clone())
    }

    pub async fn connected_ids(&self) -> Vec<PeerId> {
        self.state.lock().await.connections.keys().copied().collect()
    }

    /// Get all peer infos
    pub async fn peers(&self) -> Vec<PeerInfo> {
        let state = self.state.lock().await;
        state
            .connections
            .values()
            .map(|c| PeerInfo {
                info: c.info.clone(),
                direction: c.direction,
                connected_for: c.connected_at.elapsed(),
            })
            .collect()
    }
}
