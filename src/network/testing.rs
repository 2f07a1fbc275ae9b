//! Helpers for waiting on connectivity changes
//!
//! Every helper subscribes to the server's events before checking the
//! current state, so a transition that races the call is never missed.

use crate::network::addr::AddrInfo;
use crate::network::event::{PeerEventType, Subscription};
use crate::network::peer_id::PeerId;
use crate::network::server::Server;
use std::collections::HashSet;
use std::time::Duration;

/// Connect `from` to `to` and wait until the connection is live.
/// Returns false if the dial is given up on or `timeout` passes first.
pub async fn join_and_wait(from: &Server, to: &AddrInfo, timeout: Duration) -> bool {
    let mut events = from.subscribe();
    if from.is_connected(&to.id).await {
        return true;
    }
    from.join(to.clone()).await;

    let target = to.id;
    let wait = async {
        while let Some(event) = events.next().await {
            if event.peer_id != target {
                continue;
            }
            match event.kind {
                PeerEventType::Connected | PeerEventType::AlreadyConnected => return true,
                PeerEventType::DialCompleted => return from.is_connected(&target).await,
                _ => {}
            }
        }
        false
    };
    tokio::time::timeout(timeout, wait).await.unwrap_or(false)
}

/// Disconnect `from` from `peer` and wait for the disconnect event
pub async fn leave_and_wait(from: &Server, peer: &PeerId, timeout: Duration) -> bool {
    let events = from.subscribe();
    if !from.disconnect(peer, "leaving").await {
        return !from.is_connected(peer).await;
    }
    wait_for(events, &[*peer], &[PeerEventType::Disconnected], timeout).await
}

/// Wait until `server` is connected to every one of `peers`
pub async fn wait_until_peer_connects_to(server: &Server, peers: &[PeerId], timeout: Duration) -> bool {
    let events = server.subscribe();
    let mut pending = Vec::new();
    for peer in peers {
        if !server.is_connected(peer).await {
            pending.push(*peer);
        }
    }
    wait_for(
        events,
        &pending,
        &[PeerEventType::Connected, PeerEventType::AlreadyConnected],
        timeout,
    )
    .await
}

/// Wait until `server` is disconnected from every one of `peers`
pub async fn wait_until_peer_disconnects_from(
    server: &Server,
    peers: &[PeerId],
    timeout: Duration,
) -> bool {
    let events = server.subscribe();
    let mut pending = Vec::new();
    for peer in peers {
        if server.is_connected(peer).await {
            pending.push(*peer);
        }
    }
    wait_for(events, &pending, &[PeerEventType::Disconnected], timeout).await
}

/// Wait until the routing table of `server` holds at least `size` peers
pub async fn wait_until_routing_table_filled(server: &Server, size: usize, timeout: Duration) -> bool {
    server.wait_for_routing_table_size(size, timeout).await
}

async fn wait_for(
    mut events: Subscription,
    peers: &[PeerId],
    kinds: &[PeerEventType],
    timeout: Duration,
) -> bool {
    let mut pending: HashSet<PeerId> = peers.iter().copied().collect();
    if pending.is_empty() {
        return true;
    }
    let wait = async {
        while let Some(event) = events.next().await {
            if kinds.contains(&event.kind) {
                pending.remove(&event.peer_id);
                if pending.is_empty() {
                    return true;
                }
            }
        }
        false
    };
    tokio::time::timeout(timeout, wait).await.unwrap_or(false)
}
