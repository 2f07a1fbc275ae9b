//! Multi-node scenarios over the in-process transport

use crate::crypto::KeyPair;
use crate::network::addr::{addr_info_to_string, AddrInfo, PeerAddr};
use crate::network::config::NetworkConfig;
use crate::network::dial_queue::DialPriority;
use crate::network::error::NetworkError;
use crate::network::event::{PeerEvent, PeerEventType};
use crate::network::peer_id::PeerId;
use crate::network::server::Server;
use crate::network::slots::Direction;
use crate::network::testing::{
    join_and_wait, leave_and_wait, wait_until_peer_connects_to, wait_until_peer_disconnects_from,
    wait_until_routing_table_filled,
};
use crate::network::transport::{MemoryNetwork, Transport};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn config() -> NetworkConfig {
    NetworkConfig {
        max_peers: 10,
        no_discover: true,
        dial_timeout_ms: 2_000,
        dial_workers: 2,
        max_dial_attempts: 3,
        dial_backoff_base_ms: 50,
        dial_backoff_max_ms: 500,
        discovery_interval_ms: 300,
        reconnect_interval_ms: 300,
        ..Default::default()
    }
}

/// Two unreachable bootnodes, enough to enable discovery
fn dummy_bootnodes() -> Vec<String> {
    (1..=2)
        .map(|i| format!("/ip4/10.9.9.{}/tcp/1478/p2p/{}", i, PeerId::random()))
        .collect()
}

fn discovery_config() -> NetworkConfig {
    NetworkConfig {
        no_discover: false,
        bootnodes: dummy_bootnodes(),
        ..config()
    }
}

async fn spawn_node(network: &MemoryNetwork, config: NetworkConfig) -> Arc<Server> {
    let (transport, events) = network.bind(PeerId::random(), config.nat_addr);
    Server::start(config, transport, events).await.unwrap()
}

/// Poll `server` until `check` holds or the timeout passes
async fn eventually(server: &Server, check: Check) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        let done = match check {
            Check::DialQueueEmpty => server.dial_queue_len().await == 0,
            Check::RoutingTableEmpty => server.routing_table_size().await == 0,
        };
        if done {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[derive(Clone, Copy)]
enum Check {
    DialQueueEmpty,
    RoutingTableEmpty,
}

#[tokio::test]
async fn test_conn_limit_inbound() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(
        &network,
        NetworkConfig {
            max_inbound_peers: Some(1),
            ..config()
        },
    )
    .await;
    let srv1 = spawn_node(&network, config()).await;
    let srv2 = spawn_node(&network, config()).await;

    assert!(join_and_wait(&srv1, &srv0.addr_info(), TIMEOUT).await);
    assert!(!join_and_wait(&srv2, &srv0.addr_info(), TIMEOUT).await);
    assert_eq!(srv0.num_direction(Direction::Inbound).await, 1);

    // Free the inbound slot and try again
    assert!(leave_and_wait(&srv1, &srv0.local_id(), TIMEOUT).await);
    assert!(wait_until_peer_disconnects_from(&srv0, &[srv1.local_id()], TIMEOUT).await);
    assert!(join_and_wait(&srv2, &srv0.addr_info(), TIMEOUT).await);
}

#[tokio::test]
async fn test_conn_limit_outbound_unblocks_on_disconnect() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(
        &network,
        NetworkConfig {
            max_outbound_peers: Some(1),
            ..config()
        },
    )
    .await;
    let srv1 = spawn_node(&network, config()).await;
    let srv2 = spawn_node(&network, config()).await;

    assert!(join_and_wait(&srv0, &srv1.addr_info(), TIMEOUT).await);

    // No outbound slot: the dial stays queued
    assert!(srv0.join(srv2.addr_info()).await);
    assert!(
        !wait_until_peer_connects_to(&srv0, &[srv2.local_id()], Duration::from_millis(500)).await
    );
    assert_eq!(srv0.num_peers().await, 1);

    assert!(srv0.disconnect(&srv1.local_id(), "test").await);
    assert!(wait_until_peer_connects_to(&srv0, &[srv2.local_id()], TIMEOUT).await);
    assert_eq!(srv0.num_direction(Direction::Outbound).await, 1);
}

#[tokio::test]
async fn test_max_peers_never_exceeded() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(
        &network,
        NetworkConfig {
            max_peers: 2,
            ..config()
        },
    )
    .await;
    let mut events = srv0.subscribe();

    let mut others = Vec::new();
    for _ in 0..4 {
        others.push(spawn_node(&network, config()).await);
    }
    let mut outbound = Vec::new();
    for _ in 0..3 {
        outbound.push(spawn_node(&network, config()).await);
    }

    for other in &others {
        other.join(srv0.addr_info()).await;
    }
    for target in &outbound {
        srv0.join(target.addr_info()).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut live = HashSet::new();
    let mut max_seen = 0;
    while let Some(event) = events.try_next() {
        match event.kind {
            PeerEventType::Connected => {
                live.insert(event.peer_id);
            }
            PeerEventType::Disconnected => {
                live.remove(&event.peer_id);
            }
            _ => {}
        }
        max_seen = max_seen.max(live.len());
    }
    assert!(max_seen <= 2);
    assert!(srv0.num_peers().await <= 2);
}

async fn spawn_with_limits(network: &MemoryNetwork, limits: &[usize]) -> Vec<Arc<Server>> {
    let mut servers = Vec::new();
    for max_peers in limits {
        servers.push(
            spawn_node(
                network,
                NetworkConfig {
                    max_peers: *max_peers,
                    ..config()
                },
            )
            .await,
        );
    }
    servers
}

#[tokio::test]
async fn test_run_dial_connects_to_all_peers() {
    let network = MemoryNetwork::new();
    let servers = spawn_with_limits(&network, &[2, 1, 1]).await;
    let (srv, peers) = servers.split_first().unwrap();

    for peer in peers {
        assert!(join_and_wait(srv, &peer.addr_info(), TIMEOUT).await);
    }
    assert_eq!(srv.num_peers().await, 2);
}

#[tokio::test]
async fn test_run_dial_stops_at_limit() {
    let network = MemoryNetwork::new();
    let servers = spawn_with_limits(&network, &[2, 1, 1, 1]).await;
    let (srv, peers) = servers.split_first().unwrap();

    assert!(join_and_wait(srv, &peers[0].addr_info(), TIMEOUT).await);
    assert!(join_and_wait(srv, &peers[1].addr_info(), TIMEOUT).await);
    assert!(!join_and_wait(srv, &peers[2].addr_info(), Duration::from_secs(1)).await);
    assert_eq!(srv.num_peers().await, 2);
}

#[tokio::test]
async fn test_run_dial_continues_after_refused_peer() {
    let network = MemoryNetwork::new();
    let servers = spawn_with_limits(&network, &[1, 0, 1]).await;
    let (srv, peers) = servers.split_first().unwrap();

    // A peer without capacity refuses every attempt
    assert!(!join_and_wait(srv, &peers[0].addr_info(), TIMEOUT).await);
    assert_eq!(srv.num_peers().await, 0);

    assert!(join_and_wait(srv, &peers[1].addr_info(), TIMEOUT).await);
}

#[tokio::test]
async fn test_dial_event_order() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, config()).await;
    let srv1 = spawn_node(&network, config()).await;
    let mut events = srv0.subscribe();

    assert!(join_and_wait(&srv0, &srv1.addr_info(), TIMEOUT).await);
    assert!(eventually(&srv0, Check::DialQueueEmpty).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let id = srv1.local_id();
    let seen: Vec<PeerEventType> = std::iter::from_fn(|| events.try_next())
        .filter(|e| e.peer_id == id)
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        seen,
        vec![
            PeerEventType::AddedToDialQueue,
            PeerEventType::Connected,
            PeerEventType::DialCompleted
        ]
    );
}

#[tokio::test]
async fn test_failed_dial_is_retried_then_abandoned() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, config()).await;
    let mut events = srv0.subscribe();

    let unreachable = AddrInfo::new(
        PeerId::random(),
        vec![PeerAddr::new(Ipv4Addr::new(10, 9, 9, 9), 1)],
    );
    assert!(!join_and_wait(&srv0, &unreachable, TIMEOUT).await);

    let seen: Vec<PeerEventType> = std::iter::from_fn(|| events.try_next())
        .filter(|e| e.peer_id == unreachable.id)
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        seen,
        vec![
            PeerEventType::AddedToDialQueue,
            PeerEventType::FailedToConnect,
            PeerEventType::FailedToConnect,
            PeerEventType::FailedToConnect,
            PeerEventType::DialCompleted
        ]
    );
    assert_eq!(srv0.dial_queue_len().await, 0);
}

#[tokio::test]
async fn test_join_when_already_connected() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, config()).await;
    let srv1 = spawn_node(&network, config()).await;

    assert!(join_and_wait(&srv0, &srv1.addr_info(), TIMEOUT).await);
    assert!(wait_until_peer_connects_to(&srv1, &[srv0.local_id()], TIMEOUT).await);

    // Already connected from the other side: queueing is a no-op
    assert!(!srv1.add_to_dial_queue(srv0.addr_info(), DialPriority::High).await);
    assert!(join_and_wait(&srv1, &srv0.addr_info(), TIMEOUT).await);
    assert_eq!(srv0.num_peers().await, 1);
    assert_eq!(srv1.num_peers().await, 1);
}

#[tokio::test]
async fn test_simultaneous_dials_settle_on_one_connection() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, config()).await;
    let srv1 = spawn_node(&network, config()).await;

    let (info0, info1) = (srv0.addr_info(), srv1.addr_info());
    let (a, b) = tokio::join!(
        join_and_wait(&srv0, &info1, TIMEOUT),
        join_and_wait(&srv1, &info0, TIMEOUT)
    );
    assert!(a && b);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(srv0.num_peers().await, 1);
    assert_eq!(srv1.num_peers().await, 1);
    assert!(srv0.ping(&srv1.local_id()).await.is_ok());
}

#[tokio::test]
async fn test_self_dial_is_never_attempted() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, config()).await;

    assert!(!srv0.join(srv0.addr_info()).await);
    assert_eq!(srv0.dial_queue_len().await, 0);
    assert_eq!(srv0.num_peers().await, 0);
}

#[tokio::test]
async fn test_self_connection_with_bootnodes() {
    let network = MemoryNetwork::new();
    let (transport, events) = network.bind(PeerId::random(), None);
    let own = AddrInfo::new(transport.local_id(), transport.listen_addrs());

    let mut bootnodes = dummy_bootnodes();
    bootnodes.push(addr_info_to_string(&own));
    let srv = Server::start(
        NetworkConfig {
            bootnodes,
            ..discovery_config()
        },
        transport,
        events,
    )
    .await
    .unwrap();

    assert_eq!(srv.bootnodes().len(), 2);
    assert!(srv.bootnodes().iter().all(|b| b.id != own.id));
}

#[tokio::test]
async fn test_minimum_bootnode_count() {
    let network = MemoryNetwork::new();
    for count in 0..=2 {
        let (transport, events) = network.bind(PeerId::random(), None);
        let bootnodes = dummy_bootnodes().into_iter().take(count).collect();
        let result = Server::start(
            NetworkConfig {
                bootnodes,
                ..discovery_config()
            },
            transport,
            events,
        )
        .await;

        match count {
            0 | 1 => assert!(matches!(
                result,
                Err(NetworkError::InsufficientBootnodes { .. })
            )),
            _ => assert!(result.is_ok()),
        }
    }
}

#[tokio::test]
async fn test_nat_address_is_advertised() {
    let network = MemoryNetwork::new();
    let nat: IpAddr = "192.0.2.10".parse().unwrap();
    let srv0 = spawn_node(
        &network,
        NetworkConfig {
            nat_addr: Some(nat),
            ..config()
        },
    )
    .await;
    let srv1 = spawn_node(&network, config()).await;

    let advertised = srv0.addr_info();
    assert!(advertised.addrs.iter().all(|a| a.ip == nat));

    assert!(join_and_wait(&srv1, &advertised, TIMEOUT).await);
    let seen = srv0
        .peers()
        .await
        .into_iter()
        .find(|p| p.info.id == srv1.local_id())
        .unwrap();
    assert_eq!(seen.direction, Direction::Inbound);

    let from_srv1 = srv1.peers().await;
    assert_eq!(from_srv1[0].info.addrs, advertised.addrs);
}

#[tokio::test]
async fn test_abandoned_inbound_dial_frees_its_slot() {
    use futures::FutureExt;

    let network = MemoryNetwork::new();
    let srv0 = spawn_node(
        &network,
        NetworkConfig {
            max_inbound_peers: Some(1),
            ..config()
        },
    )
    .await;
    let mut events = srv0.subscribe();
    let (dialer, _dialer_events) = network.bind(PeerId::random(), None);

    // Dropped after the first poll, while it waits for the admission verdict
    assert!(dialer.dial(&srv0.addr_info()).now_or_never().is_none());

    let dialer_id = dialer.local_id();
    let dropped = tokio::time::timeout(TIMEOUT, async {
        while let Some(event) = events.next().await {
            if event.peer_id == dialer_id && event.kind == PeerEventType::Disconnected {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(dropped);
    assert_eq!(srv0.num_peers().await, 0);

    // The identity and the inbound slot are free again
    let link = dialer.dial(&srv0.addr_info()).await.unwrap();
    assert_eq!(link.remote_id(), srv0.local_id());
    assert!(wait_until_peer_connects_to(&srv0, &[dialer_id], TIMEOUT).await);
    assert_eq!(srv0.num_direction(Direction::Inbound).await, 1);
}

#[tokio::test]
async fn test_ping_and_disconnect_events() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, config()).await;
    let srv1 = spawn_node(&network, config()).await;

    assert!(join_and_wait(&srv0, &srv1.addr_info(), TIMEOUT).await);
    assert!(srv0.ping(&srv1.local_id()).await.is_ok());
    assert!(matches!(
        srv0.ping(&PeerId::random()).await,
        Err(NetworkError::NotConnected(_))
    ));

    let mut events = srv1.subscribe();
    srv0.close().await;
    let event = tokio::time::timeout(TIMEOUT, events.next()).await.unwrap();
    assert_eq!(
        event,
        Some(PeerEvent::new(srv0.local_id(), PeerEventType::Disconnected))
    );
    assert_eq!(srv1.num_peers().await, 0);
}

#[tokio::test]
async fn test_reconnection_with_new_ip() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, config()).await;
    let key = KeyPair::generate();
    let id = key.peer_id();

    let (transport, events) = network.bind(id, None);
    let srv1 = Server::start(config(), transport, events).await.unwrap();
    assert!(join_and_wait(&srv1, &srv0.addr_info(), TIMEOUT).await);
    let old_addrs = srv1.addr_info().addrs;

    srv1.close().await;
    assert!(wait_until_peer_disconnects_from(&srv0, &[id], TIMEOUT).await);

    // Same identity, new address
    let (transport, events) = network.bind(id, None);
    let srv1 = Server::start(config(), transport, events).await.unwrap();
    assert_ne!(srv1.addr_info().addrs, old_addrs);
    assert!(join_and_wait(&srv1, &srv0.addr_info(), TIMEOUT).await);

    let seen = srv0.peers().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].info.id, id);
}

// =============================================================================
// Discovery
// =============================================================================

#[tokio::test]
async fn test_routing_table_tracks_connections() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, discovery_config()).await;
    let srv1 = spawn_node(&network, discovery_config()).await;
    assert_eq!(srv0.routing_table_size().await, 0);

    assert!(join_and_wait(&srv0, &srv1.addr_info(), TIMEOUT).await);
    assert!(wait_until_routing_table_filled(&srv0, 1, TIMEOUT).await);
    assert!(wait_until_routing_table_filled(&srv1, 1, TIMEOUT).await);
    assert_eq!(srv0.routing_table_peers().await, vec![srv1.local_id()]);
    assert_eq!(srv1.routing_table_peers().await, vec![srv0.local_id()]);

    assert!(leave_and_wait(&srv0, &srv1.local_id(), TIMEOUT).await);
    assert!(wait_until_peer_disconnects_from(&srv1, &[srv0.local_id()], TIMEOUT).await);
    assert!(eventually(&srv0, Check::RoutingTableEmpty).await);
    assert!(eventually(&srv1, Check::RoutingTableEmpty).await);
}

#[tokio::test]
async fn test_routing_table_ignores_failed_dials() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, discovery_config()).await;

    let unreachable = AddrInfo::new(
        PeerId::random(),
        vec![PeerAddr::new(Ipv4Addr::new(10, 9, 9, 9), 1)],
    );
    assert!(!join_and_wait(&srv0, &unreachable, TIMEOUT).await);
    assert_eq!(srv0.routing_table_size().await, 0);
}

#[tokio::test]
async fn test_find_peers_excludes_requester() {
    let network = MemoryNetwork::new();
    let hub = spawn_node(&network, discovery_config()).await;
    let srv1 = spawn_node(&network, discovery_config()).await;
    let srv2 = spawn_node(&network, discovery_config()).await;

    assert!(join_and_wait(&srv1, &hub.addr_info(), TIMEOUT).await);
    assert!(join_and_wait(&srv2, &hub.addr_info(), TIMEOUT).await);
    assert!(wait_until_routing_table_filled(&hub, 2, TIMEOUT).await);

    let found = srv1.find_peers(&hub.local_id()).await.unwrap();
    assert!(found.iter().all(|p| p.id != srv1.local_id()));
    assert!(found.iter().any(|p| p.id == srv2.local_id()));
}

#[tokio::test]
async fn test_find_peers_on_empty_table() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, discovery_config()).await;
    let srv1 = spawn_node(&network, discovery_config()).await;

    assert!(join_and_wait(&srv0, &srv1.addr_info(), TIMEOUT).await);
    let found = srv0.find_peers(&srv1.local_id()).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_find_peers_needs_discovery() {
    let network = MemoryNetwork::new();
    let srv0 = spawn_node(&network, config()).await;
    let srv1 = spawn_node(&network, discovery_config()).await;

    assert!(join_and_wait(&srv1, &srv0.addr_info(), TIMEOUT).await);
    assert!(matches!(
        srv0.find_peers(&srv1.local_id()).await,
        Err(NetworkError::DiscoveryDisabled)
    ));
    assert!(matches!(
        srv1.find_peers(&srv0.local_id()).await,
        Err(NetworkError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_chained_nodes_converge() {
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, discovery_config()).await;
    let b = spawn_node(&network, discovery_config()).await;
    let c = spawn_node(&network, discovery_config()).await;

    assert!(join_and_wait(&a, &b.addr_info(), TIMEOUT).await);
    assert!(join_and_wait(&c, &b.addr_info(), TIMEOUT).await);

    assert!(wait_until_peer_connects_to(&a, &[c.local_id()], TIMEOUT).await);
    assert!(wait_until_peer_connects_to(&c, &[a.local_id()], TIMEOUT).await);
    assert!(wait_until_routing_table_filled(&a, 2, TIMEOUT).await);
}

// =============================================================================
// Reconnection
// =============================================================================

async fn bootnode(network: &MemoryNetwork, key: &KeyPair, at: Option<PeerAddr>) -> Arc<Server> {
    let (transport, events) = match at {
        Some(addr) => network.bind_at(key.peer_id(), addr, None).unwrap(),
        None => network.bind(key.peer_id(), None),
    };
    Server::start(config(), transport, events).await.unwrap()
}

#[tokio::test]
async fn test_bootnodes_are_dialed_at_startup() {
    let network = MemoryNetwork::new();
    let boot1 = bootnode(&network, &KeyPair::generate(), None).await;
    let boot2 = bootnode(&network, &KeyPair::generate(), None).await;

    let node = spawn_node(
        &network,
        NetworkConfig {
            bootnodes: vec![boot1.addr_info().to_string(), boot2.addr_info().to_string()],
            ..discovery_config()
        },
    )
    .await;

    assert!(
        wait_until_peer_connects_to(&node, &[boot1.local_id(), boot2.local_id()], TIMEOUT).await
    );
}

#[tokio::test]
async fn test_reconnects_after_losing_all_peers() {
    let network = MemoryNetwork::new();
    let boot1 = bootnode(&network, &KeyPair::generate(), None).await;
    let boot2 = bootnode(&network, &KeyPair::generate(), None).await;
    let node = spawn_node(
        &network,
        NetworkConfig {
            bootnodes: vec![boot1.addr_info().to_string(), boot2.addr_info().to_string()],
            ..discovery_config()
        },
    )
    .await;
    let boot_ids = [boot1.local_id(), boot2.local_id()];
    assert!(wait_until_peer_connects_to(&node, &boot_ids, TIMEOUT).await);

    let mut events = node.subscribe();
    assert!(boot1.disconnect(&node.local_id(), "test").await);
    assert!(boot2.disconnect(&node.local_id(), "test").await);

    // Wait for the drop to zero, then for any bootnode to come back
    let mut live: HashSet<PeerId> = boot_ids.iter().copied().collect();
    let reconnected = tokio::time::timeout(TIMEOUT, async {
        let mut seen_zero = false;
        while let Some(event) = events.next().await {
            match event.kind {
                PeerEventType::Disconnected => {
                    live.remove(&event.peer_id);
                    seen_zero |= live.is_empty();
                }
                PeerEventType::Connected if seen_zero && boot_ids.contains(&event.peer_id) => {
                    return true
                }
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(reconnected);
}

#[tokio::test]
async fn test_reconnects_to_restarted_bootnode() {
    let network = MemoryNetwork::new();
    let key1 = KeyPair::generate();
    let key2 = KeyPair::generate();
    let boot1 = bootnode(&network, &key1, None).await;
    let boot2 = bootnode(&network, &key2, None).await;
    let boot1_addr = boot1.addr_info().addrs[0];

    let node = spawn_node(
        &network,
        NetworkConfig {
            bootnodes: vec![boot1.addr_info().to_string(), boot2.addr_info().to_string()],
            ..discovery_config()
        },
    )
    .await;
    let boot_ids = [boot1.local_id(), boot2.local_id()];
    assert!(wait_until_peer_connects_to(&node, &boot_ids, TIMEOUT).await);

    boot1.close().await;
    boot2.close().await;
    assert!(wait_until_peer_disconnects_from(&node, &boot_ids, TIMEOUT).await);

    // Long enough for every retry to be used up
    tokio::time::sleep(Duration::from_secs(1)).await;

    let boot1 = bootnode(&network, &key1, Some(boot1_addr)).await;
    assert!(wait_until_peer_connects_to(&node, &[boot1.local_id()], TIMEOUT).await);
}

// =============================================================================
// TCP
// =============================================================================

fn tcp_config(dir: &std::path::Path) -> NetworkConfig {
    NetworkConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        data_dir: dir.to_path_buf(),
        ..config()
    }
}

#[tokio::test]
async fn test_tcp_join_and_ping() {
    let dir0 = tempfile::tempdir().unwrap();
    let dir1 = tempfile::tempdir().unwrap();
    let srv0 = Server::new_tcp(tcp_config(dir0.path())).await.unwrap();
    let srv1 = Server::new_tcp(tcp_config(dir1.path())).await.unwrap();

    assert!(join_and_wait(&srv0, &srv1.addr_info(), TIMEOUT).await);
    assert!(wait_until_peer_connects_to(&srv1, &[srv0.local_id()], TIMEOUT).await);
    assert!(srv1.ping(&srv0.local_id()).await.is_ok());
    assert_eq!(srv0.transport_peers(), vec![srv1.local_id()]);

    srv0.close().await;
    assert!(wait_until_peer_disconnects_from(&srv1, &[srv0.local_id()], TIMEOUT).await);
    srv1.close().await;
}

#[tokio::test]
async fn test_tcp_identity_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let first = Server::new_tcp(tcp_config(dir.path())).await.unwrap();
    let id = first.local_id();
    first.close().await;

    let second = Server::new_tcp(tcp_config(dir.path())).await.unwrap();
    assert_eq!(second.local_id(), id);
    second.close().await;
}

#[tokio::test]
async fn test_tcp_validation_runs_before_key_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let result = Server::new_tcp(NetworkConfig {
        no_discover: false,
        bootnodes: vec![],
        ..tcp_config(dir.path())
    })
    .await;

    assert!(matches!(
        result,
        Err(NetworkError::InsufficientBootnodes { .. })
    ));
    assert!(!KeyPair::key_path(dir.path()).exists());
}
