//! In-process transport
//!
//! A [`MemoryNetwork`] is a hub that endpoints bind to. Each endpoint gets
//! a synthetic `10.0.0.1:<port>` address and can be dialed through any of
//! its addresses, including a NAT override. Links are pairs of [`Link`]
//! handles joined by pump tasks instead of sockets, which makes multi-node
//! scenarios fast and deterministic in tests.

use crate::network::addr::{advertised_addrs, AddrInfo, PeerAddr};
use crate::network::error::TransportError;
use crate::network::peer_id::PeerId;
use crate::network::slots::Direction;
use crate::network::transport::{
    signalled, Link, LinkDriver, LinkId, PendingRequest, Transport, TransportEvent, Verdict,
    EVENT_CHANNEL_SIZE,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

/// First synthetic port handed out by a network
const FIRST_PORT: u16 = 20000;

type Links = Arc<Mutex<HashMap<LinkId, Link>>>;

#[derive(Clone)]
struct Endpoint {
    id: PeerId,
    advertised: Vec<PeerAddr>,
    events: mpsc::Sender<TransportEvent>,
    links: Links,
}

#[derive(Default)]
struct Registry {
    endpoints: HashMap<PeerAddr, Endpoint>,
    next_port: u16,
}

/// Shared hub for in-process transports
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind a new endpoint for `id` at a fresh address. With `nat` set,
    /// the endpoint advertises (and is reachable at) the NAT address
    /// instead of its bound one.
    pub fn bind(
        &self,
        id: PeerId,
        nat: Option<IpAddr>,
    ) -> (Arc<MemoryTransport>, mpsc::Receiver<TransportEvent>) {
        let mut registry = self.lock();
        let bound = loop {
            registry.next_port = registry.next_port.max(FIRST_PORT).wrapping_add(1);
            let addr = PeerAddr::new(Ipv4Addr::new(10, 0, 0, 1), registry.next_port);
            if !registry.endpoints.contains_key(&addr) {
                break addr;
            }
        };
        self.register(&mut registry, id, bound, nat)
    }

    /// Bind at a fixed address, failing if another endpoint holds it
    pub fn bind_at(
        &self,
        id: PeerId,
        addr: PeerAddr,
        nat: Option<IpAddr>,
    ) -> Result<(Arc<MemoryTransport>, mpsc::Receiver<TransportEvent>), TransportError> {
        let mut registry = self.lock();
        if registry.endpoints.contains_key(&addr) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("{} already in use", addr),
            )));
        }
        Ok(self.register(&mut registry, id, addr, nat))
    }

    fn register(
        &self,
        registry: &mut Registry,
        id: PeerId,
        bound: PeerAddr,
        nat: Option<IpAddr>,
    ) -> (Arc<MemoryTransport>, mpsc::Receiver<TransportEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let links: Links = Arc::new(Mutex::new(HashMap::new()));
        let advertised = advertised_addrs(&[bound], nat);

        let endpoint = Endpoint {
            id,
            advertised: advertised.clone(),
            events: events.clone(),
            links: Arc::clone(&links),
        };
        let mut addrs = vec![bound];
        addrs.extend(advertised.iter().copied().filter(|a| *a != bound));
        for addr in &addrs {
            registry.endpoints.insert(*addr, endpoint.clone());
        }

        let transport = Arc::new(MemoryTransport {
            network: self.clone(),
            local_id: id,
            bound: addrs,
            advertised,
            events,
            links,
            closed: AtomicBool::new(false),
        });
        (transport, events_rx)
    }

    fn resolve(&self, target: &AddrInfo) -> Option<Endpoint> {
        let registry = self.lock();
        let first = target.dial_addr()?;
        std::iter::once(first)
            .chain(target.addrs.iter().copied())
            .find_map(|addr| registry.endpoints.get(&addr).cloned())
    }
}

/// One endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local_id: PeerId,
    bound: Vec<PeerAddr>,
    advertised: Vec<PeerAddr>,
    events: mpsc::Sender<TransportEvent>,
    links: Links,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn links(&self) -> MutexGuard<'_, HashMap<LinkId, Link>> {
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> PeerId {
        self.local_id
    }

    fn listen_addrs(&self) -> Vec<PeerAddr> {
        self.advertised.clone()
    }

    async fn dial(&self, target: &AddrInfo) -> Result<Link, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if target.addrs.is_empty() {
            return Err(TransportError::NoDialableAddress(target.id));
        }
        let remote = self
            .network
            .resolve(target)
            .ok_or_else(|| TransportError::DialFailed(format!("{}: connection refused", target)))?;
        if remote.id != target.id {
            return Err(TransportError::IdentityMismatch {
                expected: target.id,
                actual: remote.id,
            });
        }

        let remote_info = AddrInfo::new(remote.id, remote.advertised.clone());
        let local_info = AddrInfo::new(self.local_id, self.advertised.clone());
        let (local_link, local_driver) = Link::new(remote_info, Direction::Outbound, self.local_id);
        let (remote_link, remote_driver) = Link::new(local_info, Direction::Inbound, self.local_id);

        let mut pending = PendingInbound {
            link: remote_link.clone(),
            events: remote.events.clone(),
            armed: true,
        };
        let (verdict_tx, verdict_rx) = oneshot::channel();
        remote
            .events
            .send(TransportEvent::Inbound {
                link: remote_link.clone(),
                verdict: verdict_tx,
            })
            .await
            .map_err(|_| TransportError::DialFailed(format!("{}: connection refused", target)))?;

        match verdict_rx.await {
            Ok(Verdict::Accept) => pending.armed = false,
            Ok(Verdict::Reject(reason)) => return Err(TransportError::Rejected(reason)),
            Err(_) => return Err(TransportError::Closed),
        }

        self.links().insert(local_link.id(), local_link.clone());
        remote
            .links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(remote_link.id(), remote_link.clone());

        tokio::spawn(pump(
            Side {
                link: local_link.clone(),
                owner: self.local_id,
                events: self.events.clone(),
                links: Arc::clone(&self.links),
            },
            local_driver,
            remote_link.clone(),
            remote.events.clone(),
        ));
        tokio::spawn(pump(
            Side {
                link: remote_link.clone(),
                owner: remote.id,
                events: remote.events.clone(),
                links: Arc::clone(&remote.links),
            },
            remote_driver,
            local_link.clone(),
            self.events.clone(),
        ));

        Ok(local_link)
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.links().values().map(|l| l.remote_id()).collect();
        peers.sort();
        peers.dedup();
        peers
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut registry = self.network.lock();
            for addr in &self.bound {
                if matches!(registry.endpoints.get(addr), Some(e) if e.id == self.local_id) {
                    registry.endpoints.remove(addr);
                }
            }
        }
        let links: Vec<Link> = self.links().values().cloned().collect();
        for link in links {
            link.close();
        }
    }
}

/// The listener's half of a link until the dialer sees the verdict. If the
/// dial ends any other way, including by being dropped, the half is closed
/// and its owner told.
struct PendingInbound {
    link: Link,
    events: mpsc::Sender<TransportEvent>,
    armed: bool,
}

impl Drop for PendingInbound {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.link.close();
        let _ = self.events.try_send(TransportEvent::Closed {
            peer: self.link.remote_id(),
            link: self.link.id(),
        });
    }
}

struct Side {
    link: Link,
    owner: PeerId,
    events: mpsc::Sender<TransportEvent>,
    links: Links,
}

/// Carry one side's outgoing requests to the other side until either
/// handle closes
async fn pump(
    side: Side,
    mut driver: LinkDriver,
    other: Link,
    other_events: mpsc::Sender<TransportEvent>,
) {
    loop {
        tokio::select! {
            _ = signalled(&mut driver.closed) => break,
            _ = other.closed() => break,
            Some(PendingRequest { request, reply }) = driver.requests.recv() => {
                let (tx, rx) = oneshot::channel();
                let event = TransportEvent::Request {
                    link: other.id(),
                    from: side.owner,
                    request,
                    reply: tx,
                };
                if other_events.send(event).await.is_err() {
                    let _ = reply.send(Err(TransportError::Closed));
                    break;
                }
                tokio::spawn(async move {
                    let mut reply = reply;
                    tokio::select! {
                        _ = reply.closed() => {}
                        answer = rx => {
                            let _ = reply.send(answer.map_err(|_| TransportError::Closed));
                        }
                    }
                });
            }
        }
    }

    side.link.close();
    other.close();
    side.links
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .remove(&side.link.id());
    let _ = side
        .events
        .send(TransportEvent::Closed {
            peer: side.link.remote_id(),
            link: side.link.id(),
        })
        .await;
}
