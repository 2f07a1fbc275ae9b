//! Networking server
//!
//! The hub of the networking engine. It owns the connection set, runs the
//! dial workers that drain the dial queue, answers transport events, and
//! (with discovery on) drives the discovery exchanges and the reconnection
//! supervisor. Every state change is published on the peer event bus.

use crate::crypto::KeyPair;
use crate::network::addr::AddrInfo;
use crate::network::config::NetworkConfig;
use crate::network::dial_queue::{DialPriority, DialQueue, DialTask};
use crate::network::discovery::Discovery;
use crate::network::error::{NetworkError, TransportError};
use crate::network::event::{EventBus, PeerEvent, PeerEventType, Subscription};
use crate::network::message::{RejectReason, Request, Response};
use crate::network::peer::{Admission, PeerInfo, PeerManager};
use crate::network::peer_id::PeerId;
use crate::network::slots::Direction;
use crate::network::supervisor::Supervisor;
use crate::network::transport::{
    signalled, Link, TcpTransport, Transport, TransportEvent, Verdict,
};
use rand::seq::SliceRandom;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Upper bound on how long a dial worker sleeps waiting for a free slot
/// before re-checking
const SLOT_RECHECK_INTERVAL: Duration = Duration::from_secs(1);

/// The networking server
pub struct Server {
    config: NetworkConfig,
    local_id: PeerId,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    peers: PeerManager,
    dial_queue: DialQueue,
    discovery: Option<Discovery>,
    bootnodes: Vec<AddrInfo>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Validate `config`, load the node key from its data directory, bind
    /// a TCP listener and start the server.
    pub async fn new_tcp(config: NetworkConfig) -> Result<Arc<Self>, NetworkError> {
        config.validate()?;
        let keypair = KeyPair::load_or_generate(&config.data_dir)?;
        let (transport, events) =
            TcpTransport::bind(keypair, config.listen_addr, config.nat_addr).await?;
        Self::start(config, transport, events).await
    }

    /// Start a server on an already bound transport
    pub async fn start(
        config: NetworkConfig,
        transport: Arc<dyn Transport>,
        transport_events: mpsc::Receiver<TransportEvent>,
    ) -> Result<Arc<Self>, NetworkError> {
        let local_id = transport.local_id();
        let bootnodes: Vec<AddrInfo> = config
            .validate()?
            .into_iter()
            .filter(|b| {
                if b.id == local_id {
                    log::warn!("Ignoring bootnode {}: it is this node", b);
                    return false;
                }
                true
            })
            .collect();

        let events = Arc::new(EventBus::new());
        let discovery = config
            .discovery_enabled()
            .then(|| Discovery::new(local_id, config.bucket_size));
        let (shutdown, _) = watch::channel(false);

        let server = Arc::new(Self {
            local_id,
            peers: PeerManager::new(config.slot_limits(), Arc::clone(&events)),
            dial_queue: DialQueue::new(Arc::clone(&events)),
            config,
            transport,
            events,
            discovery,
            bootnodes,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(
            Arc::clone(&server).transport_loop(transport_events),
        ));
        for worker in 0..server.config.dial_workers {
            tasks.push(tokio::spawn(Arc::clone(&server).dial_worker(worker)));
        }
        if server.discovery.is_some() {
            // Subscribe before anything is dialed so no event is missed
            let discovery_events = server.events.subscribe();
            let supervisor_events = server.events.subscribe();
            tasks.push(tokio::spawn(
                Arc::clone(&server).discovery_loop(discovery_events),
            ));
            let supervisor = Supervisor::new(server.config.reconnect_interval());
            tasks.push(tokio::spawn(
                Arc::clone(&server).supervisor_loop(supervisor_events, supervisor),
            ));
        }
        server.lock_tasks().extend(tasks);

        log::info!(
            "Network server {} started (max peers {}, discovery {})",
            server.addr_info(),
            server.config.max_peers,
            if server.discovery.is_some() { "on" } else { "off" }
        );

        if server.discovery.is_some() {
            for bootnode in &server.bootnodes {
                server
                    .add_to_dial_queue(bootnode.clone(), DialPriority::High)
                    .await;
            }
        }

        Ok(server)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Public API
    // =========================================================================

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// This node's identity and advertised addresses
    pub fn addr_info(&self) -> AddrInfo {
        AddrInfo::new(self.local_id, self.transport.listen_addrs())
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Subscribe to peer events emitted from now on
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Number of live connections
    pub async fn num_peers(&self) -> usize {
        self.peers.num_peers().await
    }

    pub async fn num_direction(&self, direction: Direction) -> usize {
        self.peers.num_direction(direction).await
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.peers.peers().await
    }

    pub async fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.is_connected(peer).await
    }

    /// Identities the transport currently holds links to
    pub fn transport_peers(&self) -> Vec<PeerId> {
        self.transport.connected_peers()
    }

    /// Bootnodes in use, without this node itself
    pub fn bootnodes(&self) -> &[AddrInfo] {
        &self.bootnodes
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Queue an outbound dial. No-op (returns false) for this node itself,
    /// for connected peers and for peers already queued or being dialed.
    pub async fn add_to_dial_queue(&self, info: AddrInfo, priority: DialPriority) -> bool {
        if info.id == self.local_id || self.is_closed() {
            return false;
        }
        if self.peers.is_connected(&info.id).await {
            return false;
        }
        let peer = info.id;
        let queued = self.dial_queue.push(DialTask::new(info, priority)).await;
        if queued {
            log::debug!("Queued dial to {} ({:?})", peer, priority);
        }
        queued
    }

    /// Explicitly connect to a peer
    pub async fn join(&self, info: AddrInfo) -> bool {
        self.add_to_dial_queue(info, DialPriority::High).await
    }

    /// Close the connection to `peer`. Returns false if it was not connected.
    pub async fn disconnect(&self, peer: &PeerId, reason: &str) -> bool {
        self.peers.disconnect(peer, reason).await.is_some()
    }

    /// Pending (not in flight) dial tasks
    pub async fn dial_queue_len(&self) -> usize {
        self.dial_queue.len().await
    }

    pub async fn routing_table_size(&self) -> usize {
        match &self.discovery {
            Some(d) => d.routing_table_size().await,
            None => 0,
        }
    }

    pub async fn routing_table_peers(&self) -> Vec<PeerId> {
        match &self.discovery {
            Some(d) => d.list_peers().await,
            None => Vec::new(),
        }
    }

    /// Wait until the routing table holds at least `n` peers
    pub async fn wait_for_routing_table_size(&self, n: usize, timeout: Duration) -> bool {
        match &self.discovery {
            Some(d) => d.wait_for_size(n, timeout).await,
            None => n == 0,
        }
    }

    /// Ask a connected peer for the peers it knows near this node
    pub async fn find_peers(&self, peer: &PeerId) -> Result<Vec<AddrInfo>, NetworkError> {
        let discovery = self.discovery.as_ref().ok_or(NetworkError::DiscoveryDisabled)?;
        let link = self.link_for(peer).await?;
        discovery.find_peers(&link, self.local_id).await
    }

    /// Round-trip time to a connected peer
    pub async fn ping(&self, peer: &PeerId) -> Result<Duration, NetworkError> {
        let link = self.link_for(peer).await?;
        let nonce: u64 = rand::random();
        let start = Instant::now();
        match link.request(Request::Ping(nonce)).await? {
            Response::Pong(n) if n == nonce => Ok(start.elapsed()),
            other => Err(NetworkError::Protocol(format!(
                "unexpected ping response: {:?}",
                other
            ))),
        }
    }

    pub async fn link_for(&self, peer: &PeerId) -> Result<Link, NetworkError> {
        self.peers
            .link(peer)
            .await
            .ok_or(NetworkError::NotConnected(*peer))
    }

    /// Shut down: stop all tasks, close every connection and the transport
    pub async fn close(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        log::info!("Network server {} shutting down", self.local_id);
        self.peers.disconnect_all("server closing").await;
        self.transport.close().await;
        let tasks: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }

    fn emit(&self, peer: PeerId, kind: PeerEventType) {
        self.events.emit(PeerEvent::new(peer, kind));
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    async fn transport_loop(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = signalled(&mut shutdown) => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => break,
                },
            }
        }
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Inbound { link, verdict } => {
                let (peer, link_id) = (link.remote_id(), link.id());
                let answer = if self.is_closed() {
                    link.close();
                    Verdict::Reject(RejectReason::ShuttingDown)
                } else {
                    match self.peers.admit(link, false).await {
                        Admission::Accepted | Admission::Replaced => Verdict::Accept,
                        Admission::AlreadyConnected => {
                            Verdict::Reject(RejectReason::AlreadyConnected)
                        }
                        Admission::NoSlot => Verdict::Reject(RejectReason::NoSlots),
                    }
                };
                // The dialer gave up while we decided; drop what we admitted
                if verdict.send(answer).is_err() && answer == Verdict::Accept {
                    log::debug!("Dialer {} left before admission of {}", peer, link_id);
                    self.peers.link_closed(&peer, link_id).await;
                }
            }
            TransportEvent::Request {
                from,
                request,
                reply,
                ..
            } => {
                let response = self.handle_request(from, request).await;
                let _ = reply.send(response);
            }
            TransportEvent::Closed { peer, link } => {
                self.peers.link_closed(&peer, link).await;
            }
        }
    }

    async fn handle_request(&self, from: PeerId, request: Request) -> Response {
        match request {
            Request::FindPeers { target, count } => match &self.discovery {
                Some(d) => Response::Peers(d.handle_find_peers(&from, &target, count).await),
                None => Response::Error("discovery disabled".to_string()),
            },
            Request::Ping(nonce) => Response::Pong(nonce),
        }
    }

    // =========================================================================
    // Dial workers
    // =========================================================================

    async fn dial_worker(self: Arc<Self>, worker: usize) {
        let mut shutdown = self.shutdown.subscribe();
        log::debug!("Dial worker {} started", worker);
        loop {
            if !self.reserve_dial_slot(&mut shutdown).await {
                break;
            }
            let task = match self.dial_queue.pop(&mut shutdown).await {
                Some(task) => task,
                None => {
                    self.peers.release_dial().await;
                    break;
                }
            };
            self.dial(task, &mut shutdown).await;
        }
        log::debug!("Dial worker {} stopped", worker);
    }

    /// Block until an outbound dial reservation is available. Returns false
    /// on shutdown.
    async fn reserve_dial_slot(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            let freed = self.peers.slot_freed().notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            if self.peers.try_reserve_dial().await {
                return true;
            }
            tokio::select! {
                _ = &mut freed => {}
                _ = tokio::time::sleep(SLOT_RECHECK_INTERVAL) => {}
                _ = signalled(shutdown) => return false,
            }
        }
    }

    /// Run one popped task under a held dial reservation
    async fn dial(&self, mut task: DialTask, shutdown: &mut watch::Receiver<bool>) {
        let peer = task.peer_id();

        if peer == self.local_id {
            self.finish_without_dial(&peer, None).await;
            return;
        }
        if self.peers.is_connected(&peer).await {
            self.finish_without_dial(&peer, Some(PeerEventType::AlreadyConnected))
                .await;
            return;
        }
        if !self.peers.has_free_slot(Direction::Outbound).await {
            log::debug!("No outbound slot left for {}, dropping dial", peer);
            self.finish_without_dial(&peer, Some(PeerEventType::FailedToConnect))
                .await;
            return;
        }

        log::debug!("Dialing {} (attempt {})", task.info, task.attempts + 1);
        let attempt = tokio::time::timeout(self.config.dial_timeout(), self.transport.dial(&task.info));
        let result = tokio::select! {
            r = attempt => r.unwrap_or(Err(TransportError::Timeout)),
            _ = signalled(shutdown) => {
                self.finish_without_dial(&peer, None).await;
                return;
            }
        };

        match result {
            Ok(link) => {
                let admission = self.peers.admit(link, true).await;
                self.dial_queue.complete(&peer).await;
                if admission == Admission::Replaced {
                    self.emit(peer, PeerEventType::AlreadyConnected);
                }
                self.emit(peer, PeerEventType::DialCompleted);
            }
            Err(e) => {
                self.peers.release_dial().await;
                if self.peers.is_connected(&peer).await {
                    self.dial_queue.complete(&peer).await;
                    self.emit(peer, PeerEventType::AlreadyConnected);
                    self.emit(peer, PeerEventType::DialCompleted);
                    return;
                }

                log::debug!("Dial to {} failed: {}", peer, e);
                self.emit(peer, PeerEventType::FailedToConnect);
                let retry = task.record_failure(
                    self.config.dial_backoff_base(),
                    self.config.dial_backoff_max(),
                    self.config.max_dial_attempts,
                );
                if retry && !self.is_closed() {
                    self.dial_queue.requeue(task).await;
                } else {
                    log::info!(
                        "Giving up on {} after {} failed attempts",
                        peer,
                        task.attempts
                    );
                    self.dial_queue.complete(&peer).await;
                    self.emit(peer, PeerEventType::DialCompleted);
                }
            }
        }
    }

    async fn finish_without_dial(&self, peer: &PeerId, event: Option<PeerEventType>) {
        self.peers.release_dial().await;
        self.dial_queue.complete(peer).await;
        if let Some(kind) = event {
            self.emit(*peer, kind);
            self.emit(*peer, PeerEventType::DialCompleted);
        }
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    async fn discovery_loop(self: Arc<Self>, mut events: Subscription) {
        let Some(discovery) = self.discovery.as_ref() else {
            return;
        };
        let mut shutdown = self.shutdown.subscribe();
        let period = self.config.discovery_interval();
        let mut refresh = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = signalled(&mut shutdown) => break,
                event = events.next() => {
                    let Some(event) = event else { break };
                    match event.kind {
                        PeerEventType::Connected => {
                            if let Some(link) = self.peers.link(&event.peer_id).await {
                                discovery.add_peer(link.remote().clone()).await;
                                tokio::spawn(Arc::clone(&self).exchange(link));
                            }
                        }
                        PeerEventType::Disconnected => {
                            discovery.remove_peer(&event.peer_id).await;
                        }
                        _ => {}
                    }
                }
                _ = refresh.tick() => {
                    let connected = self.peers.connected_ids().await;
                    let pick = connected.choose(&mut rand::thread_rng()).copied();
                    if let Some(peer) = pick {
                        if let Some(link) = self.peers.link(&peer).await {
                            tokio::spawn(Arc::clone(&self).exchange(link));
                        }
                    }
                }
            }
        }
    }

    /// Ask a peer who is near us; queue what we are not connected to
    async fn exchange(self: Arc<Self>, link: Link) {
        let Some(discovery) = self.discovery.as_ref() else {
            return;
        };
        match discovery.exchange(&link).await {
            Ok(found) => {
                for info in found {
                    self.add_to_dial_queue(info, DialPriority::Discovered).await;
                }
            }
            Err(e) => log::debug!("Discovery with {} failed: {}", link.remote_id(), e),
        }
    }

    // =========================================================================
    // Reconnection
    // =========================================================================

    async fn supervisor_loop(self: Arc<Self>, mut events: Subscription, mut supervisor: Supervisor) {
        let mut shutdown = self.shutdown.subscribe();
        let period = supervisor.interval();
        let mut tick = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = signalled(&mut shutdown) => break,
                event = events.next() => {
                    let Some(event) = event else { break };
                    match event.kind {
                        PeerEventType::Connected => supervisor.on_connected(),
                        PeerEventType::Disconnected => {
                            let remaining = self.peers.num_peers().await;
                            if supervisor.on_disconnected(remaining) {
                                log::info!("Lost all peers, re-dialing bootnodes");
                                self.reseed_bootnodes().await;
                            }
                        }
                        _ => {}
                    }
                }
                _ = tick.tick() => {
                    let connected = self.peers.num_peers().await;
                    let pending = self.bootnode_pending().await;
                    if supervisor.on_tick(connected, pending) {
                        log::info!("No peers and no bootnode dial pending, re-dialing bootnodes");
                        self.reseed_bootnodes().await;
                    }
                }
            }
        }
    }

    async fn bootnode_pending(&self) -> bool {
        for bootnode in &self.bootnodes {
            if self.dial_queue.contains(&bootnode.id).await {
                return true;
            }
        }
        false
    }

    /// Queue every bootnode with fresh attempt and backoff state
    async fn reseed_bootnodes(&self) {
        for bootnode in &self.bootnodes {
            if self.is_closed() || self.peers.is_connected(&bootnode.id).await {
                continue;
            }
            self.dial_queue
                .reseed(bootnode.clone(), DialPriority::High)
                .await;
        }
    }
}
