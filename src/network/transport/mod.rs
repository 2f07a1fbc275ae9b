//! Transport capability
//!
//! The connection manager never touches sockets. It drives a
//! [`Transport`] that can dial an address set, hands it [`Link`]s, and
//! reports inbound links, inbound requests and link closures as
//! [`TransportEvent`]s on a channel.
//!
//! Inbound links are not live until the manager answers with a
//! [`Verdict`]; a rejection is relayed to the dialer, which then sees
//! [`TransportError::Rejected`].

pub mod memory;
pub mod tcp;

use crate::network::addr::{AddrInfo, PeerAddr};
use crate::network::error::TransportError;
use crate::network::message::{RejectReason, Request, Response};
use crate::network::peer_id::PeerId;
use crate::network::slots::Direction;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{reachable_addrs, TcpTransport};

/// Capacity of a transport's event channel
pub const EVENT_CHANNEL_SIZE: usize = 256;

/// Capacity of a link's outgoing request queue
pub const LINK_REQUEST_QUEUE: usize = 64;

/// How long a request waits for its answer
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Swappable network host
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity this transport authenticates as
    fn local_id(&self) -> PeerId;

    /// Addresses this node is reachable at, NAT override applied
    fn listen_addrs(&self) -> Vec<PeerAddr>;

    /// Open a link to `target`. Fails if the remote proves a different
    /// identity or refuses the link.
    async fn dial(&self, target: &AddrInfo) -> Result<Link, TransportError>;

    /// Identities with at least one open link
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Stop listening and close every link
    async fn close(&self);
}

/// Events a transport reports to its owner
#[derive(Debug)]
pub enum TransportEvent {
    /// A remote opened a link and waits for admission
    Inbound {
        link: Link,
        verdict: oneshot::Sender<Verdict>,
    },
    /// A remote sent a request over an open link
    Request {
        link: LinkId,
        from: PeerId,
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    /// A link went down
    Closed { peer: PeerId, link: LinkId },
}

/// Admission answer for an inbound link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

/// Process-unique link identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request waiting to be written to a link
#[derive(Debug)]
pub struct PendingRequest {
    pub request: Request,
    pub reply: oneshot::Sender<Result<Response, TransportError>>,
}

/// Transport side of a [`Link`]: the queue of outgoing requests and the
/// close signal
#[derive(Debug)]
pub struct LinkDriver {
    pub requests: mpsc::Receiver<PendingRequest>,
    pub closed: watch::Receiver<bool>,
}

/// Handle to one open connection
#[derive(Debug, Clone)]
pub struct Link {
    id: LinkId,
    remote: AddrInfo,
    direction: Direction,
    initiator: PeerId,
    requests: mpsc::Sender<PendingRequest>,
    close: Arc<watch::Sender<bool>>,
}

impl Link {
    /// Create a link handle and the driver a transport runs it with
    pub fn new(remote: AddrInfo, direction: Direction, initiator: PeerId) -> (Link, LinkDriver) {
        let (requests_tx, requests_rx) = mpsc::channel(LINK_REQUEST_QUEUE);
        let (close_tx, close_rx) = watch::channel(false);
        let link = Link {
            id: LinkId::next(),
            remote,
            direction,
            initiator,
            requests: requests_tx,
            close: Arc::new(close_tx),
        };
        let driver = LinkDriver {
            requests: requests_rx,
            closed: close_rx,
        };
        (link, driver)
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn remote(&self) -> &AddrInfo {
        &self.remote
    }

    pub fn remote_id(&self) -> PeerId {
        self.remote.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Identity of the side that dialed
    pub fn initiator(&self) -> PeerId {
        self.initiator
    }

    /// Send a request and wait up to [`REQUEST_TIMEOUT`] for the answer
    pub async fn request(&self, request: Request) -> Result<Response, TransportError> {
        self.request_within(request, REQUEST_TIMEOUT).await
    }

    /// Send a request and wait up to `deadline` for the answer
    pub async fn request_within(
        &self,
        request: Request,
        deadline: Duration,
    ) -> Result<Response, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let (reply, rx) = oneshot::channel();
        let exchange = async move {
            self.requests
                .send(PendingRequest { request, reply })
                .await
                .map_err(|_| TransportError::Closed)?;
            rx.await.map_err(|_| TransportError::Closed)?
        };
        tokio::time::timeout(deadline, exchange)
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Close the link. Idempotent.
    pub fn close(&self) {
        self.close.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close.borrow()
    }

    /// Resolves once the link is closed
    pub async fn closed(&self) {
        let mut rx = self.close.subscribe();
        signalled(&mut rx).await
    }
}

/// Resolves once the flag is set or its sender is gone
pub async fn signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
