//! Peer event bus
//!
//! Connectivity lifecycle events are fanned out to every subscriber
//! through its own unbounded queue, so a slow subscriber never holds back
//! a fast one and emitting never blocks. The fan-out happens under a
//! single lock, which gives every subscriber the same global order.

use crate::network::peer_id::PeerId;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Kind of connectivity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerEventType {
    Connected,
    Disconnected,
    FailedToConnect,
    AlreadyConnected,
    DialCompleted,
    AddedToDialQueue,
}

/// An immutable connectivity event for one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEvent {
    pub peer_id: PeerId,
    pub kind: PeerEventType,
}

impl PeerEvent {
    pub fn new(peer_id: PeerId, kind: PeerEventType) -> Self {
        Self { peer_id, kind }
    }
}

/// Publish/subscribe hub for [`PeerEvent`]s
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PeerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. It receives every event emitted from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        Subscription { rx, closed: false }
    }

    /// Deliver an event to all live subscribers. Closed subscriptions are
    /// pruned on the way.
    pub fn emit(&self, event: PeerEvent) {
        log::debug!("Peer event {:?} for {}", event.kind, event.peer_id);
        self.lock().retain(|tx| tx.send(event).is_ok());
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<PeerEvent>>> {
        // Emitting never panics while holding the lock, so a poisoned
        // guard still protects a consistent list.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One subscriber's ordered view of the event stream
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<PeerEvent>,
    closed: bool,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the subscription is
    /// closed or the bus is gone.
    pub async fn next(&mut self) -> Option<PeerEvent> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Take the next buffered event without waiting
    pub fn try_next(&mut self) -> Option<PeerEvent> {
        if self.closed {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Stop receiving. Buffered events are discarded and later calls to
    /// [`Subscription::next`] return `None` immediately.
    pub fn close(&mut self) {
        self.closed = true;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Stream for Subscription {
    type Item = PeerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}
