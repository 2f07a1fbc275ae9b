//! Dial queue
//!
//! Pending outbound connection attempts. Tasks that are eligible now sit
//! in a priority heap; tasks waiting out a backoff sit in a second heap
//! keyed by their next-eligible time and are promoted when it passes.
//! A popped task is tracked as in flight until the worker completes or
//! requeues it, so one identity is never dialed twice at once.

use crate::network::addr::AddrInfo;
use crate::network::event::{EventBus, PeerEvent, PeerEventType};
use crate::network::peer_id::PeerId;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::Instant;

/// Dequeue priority. Higher variants are dialed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DialPriority {
    /// Peers learned through discovery
    Discovered,
    /// Bootnodes and explicit join requests
    High,
}

/// A queued, retryable outbound connection attempt
#[derive(Debug, Clone)]
pub struct DialTask {
    pub info: AddrInfo,
    pub priority: DialPriority,
    pub attempts: u32,
    pub next_eligible: Instant,
}

impl DialTask {
    pub fn new(info: AddrInfo, priority: DialPriority) -> Self {
        Self {
            info,
            priority,
            attempts: 0,
            next_eligible: Instant::now(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.info.id
    }

    /// Backoff before the next attempt: `base * 2^(attempts-1)`, capped at
    /// `max`. Never decreases as attempts grow.
    pub fn backoff(&self, base: Duration, max: Duration) -> Duration {
        if self.attempts == 0 {
            return Duration::ZERO;
        }
        let exp = (self.attempts - 1).min(31);
        base.saturating_mul(1u32 << exp).min(max)
    }

    /// Record a failed attempt and push the next-eligible time out.
    /// Returns false once `max_attempts` is reached and the task should be
    /// abandoned.
    pub fn record_failure(&mut self, base: Duration, max: Duration, max_attempts: u32) -> bool {
        self.attempts += 1;
        if self.attempts >= max_attempts {
            return false;
        }
        self.next_eligible = Instant::now() + self.backoff(base, max);
        true
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ReadyEntry {
    priority: DialPriority,
    seq: Reverse<u64>,
    peer: PeerId,
    generation: u64,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: HashMap<PeerId, (DialTask, u64)>,
    ready: BinaryHeap<ReadyEntry>,
    delayed: BinaryHeap<Reverse<(Instant, u64, PeerId, u64)>>,
    in_flight: HashSet<PeerId>,
    seq: u64,
    generation: u64,
}

impl QueueState {
    fn insert(&mut self, task: DialTask, now: Instant) {
        self.seq += 1;
        self.generation += 1;
        let peer = task.peer_id();
        if task.next_eligible <= now {
            self.ready.push(ReadyEntry {
                priority: task.priority,
                seq: Reverse(self.seq),
                peer,
                generation: self.generation,
            });
        } else {
            self.delayed
                .push(Reverse((task.next_eligible, self.seq, peer, self.generation)));
        }
        self.tasks.insert(peer, (task, self.generation));
    }

    fn is_current(&self, peer: &PeerId, generation: u64) -> bool {
        matches!(self.tasks.get(peer), Some((_, g)) if *g == generation)
    }

    fn promote(&mut self, now: Instant) {
        while let Some(Reverse((at, seq, peer, generation))) = self.delayed.peek().copied() {
            if at > now {
                break;
            }
            self.delayed.pop();
            if let Some((task, g)) = self.tasks.get(&peer) {
                if *g == generation {
                    self.ready.push(ReadyEntry {
                        priority: task.priority,
                        seq: Reverse(seq),
                        peer,
                        generation,
                    });
                }
            }
        }
    }

    fn pop_ready(&mut self, now: Instant) -> Option<DialTask> {
        self.promote(now);
        while let Some(entry) = self.ready.pop() {
            if !self.is_current(&entry.peer, entry.generation) {
                continue;
            }
            if let Some((task, _)) = self.tasks.remove(&entry.peer) {
                self.in_flight.insert(entry.peer);
                return Some(task);
            }
        }
        None
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, _, peer, generation))) = self.delayed.peek().copied() {
            if self.is_current(&peer, generation) {
                return Some(at);
            }
            self.delayed.pop();
        }
        None
    }
}

/// Prioritized queue of pending dials, safe for many producers and workers.
///
/// `AddedToDialQueue` is emitted while the new task is still invisible to
/// workers, so it always precedes the events of the dial itself.
#[derive(Debug)]
pub struct DialQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    events: Arc<EventBus>,
}

impl DialQueue {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            events,
        }
    }

    /// Queue a new task. Returns false when the identity is already queued
    /// or being dialed.
    pub async fn push(&self, task: DialTask) -> bool {
        let mut state = self.state.lock().await;
        let peer = task.peer_id();
        if state.tasks.contains_key(&peer) || state.in_flight.contains(&peer) {
            return false;
        }
        self.events
            .emit(PeerEvent::new(peer, PeerEventType::AddedToDialQueue));
        state.insert(task, Instant::now());
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Queue a task, replacing any queued task for the same identity with
    /// fresh attempt and backoff state. Returns false only when the
    /// identity is currently being dialed.
    pub async fn reseed(&self, info: AddrInfo, priority: DialPriority) -> bool {
        let mut state = self.state.lock().await;
        if state.in_flight.contains(&info.id) {
            return false;
        }
        let priority = match state.tasks.get(&info.id) {
            Some((existing, _)) => existing.priority.max(priority),
            None => {
                self.events
                    .emit(PeerEvent::new(info.id, PeerEventType::AddedToDialQueue));
                priority
            }
        };
        state.insert(DialTask::new(info, priority), Instant::now());
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Put a failed task back to wait out its backoff
    pub async fn requeue(&self, task: DialTask) {
        let mut state = self.state.lock().await;
        let peer = task.peer_id();
        state.in_flight.remove(&peer);
        if !state.tasks.contains_key(&peer) {
            state.insert(task, Instant::now());
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Mark an in-flight task as finished for good
    pub async fn complete(&self, peer: &PeerId) {
        self.state.lock().await.in_flight.remove(peer);
    }

    /// Take the highest-priority task that is eligible now
    pub async fn pop_ready(&self) -> Option<DialTask> {
        self.state.lock().await.pop_ready(Instant::now())
    }

    /// Wait for an eligible task. Returns `None` once `shutdown` flips.
    pub async fn pop(&self, shutdown: &mut watch::Receiver<bool>) -> Option<DialTask> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock().await;
                if let Some(task) = state.pop_ready(Instant::now()) {
                    return Some(task);
                }
                state.next_deadline()
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until_opt(deadline) => {}
                _ = crate::network::transport::signalled(shutdown) => return None,
            }
        }
    }

    /// Whether the identity is queued or being dialed
    pub async fn contains(&self, peer: &PeerId) -> bool {
        let state = self.state.lock().await;
        state.tasks.contains_key(peer) || state.in_flight.contains(peer)
    }

    /// Number of queued (not in flight) tasks
    pub async fn len(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    /// Attempt count of a queued task
    pub async fn attempts(&self, peer: &PeerId) -> Option<u32> {
        self.state
            .lock()
            .await
            .tasks
            .get(peer)
            .map(|(task, _)| task.attempts)
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
