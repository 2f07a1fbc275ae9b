//! Connection slot accounting
//!
//! Two counters (inbound and outbound) bounded by a total limit and by an
//! optional per-direction sub-limit. Dial workers additionally reserve an
//! outbound slot for the duration of a dial so that a pool of workers
//! never starts more dials than there is outbound room for.

/// Direction of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Peer initiated this connection
    Inbound,
    /// We initiated this connection
    Outbound,
}

/// Capacity limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLimits {
    pub max_peers: usize,
    pub max_inbound: usize,
    pub max_outbound: usize,
}

impl SlotLimits {
    /// Limits where missing sub-limits default to the total
    pub fn new(max_peers: usize, max_inbound: Option<usize>, max_outbound: Option<usize>) -> Self {
        Self {
            max_peers,
            max_inbound: max_inbound.unwrap_or(max_peers).min(max_peers),
            max_outbound: max_outbound.unwrap_or(max_peers).min(max_peers),
        }
    }

    pub fn max_for(&self, direction: Direction) -> usize {
        match direction {
            Direction::Inbound => self.max_inbound,
            Direction::Outbound => self.max_outbound,
        }
    }
}

/// Used-slot counters
#[derive(Debug, Clone)]
pub struct Slots {
    limits: SlotLimits,
    inbound: usize,
    outbound: usize,
    dialing: usize,
}

impl Slots {
    pub fn new(limits: SlotLimits) -> Self {
        Self {
            limits,
            inbound: 0,
            outbound: 0,
            dialing: 0,
        }
    }

    pub fn used(&self, direction: Direction) -> usize {
        match direction {
            Direction::Inbound => self.inbound,
            Direction::Outbound => self.outbound,
        }
    }

    pub fn total(&self) -> usize {
        self.inbound + self.outbound
    }

    /// Dials currently holding a reservation
    pub fn dialing(&self) -> usize {
        self.dialing
    }

    /// Whether a connection in `direction` may be admitted right now
    pub fn has_free(&self, direction: Direction) -> bool {
        self.total() < self.limits.max_peers
            && self.used(direction) < self.limits.max_for(direction)
    }

    /// Take a slot. Returns false, changing nothing, when none is free.
    pub fn acquire(&mut self, direction: Direction) -> bool {
        if !self.has_free(direction) {
            return false;
        }
        match direction {
            Direction::Inbound => self.inbound += 1,
            Direction::Outbound => self.outbound += 1,
        }
        true
    }

    pub fn release(&mut self, direction: Direction) {
        match direction {
            Direction::Inbound => self.inbound = self.inbound.saturating_sub(1),
            Direction::Outbound => self.outbound = self.outbound.saturating_sub(1),
        }
    }

    /// Whether another dial may start, counting dials already in flight
    pub fn can_reserve_dial(&self) -> bool {
        self.total() + self.dialing < self.limits.max_peers
            && self.outbound + self.dialing < self.limits.max_outbound
    }

    pub fn reserve_dial(&mut self) -> bool {
        if !self.can_reserve_dial() {
            return false;
        }
        self.dialing += 1;
        true
    }

    pub fn release_dial(&mut self) {
        self.dialing = self.dialing.saturating_sub(1);
    }
}
