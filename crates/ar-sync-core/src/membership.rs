//! Peer membership: admission policy and per-peer lifecycle.
//!
//! Each peer moves through
//! `Discovered -> Accepted -> Joined -> Announced -> Left`, where
//! `Discovered -> Rejected` (capacity) and `Joined -> Left` (never announced)
//! are also terminal. Admission is a pure capacity check: only joined peers
//! are tracked, since an accepted peer that never connects gets no leave.
//! Terminal peers are forgotten, so a handle reused by the transport starts
//! over from scratch.

use crate::PeerHandle;
use std::collections::HashMap;

/// Default maximum number of simultaneously connected peers.
pub const DEFAULT_MAX_PEERS: usize = 4;

/// Lifecycle phase of a live peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    /// Connected, no identity announced yet
    Joined,
    /// Connected and announced at least one session
    Announced,
}

/// Outcome of the admission check at discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected { connected: usize, capacity: usize },
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Membership controller state.
#[derive(Debug)]
pub struct Membership {
    capacity: usize,
    phases: HashMap<PeerHandle, PeerPhase>,
}

impl Membership {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            phases: HashMap::new(),
        }
    }

    /// Decide whether a discovered peer may connect, given how many peers
    /// are connected right now. Hard cap: no queueing of rejected peers.
    pub fn admit(&self, connected: usize) -> Admission {
        if connected >= self.capacity {
            return Admission::Rejected {
                connected,
                capacity: self.capacity,
            };
        }
        Admission::Accepted
    }

    /// Record a join. A join always (re)starts the peer at `Joined`.
    pub fn joined(&mut self, peer: PeerHandle) {
        self.phases.insert(peer, PeerPhase::Joined);
    }

    /// Record an identity announcement. Returns false if the peer is not
    /// joined, in which case the announcement is stale and must be ignored.
    pub fn announced(&mut self, peer: PeerHandle) -> bool {
        match self.phases.get_mut(&peer) {
            Some(phase) => {
                *phase = PeerPhase::Announced;
                true
            }
            None => false,
        }
    }

    /// Record a leave. Returns the phase the peer was in, or `None` if the
    /// peer was unknown (never joined, or already left).
    pub fn left(&mut self, peer: PeerHandle) -> Option<PeerPhase> {
        self.phases.remove(&peer)
    }

    /// Number of tracked peers.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phase(&self, peer: &PeerHandle) -> Option<PeerPhase> {
        self.phases.get(peer).copied()
    }

    /// Whether messages from this peer should be processed.
    pub fn is_joined(&self, peer: &PeerHandle) -> bool {
        self.phases.contains_key(peer)
    }

    /// Peers that have joined and not left.
    pub fn joined_peers(&self) -> Vec<PeerHandle> {
        self.phases.keys().copied().collect()
    }
}

impl Default for Membership {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PEERS)
    }
}
