//! Session events for monitoring and diagnostics.
//!
//! The coordinator publishes a [`SessionEvent`] for every decision it makes.
//! Subscribers register a callback on an [`EventBus`] and keep the returned
//! [`Subscription`]; dropping it unsubscribes.

use crate::{AnchorId, PeerHandle, SessionId};
use crate::protocol::Priority;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Discovered peer admitted.
    PeerAdmitted { peer: PeerHandle, connected: usize },
    /// Discovered peer turned away because the session is full.
    PeerRejected {
        peer: PeerHandle,
        connected: usize,
        capacity: usize,
    },
    PeerJoined { peer: PeerHandle },
    /// Peer left; `session` is the one it had announced, if any.
    PeerLeft {
        peer: PeerHandle,
        session: Option<SessionId>,
    },
    /// Our session ID was sent to `peers` peers.
    IdentityAnnounced { session: SessionId, peers: usize },
    /// A peer announced its session.
    IdentityLearned {
        peer: PeerHandle,
        session: SessionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        replaced: Option<SessionId>,
    },
    /// Anchors attributed to a session were removed.
    AnchorsPurged { session: SessionId, removed: usize },
    /// Local payload broadcast to peers.
    PayloadSent {
        size: usize,
        reliable: bool,
        peers: usize,
    },
    /// Local payload dropped because no peers were connected.
    PayloadDropped { size: usize },
    /// Payload from a peer handed to the engine.
    PayloadMerged {
        peer: PeerHandle,
        size: usize,
        priority: Priority,
    },
    /// Inbound message ignored.
    MessageRejected { peer: PeerHandle, reason: String },
    EffectShown { anchor: AnchorId },
    EffectExpired { anchor: AnchorId },
    ParticipantShown { anchor: AnchorId },
}

type Callback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing session events. Wrap in `Arc` to subscribe.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<BTreeMap<u64, Callback>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Events are delivered in subscription order.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(callback));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) {
        // try_write: Drop may run while emit holds the read lock during unwinding
        if let Ok(mut subscribers) = self.subscribers.try_write() {
            subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver an event to every subscriber.
    pub fn emit(&self, event: SessionEvent) {
        // Snapshot so callbacks may subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }
}
