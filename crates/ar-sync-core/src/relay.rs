//! Collaboration relay.
//!
//! Moves the tracking engine's opaque mapping payloads between devices.
//! Outbound payloads go to every connected peer, reliably when the engine
//! marked them critical and best-effort otherwise. Nothing is buffered: a
//! payload produced while alone is dropped, and late joiners are brought up
//! to date by the engine itself.

use crate::engine::TrackingEngine;
use crate::protocol::{CollaborationPayload, Priority};
use crate::transport::{Delivery, Transport};
use crate::PeerHandle;
use tracing::{debug, warn};

/// Delivery mode for a payload priority.
pub fn delivery_for(priority: Priority) -> Delivery {
    match priority {
        Priority::Critical => Delivery::Reliable,
        Priority::Normal => Delivery::BestEffort,
    }
}

/// What happened to an outbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// No peers connected
    Dropped,
    Sent { peers: usize, delivery: Delivery },
    /// The transport refused the send
    Failed,
}

/// Running totals, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub sent: u64,
    pub dropped: u64,
    pub failed: u64,
    pub merged: u64,
}

#[derive(Debug, Default)]
pub struct CollaborationRelay {
    stats: RelayStats,
}

impl CollaborationRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Broadcast a payload the local engine produced.
    ///
    /// Panics if the payload cannot be encoded; see [`CollaborationPayload::encode`].
    pub async fn relay_local<T: Transport + ?Sized>(
        &mut self,
        payload: &CollaborationPayload,
        transport: &T,
    ) -> RelayOutcome {
        let peers = transport.connected_peers();
        if peers.is_empty() {
            debug!(
                "Dropping {} byte collaboration payload, no peers connected",
                payload.len()
            );
            self.stats.dropped += 1;
            return RelayOutcome::Dropped;
        }

        let delivery = delivery_for(payload.priority);
        let bytes = payload.encode();
        match transport.send(&bytes, delivery, &peers).await {
            Ok(()) => {
                self.stats.sent += 1;
                RelayOutcome::Sent {
                    peers: peers.len(),
                    delivery,
                }
            }
            Err(e) if e.delivered() > 0 => {
                warn!("Collaboration payload only partly relayed: {}", e);
                self.stats.sent += 1;
                RelayOutcome::Sent {
                    peers: e.delivered(),
                    delivery,
                }
            }
            Err(e) => {
                warn!("Failed to relay collaboration payload: {}", e);
                self.stats.failed += 1;
                RelayOutcome::Failed
            }
        }
    }

    /// Hand a payload received from `peer` to the engine for merging.
    pub fn merge_remote<E: TrackingEngine + ?Sized>(
        &mut self,
        peer: PeerHandle,
        payload: CollaborationPayload,
        engine: &E,
    ) {
        debug!(
            "Merging {} byte {:?} payload from {}",
            payload.len(),
            payload.priority,
            peer
        );
        self.stats.merged += 1;
        engine.merge_collaboration(payload);
    }
}
