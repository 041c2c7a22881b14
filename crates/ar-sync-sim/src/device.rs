//! Simulated AR device.
//!
//! A device is an [`InMemoryEngine`], an [`InMemoryScene`] and a coordinator
//! wired to a [`LoopbackNetwork`]. The engine half of the collaboration is
//! modelled here: a device publishes its local anchors as a JSON [`MapUpdate`]
//! inside the opaque collaboration payload, and [`SimDevice::pump`] plays the
//! engine's merge on the receiving side by inserting those anchors with the
//! sender's session as origin.

use crate::loopback::{LoopbackError, LoopbackNetwork};
use ar_sync_core::{
    Anchor, AnchorId, AnchorKind, CollaborationPayload, Coordinator, CoordinatorError,
    CoordinatorHandle, CoordinatorStatus, CorrelationToken, InMemoryEngine, InMemoryScene,
    PeerHandle, Pose, Priority, SessionEvent, SessionId, Subscription, SyncConfig,
    TrackingEngine,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Model shown for tap effects.
pub const TAP_MODEL: &str = "lasergreen";

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Network(#[from] LoopbackError),

    #[error("Placement {0} was never confirmed")]
    Unconfirmed(CorrelationToken),
}

pub type Result<T> = std::result::Result<T, SimError>;

/// Simulated mapping update carried inside a collaboration payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapUpdate {
    pub session: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<Anchor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<AnchorId>,
    /// Feature points in this update; bulk data only
    #[serde(default)]
    pub features: usize,
}

impl MapUpdate {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("MapUpdate serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

pub struct SimDevice {
    name: String,
    peer: PeerHandle,
    handle: CoordinatorHandle,
    engine: Arc<InMemoryEngine>,
    scene: Arc<InMemoryScene>,
    task: JoinHandle<()>,
    participant: AnchorId,
    /// Local anchors peers have been told about
    published: HashSet<AnchorId>,
    removals_seen: usize,
    merged_seen: usize,
    subscriptions: Vec<Subscription>,
}

impl SimDevice {
    /// Create a device on `network` and start its coordinator.
    pub fn start(name: impl Into<String>, network: &LoopbackNetwork, config: SyncConfig) -> Result<Self> {
        let name = name.into();
        let transport = network.transport();
        let peer = transport.local_peer();

        let engine = Arc::new(InMemoryEngine::new());
        let participant = Anchor::local(AnchorKind::Participant, Pose::IDENTITY);
        let participant_id = participant.id;
        engine.insert_anchor(participant);

        let scene = Arc::new(InMemoryScene::new());
        let (coordinator, handle) =
            Coordinator::new(config, transport, Arc::clone(&engine), Arc::clone(&scene));
        network.attach(peer, handle.clone())?;
        let task = coordinator.spawn();

        info!("Device {} started as {}", name, peer);
        Ok(Self {
            name,
            peer,
            handle,
            engine,
            scene,
            task,
            participant: participant_id,
            published: HashSet::new(),
            removals_seen: 0,
            merged_seen: 0,
            subscriptions: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer(&self) -> PeerHandle {
        self.peer
    }

    pub fn handle(&self) -> &CoordinatorHandle {
        &self.handle
    }

    pub fn engine(&self) -> &InMemoryEngine {
        &self.engine
    }

    pub fn scene(&self) -> &InMemoryScene {
        &self.scene
    }

    pub fn participant(&self) -> AnchorId {
        self.participant
    }

    pub fn session(&self) -> Option<SessionId> {
        self.engine.local_session_id()
    }

    /// Forward this device's session events to `observer`.
    pub fn observe(&mut self, observer: impl Fn(&str, &SessionEvent) + Send + Sync + 'static) {
        let name = self.name.clone();
        let subscription = self
            .handle
            .events()
            .subscribe(move |event| observer(&name, event));
        self.subscriptions.push(subscription);
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        Ok(self.handle.status().await?)
    }

    /// Tap the screen: place an effect and let the engine confirm it.
    pub async fn tap(&mut self, pose: Pose) -> Result<AnchorId> {
        let token = self.handle.place_effect(TAP_MODEL, pose).await?;

        let mut placed = None;
        for anchor in self.engine.confirm_requests() {
            if anchor.request == Some(token) {
                placed = Some(anchor.id);
            }
            self.handle.anchor_added(anchor)?;
        }
        placed.ok_or(SimError::Unconfirmed(token))
    }

    /// Publish local anchor additions and removals since the last flush.
    /// Returns false when there was nothing to publish.
    pub fn flush(&mut self) -> Result<bool> {
        let removals = self.engine.removal_calls();
        let removed: Vec<AnchorId> = removals[self.removals_seen.min(removals.len())..]
            .iter()
            .filter(|id| self.published.remove(*id))
            .copied()
            .collect();
        self.removals_seen = removals.len();

        let anchors: Vec<Anchor> = self
            .engine
            .anchors()
            .into_iter()
            .filter(|a| a.is_local() && !self.published.contains(&a.id))
            .collect();
        self.published.extend(anchors.iter().map(|a| a.id));

        if anchors.is_empty() && removed.is_empty() {
            return Ok(false);
        }

        debug!(
            "{} publishing {} anchor(s), {} removal(s)",
            self.name,
            anchors.len(),
            removed.len()
        );
        let update = MapUpdate {
            session: self.session(),
            anchors,
            removed,
            features: 0,
        };
        self.handle
            .local_payload_produced(CollaborationPayload::new(update.to_bytes(), Priority::Critical))?;
        Ok(true)
    }

    /// Stream bulk feature points. Loss is tolerated.
    pub fn stream_features(&self, features: usize) -> Result<()> {
        let update = MapUpdate {
            session: self.session(),
            features,
            ..Default::default()
        };
        self.handle
            .local_payload_produced(CollaborationPayload::new(update.to_bytes(), Priority::Normal))?;
        Ok(())
    }

    /// Apply payloads merged since the last pump, as the engine would.
    /// Returns the number of updates applied.
    pub fn pump(&mut self) -> Result<usize> {
        let merged = self.engine.merged();
        let fresh = &merged[self.merged_seen.min(merged.len())..];
        self.merged_seen = merged.len();

        let mut applied = 0;
        for payload in fresh {
            let update = match MapUpdate::from_bytes(&payload.data) {
                Ok(update) => update,
                Err(e) => {
                    warn!("{} could not merge payload: {}", self.name, e);
                    continue;
                }
            };
            applied += 1;

            let Some(origin) = update.session else {
                continue;
            };
            for anchor in update.anchors {
                if self.engine.contains(anchor.id) {
                    continue;
                }
                let anchor = Anchor {
                    origin: Some(origin),
                    request: None,
                    ..anchor
                };
                self.engine.insert_anchor(anchor.clone());
                self.handle.anchor_added(anchor)?;
            }

            let removed: Vec<AnchorId> = update
                .removed
                .into_iter()
                .filter(|id| self.engine.contains(*id))
                .collect();
            if !removed.is_empty() {
                for id in &removed {
                    self.engine.remove_anchor(*id);
                }
                self.handle.anchors_removed(removed)?;
            }
        }
        Ok(applied)
    }

    /// Restart tracking with a fresh session. Local anchors are republished
    /// under the new session on the next flush.
    pub fn reset_tracking(&mut self) -> Result<SessionId> {
        let session = self.engine.rotate_session();
        info!("{} reset tracking, new session {}", self.name, session);
        self.handle.local_session_changed(session)?;
        self.published.clear();
        Ok(session)
    }

    /// Drop off the network and stop the coordinator.
    pub async fn leave(self, network: &LoopbackNetwork) {
        info!("Device {} leaving", self.name);
        network.remove(self.peer);
        let _ = self.handle.shutdown();
        if let Err(e) = self.task.await {
            error!("Coordinator task for {} failed: {}", self.name, e);
        }
    }
}

/// Wait until every device has processed everything queued so far,
/// including messages those commands sent on to other devices.
pub async fn settle(devices: &[SimDevice]) -> Result<()> {
    for _ in 0..2 {
        let results =
            futures::future::join_all(devices.iter().map(|device| device.handle.status())).await;
        for result in results {
            result?;
        }
    }
    Ok(())
}
