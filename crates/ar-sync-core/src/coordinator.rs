//! Coordinator actor.
//!
//! One task owns the registrar, relay, anchor lifecycle and membership state.
//! Transport and engine callbacks are turned into [`Command`]s and queued on an
//! unbounded channel through a [`CoordinatorHandle`]; the actor processes them
//! one at a time, in arrival order. Effect timers post their expiries onto a
//! second channel that the run loop selects alongside the command queue.

use crate::anchors::{AddedOutcome, AnchorLifecycle, EffectExpiry};
use crate::config::SyncConfig;
use crate::engine::TrackingEngine;
use crate::events::{EventBus, SessionEvent};
use crate::index::SessionUpdate;
use crate::membership::{Admission, Membership};
use crate::protocol::{CollaborationPayload, InboundMessage, SessionAnnouncement};
use crate::registrar::SessionRegistrar;
use crate::relay::{CollaborationRelay, RelayOutcome, RelayStats};
use crate::scene::Scene;
use crate::transport::Transport;
use crate::{Anchor, AnchorId, CorrelationToken, PeerHandle, Pose, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Coordinator has shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Snapshot of coordinator state, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub local_session: Option<SessionId>,
    pub peer_sessions: HashMap<PeerHandle, SessionId>,
    pub joined_peers: Vec<PeerHandle>,
    pub pending_placements: usize,
    pub shown_anchors: usize,
    pub relay: RelayStats,
}

enum Command {
    PeerDiscovered {
        peer: PeerHandle,
        reply: oneshot::Sender<bool>,
    },
    PeerJoined {
        peer: PeerHandle,
    },
    PeerLeft {
        peer: PeerHandle,
    },
    DataReceived {
        peer: PeerHandle,
        data: Vec<u8>,
    },
    LocalSessionChanged {
        session: SessionId,
    },
    LocalPayloadProduced {
        payload: CollaborationPayload,
    },
    AnchorAdded {
        anchor: Anchor,
    },
    AnchorsRemoved {
        ids: Vec<AnchorId>,
    },
    PlaceEffect {
        model: String,
        pose: Pose,
        reply: oneshot::Sender<CorrelationToken>,
    },
    Status {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
    Shutdown,
}

/// Cloneable entry point for transport and engine callbacks.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: Arc<EventBus>,
}

impl CoordinatorHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| CoordinatorError::Closed)
    }

    /// Admission decision for a discovered peer. A stopped coordinator
    /// rejects everyone.
    pub async fn peer_discovered(&self, peer: PeerHandle) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::PeerDiscovered { peer, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn peer_joined(&self, peer: PeerHandle) -> Result<()> {
        self.send(Command::PeerJoined { peer })
    }

    pub fn peer_left(&self, peer: PeerHandle) -> Result<()> {
        self.send(Command::PeerLeft { peer })
    }

    /// Raw bytes received from a peer.
    pub fn data_received(&self, peer: PeerHandle, data: Vec<u8>) -> Result<()> {
        self.send(Command::DataReceived { peer, data })
    }

    pub fn local_session_changed(&self, session: SessionId) -> Result<()> {
        self.send(Command::LocalSessionChanged { session })
    }

    pub fn local_payload_produced(&self, payload: CollaborationPayload) -> Result<()> {
        self.send(Command::LocalPayloadProduced { payload })
    }

    pub fn anchor_added(&self, anchor: Anchor) -> Result<()> {
        self.send(Command::AnchorAdded { anchor })
    }

    pub fn anchors_removed(&self, ids: Vec<AnchorId>) -> Result<()> {
        self.send(Command::AnchorsRemoved { ids })
    }

    /// Place a transient effect. The returned token identifies the pending
    /// request until the engine confirms it.
    pub async fn place_effect(&self, model: impl Into<String>, pose: Pose) -> Result<CorrelationToken> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::PlaceEffect {
            model: model.into(),
            pose,
            reply,
        })?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }

    /// Snapshot of coordinator state. Since commands are processed in order,
    /// the snapshot reflects every command sent before it.
    pub async fn status(&self) -> Result<CoordinatorStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply })?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }

    pub async fn peer_sessions(&self) -> Result<HashMap<PeerHandle, SessionId>> {
        Ok(self.status().await?.peer_sessions)
    }

    pub async fn pending_placements(&self) -> Result<usize> {
        Ok(self.status().await?.pending_placements)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }
}

/// The synchronization core for one device.
pub struct Coordinator<T, E, S> {
    config: SyncConfig,
    transport: T,
    engine: E,
    scene: S,
    registrar: SessionRegistrar,
    relay: CollaborationRelay,
    anchors: AnchorLifecycle,
    membership: Membership,
    events: Arc<EventBus>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    expiry_rx: mpsc::UnboundedReceiver<EffectExpiry>,
}

impl<T, E, S> Coordinator<T, E, S>
where
    T: Transport + 'static,
    E: TrackingEngine + 'static,
    S: Scene + 'static,
{
    pub fn new(config: SyncConfig, transport: T, engine: E, scene: S) -> (Self, CoordinatorHandle) {
        let (tx, command_rx) = mpsc::unbounded_channel();
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventBus::new());

        let coordinator = Self {
            registrar: SessionRegistrar::new(engine.local_session_id()),
            relay: CollaborationRelay::new(),
            anchors: AnchorLifecycle::new(&config, expiry_tx),
            membership: Membership::new(config.max_peers),
            events: Arc::clone(&events),
            config,
            transport,
            engine,
            scene,
            command_rx,
            expiry_rx,
        };
        (coordinator, CoordinatorHandle { tx, events })
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Run the actor on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("Coordinator running ({})", self.config.service_name);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.on_command(command).await,
                    }
                }
                Some(expiry) = self.expiry_rx.recv() => {
                    self.on_effect_expired(expiry);
                }
            }
        }

        self.anchors.shutdown();
        debug!("Coordinator stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::PeerDiscovered { peer, reply } => {
                let accepted = self.on_peer_discovered(peer);
                let _ = reply.send(accepted);
            }
            Command::PeerJoined { peer } => self.on_peer_joined(peer).await,
            Command::PeerLeft { peer } => self.on_peer_left(peer),
            Command::DataReceived { peer, data } => self.on_data_received(peer, &data),
            Command::LocalSessionChanged { session } => {
                self.on_local_session_changed(session).await
            }
            Command::LocalPayloadProduced { payload } => {
                self.on_local_payload_produced(payload).await
            }
            Command::AnchorAdded { anchor } => self.on_anchor_added(anchor),
            Command::AnchorsRemoved { ids } => {
                self.anchors.on_anchors_removed(&ids, &self.scene);
            }
            Command::PlaceEffect { model, pose, reply } => {
                let token = self.anchors.place_ephemeral_anchor(model, pose, &self.engine);
                let _ = reply.send(token);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => {}
        }
    }

    fn status(&self) -> CoordinatorStatus {
        let mut joined_peers = self.membership.joined_peers();
        joined_peers.sort();
        CoordinatorStatus {
            local_session: self.registrar.local_session(),
            peer_sessions: self.registrar.index().snapshot(),
            joined_peers,
            pending_placements: self.anchors.pending_count(),
            shown_anchors: self.anchors.shown_count(),
            relay: self.relay.stats(),
        }
    }

    // ==================== Membership ====================

    fn on_peer_discovered(&mut self, peer: PeerHandle) -> bool {
        let connected = self.transport.connected_peers().len();
        match self.membership.admit(connected) {
            Admission::Accepted => {
                info!("Admitting peer {} ({} connected)", peer, connected);
                self.events.emit(SessionEvent::PeerAdmitted { peer, connected });
                true
            }
            Admission::Rejected {
                connected,
                capacity,
            } => {
                info!(
                    "Rejecting peer {}: session full ({}/{})",
                    peer, connected, capacity
                );
                self.events.emit(SessionEvent::PeerRejected {
                    peer,
                    connected,
                    capacity,
                });
                false
            }
        }
    }

    async fn on_peer_joined(&mut self, peer: PeerHandle) {
        info!("Peer joined: {}", peer);

        // A leave we never saw: the old session's anchors are stale
        if let Some(stale) = self.registrar.on_peer_left(peer) {
            warn!("Peer {} rejoined while still mapped to {}", peer, stale);
            self.purge_session(stale);
        }

        self.membership.joined(peer);
        self.events.emit(SessionEvent::PeerJoined { peer });

        if let Some(session) = self.registrar.on_peer_joined(peer, &self.transport).await {
            debug!("Sent session {} to {}", session, peer);
            self.events
                .emit(SessionEvent::IdentityAnnounced { session, peers: 1 });
        }
    }

    fn on_peer_left(&mut self, peer: PeerHandle) {
        let phase = self.membership.left(peer);
        let session = self.registrar.on_peer_left(peer);

        if phase.is_none() && session.is_none() {
            debug!("Leave for unknown peer {}, ignoring", peer);
            return;
        }

        info!("Peer left: {}", peer);
        if let Some(session) = session {
            self.purge_session(session);
        }
        self.events.emit(SessionEvent::PeerLeft { peer, session });
    }

    fn purge_session(&mut self, session: SessionId) {
        let removed = self
            .anchors
            .remove_anchors_of(session, &self.engine, &self.scene);
        self.events
            .emit(SessionEvent::AnchorsPurged { session, removed });
    }

    // ==================== Inbound ====================

    fn on_data_received(&mut self, peer: PeerHandle, data: &[u8]) {
        if !self.membership.is_joined(&peer) {
            debug!("Dropping {} byte message from non-joined peer {}", data.len(), peer);
            self.reject(peer, "peer not joined".to_string());
            return;
        }

        match InboundMessage::decode_with_limit(data, self.config.max_message_size) {
            Ok(InboundMessage::Announcement(announcement)) => {
                self.on_announcement(peer, announcement)
            }
            Ok(InboundMessage::Collaboration(payload)) => {
                let size = payload.len();
                let priority = payload.priority;
                self.relay.merge_remote(peer, payload, &self.engine);
                self.events.emit(SessionEvent::PayloadMerged {
                    peer,
                    size,
                    priority,
                });
            }
            Err(e) => {
                warn!("Ignoring message from {}: {}", peer, e);
                self.reject(peer, e.to_string());
            }
        }
    }

    fn on_announcement(&mut self, peer: PeerHandle, announcement: SessionAnnouncement) {
        let session = announcement.session_id;
        self.membership.announced(peer);

        let replaced = match self.registrar.classify(peer, session) {
            SessionUpdate::Unchanged => {
                debug!("Peer {} re-announced {}", peer, session);
                return;
            }
            SessionUpdate::New => None,
            SessionUpdate::Replaced(old) => {
                info!("Peer {} changed session {} -> {}", peer, old, session);
                self.purge_session(old);
                Some(old)
            }
        };

        self.registrar.record(peer, session);
        info!("Peer {} is session {}", peer, session);
        self.events.emit(SessionEvent::IdentityLearned {
            peer,
            session,
            replaced,
        });
    }

    fn reject(&self, peer: PeerHandle, reason: String) {
        self.events
            .emit(SessionEvent::MessageRejected { peer, reason });
    }

    // ==================== Engine callbacks ====================

    async fn on_local_session_changed(&mut self, session: SessionId) {
        info!("Local session is now {}", session);
        let peers = self
            .registrar
            .on_local_session_changed(session, &self.transport)
            .await;
        self.events
            .emit(SessionEvent::IdentityAnnounced { session, peers });
    }

    async fn on_local_payload_produced(&mut self, payload: CollaborationPayload) {
        let size = payload.len();
        match self.relay.relay_local(&payload, &self.transport).await {
            RelayOutcome::Dropped => {
                self.events.emit(SessionEvent::PayloadDropped { size });
            }
            RelayOutcome::Sent { peers, delivery } => {
                self.events.emit(SessionEvent::PayloadSent {
                    size,
                    reliable: delivery.is_reliable(),
                    peers,
                });
            }
            RelayOutcome::Failed => {}
        }
    }

    fn on_anchor_added(&mut self, anchor: Anchor) {
        match self.anchors.on_anchor_added(&anchor, &self.scene) {
            AddedOutcome::EffectShown => {
                self.events
                    .emit(SessionEvent::EffectShown { anchor: anchor.id });
            }
            AddedOutcome::ParticipantShown => {
                self.events
                    .emit(SessionEvent::ParticipantShown { anchor: anchor.id });
            }
            AddedOutcome::Ignored => {}
        }
    }

    fn on_effect_expired(&mut self, expiry: EffectExpiry) {
        if self
            .anchors
            .on_effect_expired(expiry, &self.engine, &self.scene)
        {
            self.events.emit(SessionEvent::EffectExpired {
                anchor: expiry.anchor,
            });
        }
    }
}
