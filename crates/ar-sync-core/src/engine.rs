//! TrackingEngine trait: the spatial-tracking engine as seen by the core.
//!
//! The engine owns the anchor set, the local session identity and the
//! map-merge algorithm. The core queries and removes anchors, requests new
//! ones, and feeds it collaboration payloads received from peers. Engine
//! callbacks (anchor added/removed, payload produced, session changed) reach
//! the core through a [`CoordinatorHandle`](crate::CoordinatorHandle).
//!
//! Implementations:
//! - `InMemoryEngine` - For testing and simulation

use crate::protocol::CollaborationPayload;
use crate::{Anchor, AnchorId, AnchorKind, AnchorRequest, Pose, SessionId};
use std::sync::RwLock;

/// Spatial-tracking engine abstraction.
pub trait TrackingEngine: Send + Sync {
    /// Current local session, `None` before tracking starts.
    fn local_session_id(&self) -> Option<SessionId>;

    /// Snapshot of all known anchors, `None` when no frame is available yet.
    fn current_anchors(&self) -> Option<Vec<Anchor>>;

    /// Remove an anchor from the shared world.
    fn remove_anchor(&self, id: AnchorId);

    /// Ask for an anchor to be created. Confirmation arrives later as an
    /// anchor-added callback carrying `request.token`.
    fn request_anchor(&self, request: AnchorRequest);

    /// Merge a payload received from a peer.
    fn merge_collaboration(&self, payload: CollaborationPayload);
}

impl<T: TrackingEngine + ?Sized> TrackingEngine for std::sync::Arc<T> {
    fn local_session_id(&self) -> Option<SessionId> {
        (**self).local_session_id()
    }

    fn current_anchors(&self) -> Option<Vec<Anchor>> {
        (**self).current_anchors()
    }

    fn remove_anchor(&self, id: AnchorId) {
        (**self).remove_anchor(id)
    }

    fn request_anchor(&self, request: AnchorRequest) {
        (**self).request_anchor(request)
    }

    fn merge_collaboration(&self, payload: CollaborationPayload) {
        (**self).merge_collaboration(payload)
    }
}

#[derive(Default)]
struct EngineState {
    session: Option<SessionId>,
    frame_available: bool,
    anchors: Vec<Anchor>,
    requests: Vec<AnchorRequest>,
    merged: Vec<CollaborationPayload>,
    removed: Vec<AnchorId>,
}

/// In-memory tracking engine for testing.
///
/// Requests are queued until [`confirm_requests`](Self::confirm_requests) is
/// called, which models the engine's asynchronous confirmation.
pub struct InMemoryEngine {
    state: RwLock<EngineState>,
}

impl InMemoryEngine {
    /// Engine with a running session and an available frame.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState {
                session: Some(SessionId::generate()),
                frame_available: true,
                ..Default::default()
            }),
        }
    }

    /// Engine that has not started tracking yet: no session, no frame.
    pub fn uninitialized() -> Self {
        Self {
            state: RwLock::new(EngineState::default()),
        }
    }

    /// Start tracking (or reset it), assigning a fresh session ID.
    pub fn rotate_session(&self) -> SessionId {
        let id = SessionId::generate();
        let mut state = self.write();
        state.session = Some(id);
        state.frame_available = true;
        id
    }

    pub fn set_frame_available(&self, available: bool) {
        self.write().frame_available = available;
    }

    /// Confirm all queued requests, returning the new anchors.
    pub fn confirm_requests(&self) -> Vec<Anchor> {
        let mut state = self.write();
        let requests = std::mem::take(&mut state.requests);
        let confirmed: Vec<Anchor> = requests.iter().map(Anchor::confirmed).collect();
        state.anchors.extend(confirmed.iter().cloned());
        confirmed
    }

    /// Insert an anchor contributed by another session (as a merge would).
    pub fn insert_remote_anchor(&self, origin: SessionId, kind: AnchorKind, pose: Pose) -> Anchor {
        let anchor = Anchor::remote(origin, kind, pose);
        self.write().anchors.push(anchor.clone());
        anchor
    }

    /// Insert an arbitrary anchor.
    pub fn insert_anchor(&self, anchor: Anchor) {
        self.write().anchors.push(anchor);
    }

    pub fn anchors(&self) -> Vec<Anchor> {
        self.read().anchors.clone()
    }

    pub fn contains(&self, id: AnchorId) -> bool {
        self.read().anchors.iter().any(|a| a.id == id)
    }

    pub fn pending_requests(&self) -> Vec<AnchorRequest> {
        self.read().requests.clone()
    }

    /// Payloads merged so far, in merge order.
    pub fn merged(&self) -> Vec<CollaborationPayload> {
        self.read().merged.clone()
    }

    /// IDs passed to `remove_anchor`, including ones that were already gone.
    pub fn removal_calls(&self) -> Vec<AnchorId> {
        self.read().removed.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingEngine for InMemoryEngine {
    fn local_session_id(&self) -> Option<SessionId> {
        self.read().session
    }

    fn current_anchors(&self) -> Option<Vec<Anchor>> {
        let state = self.read();
        state.frame_available.then(|| state.anchors.clone())
    }

    fn remove_anchor(&self, id: AnchorId) {
        let mut state = self.write();
        state.removed.push(id);
        state.anchors.retain(|a| a.id != id);
    }

    fn request_anchor(&self, request: AnchorRequest) {
        self.write().requests.push(request);
    }

    fn merge_collaboration(&self, payload: CollaborationPayload) {
        self.write().merged.push(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Priority;
    use crate::CorrelationToken;

    #[test]
    fn test_requests_confirm_asynchronously() {
        let engine = InMemoryEngine::new();
        let request = AnchorRequest {
            token: CorrelationToken::generate(),
            kind: AnchorKind::effect("lasergreen"),
            pose: Pose::IDENTITY,
        };
        engine.request_anchor(request.clone());
        assert!(engine.anchors().is_empty());

        let confirmed = engine.confirm_requests();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].request, Some(request.token));
        assert!(engine.contains(confirmed[0].id));
        assert!(engine.pending_requests().is_empty());
    }

    #[test]
    fn test_no_frame_means_no_snapshot() {
        let engine = InMemoryEngine::uninitialized();
        assert!(engine.current_anchors().is_none());
        assert!(engine.local_session_id().is_none());

        let id = engine.rotate_session();
        assert_eq!(engine.local_session_id(), Some(id));
        assert_eq!(engine.current_anchors(), Some(vec![]));
    }

    #[test]
    fn test_remove_records_every_call() {
        let engine = InMemoryEngine::new();
        let anchor =
            engine.insert_remote_anchor(SessionId::generate(), AnchorKind::Tracking, Pose::IDENTITY);

        engine.remove_anchor(anchor.id);
        engine.remove_anchor(anchor.id);

        assert!(!engine.contains(anchor.id));
        assert_eq!(engine.removal_calls(), vec![anchor.id, anchor.id]);
    }

    #[test]
    fn test_merge_records_payloads() {
        let engine = InMemoryEngine::new();
        engine.merge_collaboration(CollaborationPayload::new(vec![1], Priority::Normal));
        assert_eq!(engine.merged().len(), 1);
    }
}
