//! Anchor lifecycle: effect placement, participant markers and per-session
//! cleanup.
//!
//! Effect anchors are transient. A local placement is requested from the
//! engine with a fresh [`CorrelationToken`]; when the engine confirms it the
//! effect is shown and a removal timer starts. Timers are plain spawned sleeps
//! that report back through a channel owned by the coordinator, so every state
//! change still happens on the coordinator task.

use crate::config::SyncConfig;
use crate::engine::TrackingEngine;
use crate::scene::{Scene, Visual};
use crate::{Anchor, AnchorId, AnchorKind, AnchorRequest, CorrelationToken, Pose, SessionId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Sent by an effect timer when its anchor's lifetime is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectExpiry {
    pub anchor: AnchorId,
    /// Distinguishes a timer from a later reschedule for the same anchor
    pub generation: u64,
}

/// What `on_anchor_added` did with an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddedOutcome {
    /// Effect shown, removal scheduled
    EffectShown,
    /// Participant marker shown, kept until the anchor goes away
    ParticipantShown,
    /// Not ours to visualize
    Ignored,
}

struct PendingPlacement {
    model: String,
    requested_at: Instant,
}

struct ShownAnchor {
    origin: Option<SessionId>,
    timer: Option<(u64, JoinHandle<()>)>,
}

impl ShownAnchor {
    fn cancel_timer(&mut self) {
        if let Some((_, handle)) = self.timer.take() {
            handle.abort();
        }
    }
}

pub struct AnchorLifecycle {
    effect_lifetime: Duration,
    placement_timeout: Duration,
    pending: HashMap<CorrelationToken, PendingPlacement>,
    shown: HashMap<AnchorId, ShownAnchor>,
    next_generation: u64,
    expiry_tx: mpsc::UnboundedSender<EffectExpiry>,
}

impl AnchorLifecycle {
    pub fn new(config: &SyncConfig, expiry_tx: mpsc::UnboundedSender<EffectExpiry>) -> Self {
        Self {
            effect_lifetime: config.effect_lifetime(),
            placement_timeout: config.placement_timeout(),
            pending: HashMap::new(),
            shown: HashMap::new(),
            next_generation: 0,
            expiry_tx,
        }
    }

    /// Request an effect anchor at `pose`. The effect appears once the engine
    /// confirms the request through [`on_anchor_added`](Self::on_anchor_added).
    pub fn place_ephemeral_anchor<E: TrackingEngine + ?Sized>(
        &mut self,
        model: impl Into<String>,
        pose: Pose,
        engine: &E,
    ) -> CorrelationToken {
        self.purge_stale_placements();

        let model = model.into();
        let token = CorrelationToken::generate();
        self.pending.insert(
            token,
            PendingPlacement {
                model: model.clone(),
                requested_at: Instant::now(),
            },
        );
        engine.request_anchor(AnchorRequest {
            token,
            kind: AnchorKind::Effect { model },
            pose,
        });
        token
    }

    /// React to an anchor the engine just added.
    pub fn on_anchor_added<S: Scene + ?Sized>(&mut self, anchor: &Anchor, scene: &S) -> AddedOutcome {
        self.purge_stale_placements();

        match &anchor.kind {
            AnchorKind::Effect { model } => {
                let ours = anchor
                    .request
                    .and_then(|token| self.pending.remove(&token))
                    .is_some();

                if !ours && anchor.origin.is_none() {
                    debug!(
                        "Ignoring local effect anchor {} with no pending placement",
                        anchor.id
                    );
                    return AddedOutcome::Ignored;
                }

                scene.attach(
                    anchor.id,
                    Visual::Effect {
                        model: model.clone(),
                    },
                );
                self.schedule_expiry(anchor);
                AddedOutcome::EffectShown
            }
            AnchorKind::Participant => {
                info!("Participant anchor {} recognized", anchor.id);
                scene.attach(anchor.id, Visual::ParticipantMarker);
                if let Some(mut previous) = self.shown.insert(
                    anchor.id,
                    ShownAnchor {
                        origin: anchor.origin,
                        timer: None,
                    },
                ) {
                    previous.cancel_timer();
                }
                AddedOutcome::ParticipantShown
            }
            AnchorKind::Tracking => AddedOutcome::Ignored,
        }
    }

    fn schedule_expiry(&mut self, anchor: &Anchor) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let tx = self.expiry_tx.clone();
        let lifetime = self.effect_lifetime;
        let id = anchor.id;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(lifetime).await;
            let _ = tx.send(EffectExpiry {
                anchor: id,
                generation,
            });
        });

        let shown = ShownAnchor {
            origin: anchor.origin,
            timer: Some((generation, handle)),
        };
        if let Some(mut previous) = self.shown.insert(id, shown) {
            previous.cancel_timer();
        }
    }

    /// An effect timer fired. Returns true if the effect was taken down.
    ///
    /// Expiries for anchors that were already cleaned up, or that belong to
    /// an older schedule, are ignored.
    pub fn on_effect_expired<E: TrackingEngine + ?Sized, S: Scene + ?Sized>(
        &mut self,
        expiry: EffectExpiry,
        engine: &E,
        scene: &S,
    ) -> bool {
        let current = self
            .shown
            .get(&expiry.anchor)
            .and_then(|s| s.timer.as_ref())
            .map(|(generation, _)| *generation);
        if current != Some(expiry.generation) {
            debug!("Stale expiry for anchor {}, ignoring", expiry.anchor);
            return false;
        }

        let Some(shown) = self.shown.remove(&expiry.anchor) else {
            return false;
        };
        scene.detach(expiry.anchor);

        // Remote effects are removed by their owner and arrive via merge.
        // Without a snapshot the anchor may still be there, so remove anyway.
        if shown.origin.is_none() {
            let already_gone = engine
                .current_anchors()
                .is_some_and(|anchors| !anchors.iter().any(|a| a.id == expiry.anchor));
            if !already_gone {
                engine.remove_anchor(expiry.anchor);
            }
        }
        true
    }

    /// Remove every anchor created by `session`. Idempotent; anchors without
    /// an origin are never touched. Returns the number of anchors removed.
    pub fn remove_anchors_of<E: TrackingEngine + ?Sized, S: Scene + ?Sized>(
        &mut self,
        session: SessionId,
        engine: &E,
        scene: &S,
    ) -> usize {
        let Some(anchors) = engine.current_anchors() else {
            debug!("No anchor snapshot yet, skipping cleanup of session {}", session);
            return 0;
        };

        let mut removed = 0;
        for anchor in anchors.iter().filter(|a| a.belongs_to(&session)) {
            engine.remove_anchor(anchor.id);
            self.forget(anchor.id, scene);
            removed += 1;
        }

        // Visuals whose anchors the engine already dropped
        let orphaned: Vec<AnchorId> = self
            .shown
            .iter()
            .filter(|(_, s)| s.origin == Some(session))
            .map(|(id, _)| *id)
            .collect();
        for id in orphaned {
            self.forget(id, scene);
        }

        if removed > 0 {
            info!("Removed {} anchor(s) from session {}", removed, session);
        }
        removed
    }

    /// The engine removed anchors on its own.
    pub fn on_anchors_removed<S: Scene + ?Sized>(&mut self, ids: &[AnchorId], scene: &S) {
        for id in ids {
            self.forget(*id, scene);
        }
    }

    fn forget<S: Scene + ?Sized>(&mut self, id: AnchorId, scene: &S) {
        if let Some(mut shown) = self.shown.remove(&id) {
            shown.cancel_timer();
            scene.detach(id);
        }
    }

    fn purge_stale_placements(&mut self) {
        let timeout = self.placement_timeout;
        self.pending.retain(|token, placement| {
            let fresh = placement.requested_at.elapsed() <= timeout;
            if !fresh {
                debug!(
                    "Placement {} ({}) never confirmed, dropping",
                    token, placement.model
                );
            }
            fresh
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn shown_count(&self) -> usize {
        self.shown.len()
    }

    pub fn is_shown(&self, id: &AnchorId) -> bool {
        self.shown.contains_key(id)
    }

    /// Cancel all outstanding timers.
    pub fn shutdown(&mut self) {
        for shown in self.shown.values_mut() {
            shown.cancel_timer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;
    use crate::scene::InMemoryScene;

    fn setup() -> (
        AnchorLifecycle,
        mpsc::UnboundedReceiver<EffectExpiry>,
        InMemoryEngine,
        InMemoryScene,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            AnchorLifecycle::new(&SyncConfig::default(), tx),
            rx,
            InMemoryEngine::new(),
            InMemoryScene::new(),
        )
    }

    // ==================== Local placement ====================

    #[tokio::test(start_paused = true)]
    async fn test_placement_shows_effect_then_expires() {
        let (mut anchors, mut rx, engine, scene) = setup();

        let token = anchors.place_ephemeral_anchor("lasergreen", Pose::IDENTITY, &engine);
        assert_eq!(anchors.pending_count(), 1);
        assert!(scene.is_empty(), "nothing shown before confirmation");

        let confirmed = engine.confirm_requests();
        assert_eq!(confirmed[0].request, Some(token));
        assert_eq!(
            anchors.on_anchor_added(&confirmed[0], &scene),
            AddedOutcome::EffectShown
        );
        assert_eq!(anchors.pending_count(), 0);
        assert_eq!(
            scene.visual(confirmed[0].id),
            Some(Visual::Effect {
                model: "lasergreen".into()
            })
        );

        let expiry = rx.recv().await.unwrap();
        assert_eq!(expiry.anchor, confirmed[0].id);
        assert!(anchors.on_effect_expired(expiry, &engine, &scene));

        assert!(scene.is_empty());
        assert!(!engine.contains(confirmed[0].id));
        assert_eq!(anchors.shown_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_effect_not_removed_before_lifetime() {
        let (mut anchors, mut rx, engine, scene) = setup();
        anchors.place_ephemeral_anchor("lasergreen", Pose::IDENTITY, &engine);
        let confirmed = engine.confirm_requests();
        anchors.on_anchor_added(&confirmed[0], &scene);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unmatched_local_effect_is_ignored() {
        let (mut anchors, _rx, _engine, scene) = setup();
        let stray = Anchor::local(AnchorKind::effect("lasergreen"), Pose::IDENTITY);

        assert_eq!(anchors.on_anchor_added(&stray, &scene), AddedOutcome::Ignored);
        assert!(scene.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_confirmation_after_timeout_is_ignored() {
        let (mut anchors, _rx, engine, scene) = setup();
        anchors.place_ephemeral_anchor("lasergreen", Pose::IDENTITY, &engine);

        tokio::time::advance(Duration::from_secs(6)).await;
        let confirmed = engine.confirm_requests();

        assert_eq!(
            anchors.on_anchor_added(&confirmed[0], &scene),
            AddedOutcome::Ignored
        );
        assert_eq!(anchors.pending_count(), 0);
    }

    // ==================== Remote anchors ====================

    #[tokio::test]
    async fn test_remote_effect_shown_but_left_to_owner() {
        let (mut anchors, mut rx, engine, scene) = setup();
        let session = SessionId::generate();
        let remote =
            engine.insert_remote_anchor(session, AnchorKind::effect("laserred"), Pose::IDENTITY);

        assert_eq!(anchors.on_anchor_added(&remote, &scene), AddedOutcome::EffectShown);

        let expiry = rx.recv().await.unwrap();
        assert!(anchors.on_effect_expired(expiry, &engine, &scene));
        assert!(scene.is_empty());
        assert!(engine.contains(remote.id), "owner removes its own anchor");
        assert!(engine.removal_calls().is_empty());
    }

    #[tokio::test]
    async fn test_participant_marker_persists() {
        let (mut anchors, _rx, engine, scene) = setup();
        let participant =
            engine.insert_remote_anchor(SessionId::generate(), AnchorKind::Participant, Pose::IDENTITY);

        assert_eq!(
            anchors.on_anchor_added(&participant, &scene),
            AddedOutcome::ParticipantShown
        );
        assert_eq!(scene.visual(participant.id), Some(Visual::ParticipantMarker));

        anchors.on_anchors_removed(&[participant.id], &scene);
        assert!(scene.is_empty());
    }

    #[tokio::test]
    async fn test_tracking_anchor_not_visualized() {
        let (mut anchors, _rx, engine, scene) = setup();
        let tracked =
            engine.insert_remote_anchor(SessionId::generate(), AnchorKind::Tracking, Pose::IDENTITY);
        assert_eq!(anchors.on_anchor_added(&tracked, &scene), AddedOutcome::Ignored);
    }

    // ==================== Session cleanup ====================

    #[tokio::test]
    async fn test_remove_anchors_of_is_exact() {
        let (mut anchors, _rx, engine, scene) = setup();
        let s1 = SessionId::generate();
        let s2 = SessionId::generate();
        let a = engine.insert_remote_anchor(s1, AnchorKind::Tracking, Pose::IDENTITY);
        let b = engine.insert_remote_anchor(s1, AnchorKind::Participant, Pose::IDENTITY);
        let c = engine.insert_remote_anchor(s2, AnchorKind::Tracking, Pose::IDENTITY);
        let local = Anchor::local(AnchorKind::Tracking, Pose::IDENTITY);
        engine.insert_anchor(local.clone());

        assert_eq!(anchors.remove_anchors_of(s1, &engine, &scene), 2);

        assert!(!engine.contains(a.id));
        assert!(!engine.contains(b.id));
        assert!(engine.contains(c.id));
        assert!(engine.contains(local.id));

        // Second pass finds nothing
        assert_eq!(anchors.remove_anchors_of(s1, &engine, &scene), 0);
        assert_eq!(engine.removal_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_without_snapshot_is_noop() {
        let (mut anchors, _rx, engine, scene) = setup();
        let s1 = SessionId::generate();
        engine.insert_remote_anchor(s1, AnchorKind::Tracking, Pose::IDENTITY);
        engine.set_frame_available(false);

        assert_eq!(anchors.remove_anchors_of(s1, &engine, &scene), 0);
        assert!(engine.removal_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_cancels_pending_expiry() {
        let (mut anchors, mut rx, engine, scene) = setup();
        let s1 = SessionId::generate();
        let effect = engine.insert_remote_anchor(s1, AnchorKind::effect("laserred"), Pose::IDENTITY);
        anchors.on_anchor_added(&effect, &scene);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(anchors.remove_anchors_of(s1, &engine, &scene), 1);
        assert!(scene.is_empty());

        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(rx.try_recv().is_err(), "timer was cancelled");
        assert_eq!(engine.removal_calls(), vec![effect.id]);
        assert_eq!(scene.detach_count(), 1);
    }

    #[tokio::test]
    async fn test_expiry_after_cleanup_is_noop() {
        let (mut anchors, _rx, engine, scene) = setup();
        let s1 = SessionId::generate();
        let effect = engine.insert_remote_anchor(s1, AnchorKind::effect("laserred"), Pose::IDENTITY);
        anchors.on_anchor_added(&effect, &scene);
        anchors.remove_anchors_of(s1, &engine, &scene);

        // An expiry that raced the cleanup
        let late = EffectExpiry {
            anchor: effect.id,
            generation: 0,
        };
        assert!(!anchors.on_effect_expired(late, &engine, &scene));
        assert_eq!(engine.removal_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reshown_effect_ignores_old_expiry() {
        let (mut anchors, mut rx, engine, scene) = setup();
        let effect = engine.insert_remote_anchor(
            SessionId::generate(),
            AnchorKind::effect("laserred"),
            Pose::IDENTITY,
        );
        anchors.on_anchor_added(&effect, &scene);
        anchors.on_anchor_added(&effect, &scene);

        let stale = EffectExpiry {
            anchor: effect.id,
            generation: 0,
        };
        assert!(!anchors.on_effect_expired(stale, &engine, &scene));
        assert!(anchors.is_shown(&effect.id));

        let fresh = rx.recv().await.unwrap();
        assert_eq!(fresh.generation, 1);
        assert!(anchors.on_effect_expired(fresh, &engine, &scene));
    }

    #[tokio::test]
    async fn test_local_effect_removed_externally_before_expiry() {
        let (mut anchors, mut rx, engine, scene) = setup();
        anchors.place_ephemeral_anchor("lasergreen", Pose::IDENTITY, &engine);
        let confirmed = engine.confirm_requests();
        anchors.on_anchor_added(&confirmed[0], &scene);

        // Engine drops the anchor but the removal callback hasn't arrived yet
        engine.remove_anchor(confirmed[0].id);

        let expiry = rx.recv().await.unwrap();
        anchors.on_effect_expired(expiry, &engine, &scene);
        assert_eq!(engine.removal_calls().len(), 1, "no second removal");
        assert!(scene.is_empty());
    }

    #[tokio::test]
    async fn test_local_effect_removed_without_snapshot() {
        let (mut anchors, mut rx, engine, scene) = setup();
        anchors.place_ephemeral_anchor("lasergreen", Pose::IDENTITY, &engine);
        let confirmed = engine.confirm_requests();
        anchors.on_anchor_added(&confirmed[0], &scene);

        // Tracking lost: no frame when the timer fires
        engine.set_frame_available(false);

        let expiry = rx.recv().await.unwrap();
        assert!(anchors.on_effect_expired(expiry, &engine, &scene));
        assert_eq!(engine.removal_calls(), vec![confirmed[0].id]);
        assert!(!engine.contains(confirmed[0].id));
        assert!(scene.is_empty());
        assert_eq!(anchors.shown_count(), 0);
    }
}
