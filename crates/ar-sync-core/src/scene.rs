//! Scene trait: the renderer that visualizes anchors.

use crate::AnchorId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

/// Visual attached to an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Visual {
    /// Transient effect model (e.g. a laser flash)
    Effect { model: String },
    /// Marker showing another participant's device
    ParticipantMarker,
}

/// Renderer abstraction. Attaching twice replaces the visual; detaching an
/// anchor without a visual is a no-op.
pub trait Scene: Send + Sync {
    fn attach(&self, anchor: AnchorId, visual: Visual);
    fn detach(&self, anchor: AnchorId);
}

impl<T: Scene + ?Sized> Scene for std::sync::Arc<T> {
    fn attach(&self, anchor: AnchorId, visual: Visual) {
        (**self).attach(anchor, visual)
    }

    fn detach(&self, anchor: AnchorId) {
        (**self).detach(anchor)
    }
}

/// In-memory scene for testing.
#[derive(Default)]
pub struct InMemoryScene {
    visuals: RwLock<HashMap<AnchorId, Visual>>,
    detach_count: RwLock<usize>,
}

impl InMemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visual(&self, anchor: AnchorId) -> Option<Visual> {
        self.visuals
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&anchor)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.visuals.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of detach calls that actually removed a visual.
    pub fn detach_count(&self) -> usize {
        *self.detach_count.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Scene for InMemoryScene {
    fn attach(&self, anchor: AnchorId, visual: Visual) {
        self.visuals
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(anchor, visual);
    }

    fn detach(&self, anchor: AnchorId) {
        let removed = self
            .visuals
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&anchor)
            .is_some();
        if removed {
            *self.detach_count.write().unwrap_or_else(|e| e.into_inner()) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_and_detach() {
        let scene = InMemoryScene::new();
        let id = AnchorId::generate();

        scene.attach(id, Visual::ParticipantMarker);
        assert_eq!(scene.visual(id), Some(Visual::ParticipantMarker));

        scene.detach(id);
        scene.detach(id);
        assert!(scene.is_empty());
        assert_eq!(scene.detach_count(), 1);
    }
}
