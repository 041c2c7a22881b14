//! Anchors: positioned objects in the shared world.

use crate::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

/// Identifier of an anchor, assigned by the tracking engine on confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorId(Uuid);

impl AnchorId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for AnchorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Locally generated token linking an anchor request to its confirmation.
///
/// No anchor ID exists before the engine confirms a request, so the token is
/// the only way to recognize our own placement when `anchor_added` fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for CorrelationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Column-major 4x4 world transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub matrix: [f32; 16],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        matrix: [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ],
    };

    /// Pure translation.
    pub fn at(x: f32, y: f32, z: f32) -> Self {
        let mut pose = Self::IDENTITY;
        pose.matrix[12] = x;
        pose.matrix[13] = y;
        pose.matrix[14] = z;
        pose
    }

    pub fn translation(&self) -> [f32; 3] {
        [self.matrix[12], self.matrix[13], self.matrix[14]]
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// What an anchor represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnchorKind {
    /// Ordinary mapped anchor, persistent until removed
    Tracking,
    /// Short-lived visual effect showing the named model
    Effect { model: String },
    /// Another participant's device pose
    Participant,
}

impl AnchorKind {
    pub fn effect(model: impl Into<String>) -> Self {
        Self::Effect {
            model: model.into(),
        }
    }

    pub fn is_effect(&self) -> bool {
        matches!(self, Self::Effect { .. })
    }

    pub fn is_participant(&self) -> bool {
        matches!(self, Self::Participant)
    }
}

/// An anchor as reported by the tracking engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub id: AnchorId,
    pub kind: AnchorKind,
    /// Session that created the anchor; `None` for purely local anchors
    pub origin: Option<SessionId>,
    /// Set when this anchor confirms one of our own requests
    pub request: Option<CorrelationToken>,
    pub pose: Pose,
}

impl Anchor {
    /// Anchor confirming a local creation request.
    pub fn confirmed(request: &AnchorRequest) -> Self {
        Self {
            id: AnchorId::generate(),
            kind: request.kind.clone(),
            origin: None,
            request: Some(request.token),
            pose: request.pose,
        }
    }

    /// Anchor contributed by another session.
    pub fn remote(origin: SessionId, kind: AnchorKind, pose: Pose) -> Self {
        Self {
            id: AnchorId::generate(),
            kind,
            origin: Some(origin),
            request: None,
            pose,
        }
    }

    /// Local anchor not tied to any request.
    pub fn local(kind: AnchorKind, pose: Pose) -> Self {
        Self {
            id: AnchorId::generate(),
            kind,
            origin: None,
            request: None,
            pose,
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin.is_none()
    }

    pub fn belongs_to(&self, session: &SessionId) -> bool {
        self.origin.as_ref() == Some(session)
    }
}

/// Request for the engine to create an anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorRequest {
    pub token: CorrelationToken,
    pub kind: AnchorKind,
    pub pose: Pose,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_translation() {
        let pose = Pose::at(1.0, 2.0, -3.0);
        assert_eq!(pose.translation(), [1.0, 2.0, -3.0]);
        assert_eq!(Pose::default(), Pose::IDENTITY);
    }

    #[test]
    fn test_confirmed_anchor_carries_token() {
        let request = AnchorRequest {
            token: CorrelationToken::generate(),
            kind: AnchorKind::effect("lasergreen"),
            pose: Pose::at(0.0, 1.0, 0.0),
        };
        let anchor = Anchor::confirmed(&request);
        assert_eq!(anchor.request, Some(request.token));
        assert_eq!(anchor.kind, request.kind);
        assert!(anchor.is_local());
    }

    #[test]
    fn test_belongs_to() {
        let session = SessionId::generate();
        let other = SessionId::generate();
        let anchor = Anchor::remote(session, AnchorKind::Tracking, Pose::IDENTITY);

        assert!(anchor.belongs_to(&session));
        assert!(!anchor.belongs_to(&other));
        assert!(!Anchor::local(AnchorKind::Tracking, Pose::IDENTITY).belongs_to(&session));
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&AnchorKind::effect("lasergreen")).unwrap();
        assert_eq!(json, r#"{"kind":"effect","model":"lasergreen"}"#);
    }
}
