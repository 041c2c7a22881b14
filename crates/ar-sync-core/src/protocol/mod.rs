//! Wire protocol between devices.
//!
//! Two message kinds share one inbound channel:
//! - **Identity announcement**: ASCII `SessionID:` followed by the session ID
//! - **Collaboration payload**: tag byte `0xC1` followed by a bincode envelope
//!
//! [`InboundMessage::decode`] classifies a message once by its leading bytes
//! and decodes it into a tagged union for the coordinator to dispatch.

pub mod announcement;
pub mod encoding;
pub mod envelope;

pub use announcement::{SessionAnnouncement, ANNOUNCEMENT_PREFIX};
pub use encoding::{detect_message_kind, MessageKind, COLLABORATION_TAG};
pub use envelope::{CollaborationPayload, Priority, ENVELOPE_VERSION};

use thiserror::Error;

/// Maximum inbound message size (50MB) to prevent memory exhaustion from misbehaving peers.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Empty message")]
    Empty,

    #[error("Message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Unknown message kind (first byte 0x{0:02x})")]
    UnknownKind(u8),

    #[error("Malformed session announcement: {0}")]
    MalformedAnnouncement(String),

    #[error("Malformed collaboration envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unsupported envelope version {0}")]
    UnsupportedVersion(u8),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Announcement(SessionAnnouncement),
    Collaboration(CollaborationPayload),
}

impl InboundMessage {
    /// Decode raw bytes received from a peer, enforcing [`MAX_MESSAGE_SIZE`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_with_limit(data, MAX_MESSAGE_SIZE)
    }

    /// Decode raw bytes with an explicit size limit.
    pub fn decode_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(ProtocolError::TooLarge {
                size: data.len(),
                max: max_size,
            });
        }

        match detect_message_kind(data) {
            MessageKind::Announcement => {
                SessionAnnouncement::from_bytes(data).map(Self::Announcement)
            }
            MessageKind::Collaboration => {
                CollaborationPayload::decode(data).map(Self::Collaboration)
            }
            MessageKind::Empty => Err(ProtocolError::Empty),
            MessageKind::Unknown(first) => Err(ProtocolError::UnknownKind(first)),
        }
    }

    /// Short name for logs and events.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Announcement(_) => "announcement",
            Self::Collaboration(_) => "collaboration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionId;

    #[test]
    fn test_decode_announcement() {
        let id = SessionId::generate();
        let bytes = SessionAnnouncement::new(id).to_bytes();

        match InboundMessage::decode(&bytes).unwrap() {
            InboundMessage::Announcement(a) => assert_eq!(a.session_id, id),
            other => panic!("Expected announcement, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_collaboration() {
        let payload = CollaborationPayload::new(vec![9, 8, 7], Priority::Critical);
        let bytes = payload.encode();

        let msg = InboundMessage::decode(&bytes).unwrap();
        assert_eq!(msg, InboundMessage::Collaboration(payload));
        assert_eq!(msg.kind_name(), "collaboration");
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(InboundMessage::decode(&[]), Err(ProtocolError::Empty)));
    }

    #[test]
    fn test_decode_unknown_kind() {
        assert!(matches!(
            InboundMessage::decode(b"hello"),
            Err(ProtocolError::UnknownKind(b'h'))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let bytes = CollaborationPayload::new(vec![0; 64], Priority::Normal).encode();
        let err = InboundMessage::decode_with_limit(&bytes, 16).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge { max: 16, .. }));
    }

    #[test]
    fn test_announcement_prefix_without_valid_id_is_malformed() {
        assert!(matches!(
            InboundMessage::decode(b"SessionID:garbage"),
            Err(ProtocolError::MalformedAnnouncement(_))
        ));
    }
}
