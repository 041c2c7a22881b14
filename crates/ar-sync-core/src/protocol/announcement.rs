//! Identity announcement.
//!
//! Sent reliably to every connected peer whenever our tracking session
//! changes, and to a single peer when it joins. Wire format is ASCII:
//! `SessionID:` immediately followed by the session ID, to the end of the
//! message.

use super::{ProtocolError, Result};
use crate::SessionId;

/// Literal prefix of every announcement.
pub const ANNOUNCEMENT_PREFIX: &str = "SessionID:";

/// Announcement of the sender's current tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionAnnouncement {
    pub session_id: SessionId,
}

impl SessionAnnouncement {
    pub fn new(session_id: SessionId) -> Self {
        Self { session_id }
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}{}", ANNOUNCEMENT_PREFIX, self.session_id).into_bytes()
    }

    /// Parse from wire bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| ProtocolError::MalformedAnnouncement(e.to_string()))?;

        let id = text.strip_prefix(ANNOUNCEMENT_PREFIX).ok_or_else(|| {
            ProtocolError::MalformedAnnouncement("missing SessionID: prefix".to_string())
        })?;

        let session_id = id
            .parse::<SessionId>()
            .map_err(|e| ProtocolError::MalformedAnnouncement(e.to_string()))?;

        Ok(Self { session_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_id() -> SessionId {
        "6f1c2a8e-3b4d-4e5f-9a0b-1c2d3e4f5a6b".parse().unwrap()
    }

    #[test]
    fn test_wire_format() {
        let bytes = SessionAnnouncement::new(sample_id()).to_bytes();
        assert_eq!(
            bytes,
            b"SessionID:6F1C2A8E-3B4D-4E5F-9A0B-1C2D3E4F5A6B".to_vec()
        );
    }

    #[test]
    fn test_parse_lowercase_id() {
        let parsed =
            SessionAnnouncement::from_bytes(b"SessionID:6f1c2a8e-3b4d-4e5f-9a0b-1c2d3e4f5a6b")
                .unwrap();
        assert_eq!(parsed.session_id, sample_id());
    }

    #[test]
    fn test_reject_missing_prefix() {
        assert!(SessionAnnouncement::from_bytes(b"6F1C2A8E-3B4D-4E5F-9A0B-1C2D3E4F5A6B").is_err());
        assert!(SessionAnnouncement::from_bytes(b"SessionID").is_err());
    }

    #[test]
    fn test_reject_trailing_garbage() {
        assert!(
            SessionAnnouncement::from_bytes(b"SessionID:6F1C2A8E-3B4D-4E5F-9A0B-1C2D3E4F5A6B\n")
                .is_err()
        );
    }

    #[test]
    fn test_reject_invalid_utf8() {
        let mut bytes = b"SessionID:".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        assert!(matches!(
            SessionAnnouncement::from_bytes(&bytes),
            Err(ProtocolError::MalformedAnnouncement(_))
        ));
    }

    #[test]
    fn test_reject_empty_id() {
        assert!(SessionAnnouncement::from_bytes(b"SessionID:").is_err());
    }
}
