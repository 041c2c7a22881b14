//! Message kind detection.
//!
//! Announcements are plain ASCII starting with [`ANNOUNCEMENT_PREFIX`].
//! Collaboration envelopes start with [`COLLABORATION_TAG`], a byte that can
//! never begin ASCII or UTF-8 text, so the two kinds cannot be confused.

use super::ANNOUNCEMENT_PREFIX;

/// Leading byte of every collaboration envelope.
pub const COLLABORATION_TAG: u8 = 0xC1;

/// Kind of message based on its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Identity announcement (`SessionID:` prefix)
    Announcement,
    /// Collaboration payload envelope
    Collaboration,
    /// Empty message
    Empty,
    /// Anything else; carries the first byte for diagnostics
    Unknown(u8),
}

/// Detect the message kind from raw bytes.
pub fn detect_message_kind(data: &[u8]) -> MessageKind {
    match data.first() {
        None => MessageKind::Empty,
        Some(&COLLABORATION_TAG) => MessageKind::Collaboration,
        Some(_) if data.starts_with(ANNOUNCEMENT_PREFIX.as_bytes()) => MessageKind::Announcement,
        Some(&first) => MessageKind::Unknown(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_announcement() {
        let data = b"SessionID:6F1C2A8E-3B4D-4E5F-9A0B-1C2D3E4F5A6B";
        assert_eq!(detect_message_kind(data), MessageKind::Announcement);
    }

    #[test]
    fn test_detect_collaboration() {
        let data = [COLLABORATION_TAG, 0x01, 0x00];
        assert_eq!(detect_message_kind(&data), MessageKind::Collaboration);
    }

    #[test]
    fn test_detect_empty() {
        assert_eq!(detect_message_kind(&[]), MessageKind::Empty);
    }

    #[test]
    fn test_prefix_without_colon_is_unknown() {
        // A missing colon is not an announcement
        let data = b"SessionID6F1C2A8E-3B4D-4E5F-9A0B-1C2D3E4F5A6B";
        assert_eq!(detect_message_kind(data), MessageKind::Unknown(b'S'));
    }

    #[test]
    fn test_truncated_prefix_is_unknown() {
        assert_eq!(detect_message_kind(b"Sess"), MessageKind::Unknown(b'S'));
    }

    #[test]
    fn test_tag_is_not_valid_utf8_lead() {
        assert!(std::str::from_utf8(&[COLLABORATION_TAG]).is_err());
    }
}
