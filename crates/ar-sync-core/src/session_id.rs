//! SessionId: identifier of one device's local tracking session.
//!
//! Generated and rotated by the tracking engine. Displays as the uppercase
//! hyphenated UUID, which is the form carried in identity announcements.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionIdError {
    #[error("Invalid session ID length: expected 36 chars, got {0}")]
    WrongLength(usize),
    #[error("Invalid session ID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}

/// Identifier of a tracking session.
///
/// # Examples
/// ```
/// use ar_sync_core::SessionId;
///
/// let id: SessionId = "6f1c2a8e-3b4d-4e5f-9a0b-1c2d3e4f5a6b".parse().unwrap();
/// assert_eq!(id.to_string(), "6F1C2A8E-3B4D-4E5F-9A0B-1C2D3E4F5A6B");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut buf = Uuid::encode_buffer();
        f.write_str(self.0.hyphenated().encode_upper(&mut buf))
    }
}

impl FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Only the hyphenated form is accepted on the wire
        if s.len() != 36 {
            return Err(SessionIdError::WrongLength(s.len()));
        }
        Ok(Self(Uuid::try_parse(s)?))
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl serde::Serialize for SessionId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for SessionId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
