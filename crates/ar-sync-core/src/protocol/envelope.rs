//! Collaboration payload envelope.
//!
//! The tracking engine produces opaque mapping blobs tagged with a priority.
//! On the wire they travel as `[COLLABORATION_TAG][bincode envelope]`, so the
//! receiver can read the priority without handing the blob to the engine.

use super::{ProtocolError, Result, COLLABORATION_TAG};
use serde::{Deserialize, Serialize};

/// Current envelope version.
///
/// Increment when making breaking changes to the envelope layout.
pub const ENVELOPE_VERSION: u8 = 1;

/// Delivery priority chosen by the tracking engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    /// Must be delivered reliably
    Critical,
    /// Best-effort delivery is acceptable
    Normal,
}

impl Priority {
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }
}

/// An opaque unit of shared-map state plus its priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationPayload {
    pub data: Vec<u8>,
    pub priority: Priority,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u8,
    priority: Priority,
    data: Vec<u8>,
}

impl CollaborationPayload {
    pub fn new(data: Vec<u8>, priority: Priority) -> Self {
        Self { data, priority }
    }

    /// Encode for the wire.
    ///
    /// Panics if serialization fails. Payloads come from the tracking engine,
    /// which always produces encodable data.
    pub fn encode(&self) -> Vec<u8> {
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            priority: self.priority,
            data: self.data.clone(),
        };
        let body =
            bincode::serialize(&envelope).expect("Collaboration envelope serialization should not fail");

        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(COLLABORATION_TAG);
        bytes.extend_from_slice(&body);
        bytes
    }

    /// Decode wire bytes produced by [`encode`](Self::encode).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let body = match data.split_first() {
            Some((&COLLABORATION_TAG, body)) => body,
            Some((first, _)) => return Err(ProtocolError::UnknownKind(*first)),
            None => return Err(ProtocolError::Empty),
        };

        let envelope: Envelope = bincode::deserialize(body)
            .map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(ProtocolError::UnsupportedVersion(envelope.version));
        }

        Ok(Self {
            data: envelope.data,
            priority: envelope.priority,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
