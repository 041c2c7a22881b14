//! ar-sync-core: session synchronization and anchor attribution for
//! multiuser AR.
//!
//! This crate provides the core functionality for:
//! - Announcing this device's tracking session to peers
//! - Relaying opaque collaborative-mapping payloads with priority-aware delivery
//! - Attributing anchors to the session that created them, and removing them
//!   when that session goes away
//! - Admission control for peers joining the session
//! - Transport, TrackingEngine and Scene trait abstractions

pub mod anchor;
pub mod anchors;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod events;
pub mod index;
pub mod membership;
pub mod peer;
pub mod protocol;
pub mod registrar;
pub mod relay;
pub mod scene;
pub mod session_id;
pub mod transport;

pub use anchor::{Anchor, AnchorId, AnchorKind, AnchorRequest, CorrelationToken, Pose};
pub use config::SyncConfig;
pub use coordinator::{Coordinator, CoordinatorError, CoordinatorHandle, CoordinatorStatus};
pub use engine::{InMemoryEngine, TrackingEngine};
pub use events::{EventBus, SessionEvent, Subscription};
pub use peer::{PeerHandle, PeerHandleError};
pub use protocol::{CollaborationPayload, InboundMessage, Priority, ProtocolError};
pub use relay::RelayStats;
pub use scene::{InMemoryScene, Scene, Visual};
pub use session_id::{SessionId, SessionIdError};
pub use transport::{Delivery, InMemoryTransport, Transport, TransportError};
