//! Session identity registrar.
//!
//! Announces our tracking session to peers and remembers which session each
//! peer announced. Announcements always go out reliably. When nobody is
//! connected an announcement is simply not sent: peers joining later get the
//! current session through [`SessionRegistrar::on_peer_joined`].

use crate::index::{PeerSessionIndex, SessionUpdate};
use crate::protocol::SessionAnnouncement;
use crate::transport::{Delivery, Transport};
use crate::{PeerHandle, SessionId};
use tracing::{debug, warn};

pub struct SessionRegistrar {
    local: Option<SessionId>,
    index: PeerSessionIndex,
}

impl SessionRegistrar {
    /// `local` is the engine's session at startup, if tracking already runs.
    pub fn new(local: Option<SessionId>) -> Self {
        Self {
            local,
            index: PeerSessionIndex::new(),
        }
    }

    pub fn local_session(&self) -> Option<SessionId> {
        self.local
    }

    pub fn index(&self) -> &PeerSessionIndex {
        &self.index
    }

    /// Our session changed (or was first assigned). Sends the announcement to
    /// every connected peer and returns how many peers it was sent to.
    pub async fn on_local_session_changed<T: Transport + ?Sized>(
        &mut self,
        session: SessionId,
        transport: &T,
    ) -> usize {
        self.local = Some(session);

        let peers = transport.connected_peers();
        if peers.is_empty() {
            debug!("Session changed to {} with no peers connected, nothing to announce", session);
            return 0;
        }

        let bytes = SessionAnnouncement::new(session).to_bytes();
        match transport.send(&bytes, Delivery::Reliable, &peers).await {
            Ok(()) => {
                debug!("Announced session {} to {} peer(s)", session, peers.len());
                peers.len()
            }
            Err(e) => {
                warn!("Failed to announce session {}: {}", session, e);
                e.delivered()
            }
        }
    }

    /// Send our current session to a peer that just joined. Returns the
    /// session sent, or `None` if tracking has no session yet or sending failed.
    pub async fn on_peer_joined<T: Transport + ?Sized>(
        &self,
        peer: PeerHandle,
        transport: &T,
    ) -> Option<SessionId> {
        let Some(session) = self.local else {
            debug!("Peer {} joined before tracking started, announcement deferred", peer);
            return None;
        };

        let bytes = SessionAnnouncement::new(session).to_bytes();
        match transport.send(&bytes, Delivery::Reliable, &[peer]).await {
            Ok(()) => Some(session),
            Err(e) => {
                warn!("Failed to announce session to {}: {}", peer, e);
                None
            }
        }
    }

    /// How recording `session` for `peer` would change the index. Callers
    /// purge the replaced session's anchors before calling [`record`](Self::record).
    pub fn classify(&self, peer: PeerHandle, session: SessionId) -> SessionUpdate {
        self.index.classify(&peer, session)
    }

    /// Associate `peer` with `session`.
    pub fn record(&mut self, peer: PeerHandle, session: SessionId) {
        self.index.record(peer, session);
    }

    /// Forget the peer, returning the session whose anchors must be purged.
    pub fn on_peer_left(&mut self, peer: PeerHandle) -> Option<SessionId> {
        self.index.remove(&peer)
    }
}
