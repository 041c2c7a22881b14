//! Peer session index: which tracking session each connected peer announced.
//!
//! Owned by the coordinator task, so it needs no locking. Entries appear when
//! a peer announces its session and disappear when the peer leaves.

use crate::{PeerHandle, SessionId};
use std::collections::HashMap;

/// Result of recording an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionUpdate {
    /// First announcement from this peer since it joined
    New,
    /// Same session announced again
    Unchanged,
    /// Peer switched sessions; the old session's anchors are orphaned
    Replaced(SessionId),
}

/// Mapping from peer to its announced session.
#[derive(Debug, Default)]
pub struct PeerSessionIndex {
    sessions: HashMap<PeerHandle, SessionId>,
}

impl PeerSessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// How recording `session` for `peer` would change the index.
    pub fn classify(&self, peer: &PeerHandle, session: SessionId) -> SessionUpdate {
        match self.sessions.get(peer) {
            None => SessionUpdate::New,
            Some(old) if *old == session => SessionUpdate::Unchanged,
            Some(old) => SessionUpdate::Replaced(*old),
        }
    }

    /// Record `session` as the peer's current session.
    pub fn record(&mut self, peer: PeerHandle, session: SessionId) {
        self.sessions.insert(peer, session);
    }

    /// Drop the peer's entry, returning its session if it had announced one.
    pub fn remove(&mut self, peer: &PeerHandle) -> Option<SessionId> {
        self.sessions.remove(peer)
    }

    pub fn get(&self, peer: &PeerHandle) -> Option<SessionId> {
        self.sessions.get(peer).copied()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Copy of the current mapping.
    pub fn snapshot(&self) -> HashMap<PeerHandle, SessionId> {
        self.sessions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u64) -> PeerHandle {
        PeerHandle::from(n)
    }

    #[test]
    fn test_first_announcement_is_new() {
        let mut index = PeerSessionIndex::new();
        let s1 = SessionId::generate();

        assert_eq!(index.classify(&peer(1), s1), SessionUpdate::New);
        index.record(peer(1), s1);
        assert_eq!(index.get(&peer(1)), Some(s1));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_repeat_announcement_is_unchanged() {
        let mut index = PeerSessionIndex::new();
        let s1 = SessionId::generate();
        index.record(peer(1), s1);

        assert_eq!(index.classify(&peer(1), s1), SessionUpdate::Unchanged);
        index.record(peer(1), s1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_changed_session_reports_old() {
        let mut index = PeerSessionIndex::new();
        let s1 = SessionId::generate();
        let s2 = SessionId::generate();
        index.record(peer(1), s1);

        assert_eq!(index.classify(&peer(1), s2), SessionUpdate::Replaced(s1));
        assert_eq!(index.get(&peer(1)), Some(s1), "classify does not record");
        index.record(peer(1), s2);
        assert_eq!(index.get(&peer(1)), Some(s2));
    }

    #[test]
    fn test_remove_returns_session_once() {
        let mut index = PeerSessionIndex::new();
        let s1 = SessionId::generate();
        index.record(peer(1), s1);

        assert_eq!(index.remove(&peer(1)), Some(s1));
        assert_eq!(index.remove(&peer(1)), None);
        assert!(index.is_empty());
    }
}
