//! Transport trait for peer-to-peer messaging.
//!
//! The transport owns peer discovery and connection state. It reports
//! discovery, joins, leaves and inbound data to the core through a
//! [`CoordinatorHandle`](crate::CoordinatorHandle); the core uses this trait to
//! send bytes back out.
//!
//! Implementations:
//! - `InMemoryTransport` - Records sends, for testing
//! - `LoopbackTransport` (in ar-sync-sim) - Delivers between in-process devices

use crate::PeerHandle;
use async_trait::async_trait;
use std::sync::{Mutex, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer not connected: {0}")]
    PeerNotConnected(PeerHandle),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Delivered to {delivered} peer(s), failed for {}", format_peers(.failed))]
    Partial {
        delivered: usize,
        failed: Vec<PeerHandle>,
    },

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Peers that did receive the data despite the error.
    pub fn delivered(&self) -> usize {
        match self {
            Self::Partial { delivered, .. } => *delivered,
            _ => 0,
        }
    }
}

fn format_peers(peers: &[PeerHandle]) -> String {
    peers
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Per-peer results of one multi-peer send.
///
/// Transports attempt every recipient and report failures at the end, so one
/// unreachable peer never keeps the data from the others.
#[derive(Debug, Default)]
pub struct SendReport {
    delivered: usize,
    failed: Vec<(PeerHandle, TransportError)>,
}

impl SendReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&mut self) {
        self.delivered += 1;
    }

    pub fn failed(&mut self, peer: PeerHandle, error: TransportError) {
        self.failed.push((peer, error));
    }

    /// A lone failed recipient keeps its own error.
    pub fn finish(mut self) -> Result<()> {
        if self.failed.is_empty() {
            return Ok(());
        }
        if self.delivered == 0 && self.failed.len() == 1 {
            if let Some((_, error)) = self.failed.pop() {
                return Err(error);
            }
        }
        Err(TransportError::Partial {
            delivered: self.delivered,
            failed: self.failed.into_iter().map(|(peer, _)| peer).collect(),
        })
    }
}

/// Delivery guarantee requested for a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Delivery {
    /// Eventually delivered, in order per peer
    Reliable,
    /// May be dropped or reordered
    BestEffort,
}

impl Delivery {
    pub fn is_reliable(&self) -> bool {
        matches!(self, Self::Reliable)
    }
}

/// Byte transport to connected peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Peers currently connected.
    fn connected_peers(&self) -> Vec<PeerHandle>;

    /// Send data to the given peers. Every reachable peer gets the data even
    /// when others fail; see [`SendReport`].
    async fn send(&self, data: &[u8], delivery: Delivery, to: &[PeerHandle]) -> Result<()>;

    /// Send data to every connected peer.
    async fn broadcast(&self, data: &[u8], delivery: Delivery) -> Result<()> {
        let peers = self.connected_peers();
        self.send(data, delivery, &peers).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn connected_peers(&self) -> Vec<PeerHandle> {
        (**self).connected_peers()
    }

    async fn send(&self, data: &[u8], delivery: Delivery, to: &[PeerHandle]) -> Result<()> {
        (**self).send(data, delivery, to).await
    }

    async fn broadcast(&self, data: &[u8], delivery: Delivery) -> Result<()> {
        (**self).broadcast(data, delivery).await
    }
}

/// A message handed to [`InMemoryTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: PeerHandle,
    pub data: Vec<u8>,
    pub delivery: Delivery,
}

/// In-memory transport for testing.
///
/// Connection state is set by the test; every send is recorded per recipient.
#[derive(Default)]
pub struct InMemoryTransport {
    connected: RwLock<Vec<PeerHandle>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a peer as connected.
    pub fn connect(&self, peer: PeerHandle) {
        let mut connected = self.connected.write().unwrap_or_else(|e| e.into_inner());
        if !connected.contains(&peer) {
            connected.push(peer);
        }
    }

    /// Mark a peer as disconnected.
    pub fn disconnect(&self, peer: PeerHandle) {
        self.connected
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|p| *p != peer);
    }

    /// Every message sent so far, in send order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Messages sent to one peer, in send order.
    pub fn sent_to(&self, peer: PeerHandle) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.to == peer)
            .collect()
    }

    /// Forget recorded sends.
    pub fn clear_sent(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn connected_peers(&self) -> Vec<PeerHandle> {
        self.connected
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn send(&self, data: &[u8], delivery: Delivery, to: &[PeerHandle]) -> Result<()> {
        let connected = self.connected_peers();
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        let mut report = SendReport::new();
        for peer in to {
            if !connected.contains(peer) {
                report.failed(*peer, TransportError::PeerNotConnected(*peer));
                continue;
            }
            sent.push(SentMessage {
                to: *peer,
                data: data.to_vec(),
                delivery,
            });
            report.delivered();
        }
        report.finish()
    }
}
