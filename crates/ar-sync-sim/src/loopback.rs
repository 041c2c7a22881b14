//! In-process loopback network.
//!
//! Every simulated device registers a node on a shared [`LoopbackNetwork`] and
//! gets a [`LoopbackTransport`] for its coordinator. Sends are delivered
//! straight into the receiving coordinator's command queue, so reliable sends
//! arrive in order per peer. Best-effort sends are dropped at the configured
//! loss rate.

use ar_sync_core::transport::{self, Delivery, SendReport, Transport, TransportError};
use ar_sync_core::{CoordinatorHandle, PeerHandle};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LoopbackError {
    #[error("Unknown device: {0}")]
    UnknownDevice(PeerHandle),

    #[error("Device {0} has no coordinator attached")]
    Detached(PeerHandle),
}

pub type Result<T> = std::result::Result<T, LoopbackError>;

#[derive(Default)]
struct Node {
    handle: Option<CoordinatorHandle>,
    links: BTreeSet<PeerHandle>,
}

struct Inner {
    nodes: RwLock<HashMap<PeerHandle, Node>>,
    loss_rate: f64,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<PeerHandle, Node>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PeerHandle, Node>> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, peer: PeerHandle) -> Result<CoordinatorHandle> {
        self.read()
            .get(&peer)
            .ok_or(LoopbackError::UnknownDevice(peer))?
            .handle
            .clone()
            .ok_or(LoopbackError::Detached(peer))
    }
}

/// Shared in-process network. Cheap to clone.
#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Arc<Inner>,
}

impl LoopbackNetwork {
    /// `loss_rate` is the probability that a best-effort send is dropped,
    /// clamped to `0.0..=1.0`.
    pub fn new(loss_rate: f64) -> Self {
        Self {
            inner: Arc::new(Inner {
                nodes: RwLock::new(HashMap::new()),
                loss_rate: loss_rate.clamp(0.0, 1.0),
            }),
        }
    }

    /// Register a new device and return its transport.
    pub fn transport(&self) -> LoopbackTransport {
        let local = PeerHandle::generate();
        self.inner.write().insert(local, Node::default());
        LoopbackTransport {
            local,
            network: Arc::clone(&self.inner),
        }
    }

    /// Route callbacks for `peer` to its coordinator.
    pub fn attach(&self, peer: PeerHandle, handle: CoordinatorHandle) -> Result<()> {
        let mut nodes = self.inner.write();
        let node = nodes.get_mut(&peer).ok_or(LoopbackError::UnknownDevice(peer))?;
        node.handle = Some(handle);
        Ok(())
    }

    /// Connect two devices. Both sides must admit the other; returns false
    /// when either rejects.
    pub async fn connect(&self, a: PeerHandle, b: PeerHandle) -> Result<bool> {
        let handle_a = self.inner.handle(a)?;
        let handle_b = self.inner.handle(b)?;

        if !handle_a.peer_discovered(b).await {
            info!("{} rejected {}", a, b);
            return Ok(false);
        }
        if !handle_b.peer_discovered(a).await {
            info!("{} rejected {}", b, a);
            return Ok(false);
        }

        {
            let mut nodes = self.inner.write();
            if let Some(node) = nodes.get_mut(&a) {
                node.links.insert(b);
            }
            if let Some(node) = nodes.get_mut(&b) {
                node.links.insert(a);
            }
        }

        // Closed coordinators just miss the join
        let _ = handle_a.peer_joined(b);
        let _ = handle_b.peer_joined(a);
        debug!("Connected {} <-> {}", a, b);
        Ok(true)
    }

    /// Break the link between two devices, notifying both sides.
    pub fn disconnect(&self, a: PeerHandle, b: PeerHandle) {
        let handles = {
            let mut nodes = self.inner.write();
            let linked = nodes.get_mut(&a).is_some_and(|node| node.links.remove(&b));
            if let Some(node) = nodes.get_mut(&b) {
                node.links.remove(&a);
            }
            if !linked {
                return;
            }
            (
                nodes.get(&a).and_then(|n| n.handle.clone()),
                nodes.get(&b).and_then(|n| n.handle.clone()),
            )
        };

        if let Some(handle) = handles.0 {
            let _ = handle.peer_left(b);
        }
        if let Some(handle) = handles.1 {
            let _ = handle.peer_left(a);
        }
        debug!("Disconnected {} <-> {}", a, b);
    }

    /// Disconnect a device from everyone and unregister it.
    pub fn remove(&self, peer: PeerHandle) {
        for other in self.links(peer) {
            self.disconnect(peer, other);
        }
        self.inner.write().remove(&peer);
    }

    pub fn links(&self, peer: PeerHandle) -> Vec<PeerHandle> {
        self.inner
            .read()
            .get(&peer)
            .map(|node| node.links.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn devices(&self) -> Vec<PeerHandle> {
        let mut devices: Vec<PeerHandle> = self.inner.read().keys().copied().collect();
        devices.sort();
        devices
    }
}

/// One device's view of the [`LoopbackNetwork`].
pub struct LoopbackTransport {
    local: PeerHandle,
    network: Arc<Inner>,
}

impl LoopbackTransport {
    pub fn local_peer(&self) -> PeerHandle {
        self.local
    }

    fn should_drop(&self, delivery: Delivery) -> bool {
        !delivery.is_reliable()
            && self.network.loss_rate > 0.0
            && rand::rng().random_bool(self.network.loss_rate)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn connected_peers(&self) -> Vec<PeerHandle> {
        self.network
            .read()
            .get(&self.local)
            .map(|node| node.links.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn send(&self, data: &[u8], delivery: Delivery, to: &[PeerHandle]) -> transport::Result<()> {
        let mut report = SendReport::new();
        let targets: Vec<(PeerHandle, Option<CoordinatorHandle>)> = {
            let nodes = self.network.read();
            let links = nodes
                .get(&self.local)
                .map(|node| &node.links)
                .ok_or_else(|| TransportError::Other(format!("{} is not registered", self.local)))?;

            let mut targets = Vec::with_capacity(to.len());
            for peer in to {
                if links.contains(peer) {
                    targets.push((*peer, nodes.get(peer).and_then(|n| n.handle.clone())));
                } else {
                    report.failed(*peer, TransportError::PeerNotConnected(*peer));
                }
            }
            targets
        };

        for (peer, handle) in targets {
            if self.should_drop(delivery) {
                debug!("Dropped {} byte best-effort send to {}", data.len(), peer);
                report.delivered();
                continue;
            }
            let Some(handle) = handle else {
                report.failed(peer, TransportError::SendFailed(format!("{} is detached", peer)));
                continue;
            };
            match handle.data_received(self.local, data.to_vec()) {
                Ok(()) => report.delivered(),
                Err(e) => report.failed(peer, TransportError::SendFailed(format!("{}: {}", peer, e))),
            }
        }
        report.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ar_sync_core::{
        CollaborationPayload, Coordinator, CoordinatorStatus, InMemoryEngine, InMemoryScene,
        Priority, SessionEvent, SessionId, SyncConfig, TrackingEngine,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn device(network: &LoopbackNetwork) -> (PeerHandle, CoordinatorHandle, SessionId) {
        let transport = network.transport();
        let local = transport.local_peer();
        let engine = InMemoryEngine::new();
        let session = engine.local_session_id().unwrap();
        let (coordinator, handle) =
            Coordinator::new(SyncConfig::default(), transport, engine, InMemoryScene::new());
        network.attach(local, handle.clone()).unwrap();
        coordinator.spawn();
        (local, handle, session)
    }

    async fn settle(handles: &[&CoordinatorHandle]) -> Vec<CoordinatorStatus> {
        let mut out = Vec::new();
        for _ in 0..2 {
            out.clear();
            for handle in handles {
                out.push(handle.status().await.unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_connect_exchanges_sessions() {
        let network = LoopbackNetwork::new(0.0);
        let (a, handle_a, session_a) = device(&network);
        let (b, handle_b, session_b) = device(&network);

        assert!(network.connect(a, b).await.unwrap());
        let status = settle(&[&handle_a, &handle_b]).await;

        assert_eq!(status[0].peer_sessions.get(&b), Some(&session_b));
        assert_eq!(status[1].peer_sessions.get(&a), Some(&session_a));
        assert_eq!(network.links(a), vec![b]);
    }

    #[tokio::test]
    async fn test_disconnect_clears_sessions() {
        let network = LoopbackNetwork::new(0.0);
        let (a, handle_a, _) = device(&network);
        let (b, handle_b, _) = device(&network);
        network.connect(a, b).await.unwrap();
        settle(&[&handle_a, &handle_b]).await;

        network.disconnect(a, b);
        let status = settle(&[&handle_a, &handle_b]).await;

        assert!(status[0].peer_sessions.is_empty());
        assert!(status[1].peer_sessions.is_empty());
        assert!(network.links(a).is_empty());
    }

    #[tokio::test]
    async fn test_send_to_unlinked_peer_fails() {
        let network = LoopbackNetwork::new(0.0);
        let transport = network.transport();
        let stranger = PeerHandle::from(7);

        let err = transport
            .send(b"x", Delivery::Reliable, &[stranger])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PeerNotConnected(p) if p == stranger));
    }

    #[tokio::test]
    async fn test_unlinked_peer_does_not_block_other_recipients() {
        let network = LoopbackNetwork::new(0.0);
        let (sender, handle_s, _) = device(&network);
        let (a, handle_a, _) = device(&network);
        let (b, handle_b, _) = device(&network);
        let (c, handle_c, _) = device(&network);
        for peer in [a, b, c] {
            assert!(network.connect(sender, peer).await.unwrap());
        }
        network.disconnect(sender, b);
        settle(&[&handle_s, &handle_a, &handle_b, &handle_c]).await;

        let merged = Arc::new(AtomicUsize::new(0));
        let _subscriptions: Vec<_> = [&handle_a, &handle_c]
            .iter()
            .map(|handle| {
                let merged = Arc::clone(&merged);
                handle.events().subscribe(move |event| {
                    if matches!(event, SessionEvent::PayloadMerged { .. }) {
                        merged.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        // A second view of the sender's node, as its coordinator sees it
        let transport = LoopbackTransport {
            local: sender,
            network: Arc::clone(&network.inner),
        };
        let payload = CollaborationPayload::new(vec![1; 4], Priority::Critical);
        let err = transport
            .send(&payload.encode(), Delivery::Reliable, &[a, b, c])
            .await
            .unwrap_err();
        settle(&[&handle_a, &handle_c]).await;

        assert_eq!(err.delivered(), 2);
        assert!(matches!(err, TransportError::Partial { ref failed, .. } if *failed == vec![b]));
        assert_eq!(merged.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_total_loss_spares_reliable_sends() {
        let network = LoopbackNetwork::new(1.0);
        let transport = network.transport();
        assert!(!transport.should_drop(Delivery::Reliable));
        assert!(transport.should_drop(Delivery::BestEffort));
    }

    #[tokio::test]
    async fn test_unknown_device_cannot_connect() {
        let network = LoopbackNetwork::new(0.0);
        let (a, _handle, _) = device(&network);
        let err = network.connect(a, PeerHandle::from(99)).await.unwrap_err();
        assert!(matches!(err, LoopbackError::UnknownDevice(_)));
    }
}
