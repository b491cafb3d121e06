//! Wire transport adapter (spec §4.1).
//!
//! The engine core never opens a socket itself; it depends only on the
//! [`Transport`] trait. [`InMemoryTransport`] is the reference/test
//! implementation — a shared registry of in-process mailboxes with
//! optionally-injected loss, duplication and reordering, the same shape this
//! codebase's networking layer uses for its loopback test fixtures.

use crate::common::NodeId;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

/// A message received from a peer, still wire-encoded.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub from: NodeId,
    pub bytes: Vec<u8>,
}

/// Everything the engine needs from the network: broadcast to every known
/// peer, unicast to one, and a stream of inbound events. Implementations are
/// responsible for their own peer discovery; the engine only ever deals in
/// [`NodeId`]s already known to the topology.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn broadcast(&self, bytes: Vec<u8>) -> crate::Result<()>;

    async fn send(&self, to: &NodeId, bytes: Vec<u8>) -> crate::Result<()>;

    /// Take ownership of this node's inbound event stream. Must be called at
    /// most once; the engine calls it during startup.
    async fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;
}

/// Configurable fault injection for [`InMemoryTransport`], used by tests that
/// exercise message loss, duplication and reordering (spec's boundary and
/// resilience scenarios).
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability in `[0.0, 1.0]` that an outbound message is dropped.
    pub loss_probability: f64,
    /// Probability in `[0.0, 1.0]` that an outbound message is duplicated.
    pub duplication_probability: f64,
    /// Maximum extra delay (in sequence-order terms) applied before delivery
    /// to simulate reordering. `0` disables reordering.
    pub max_reorder_delay: std::time::Duration,
}

struct Registry {
    nodes: HashMap<NodeId, mpsc::UnboundedSender<TransportEvent>>,
}

/// In-process [`Transport`] for tests: every node sharing the same
/// [`InMemoryNetwork`] can reach every other by [`NodeId`].
pub struct InMemoryTransport {
    self_id: NodeId,
    network: Arc<InMemoryNetwork>,
    inbox_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

/// Shared registry backing a cluster of [`InMemoryTransport`] instances.
/// Construct one per test cluster and hand each node its own transport via
/// [`InMemoryNetwork::join`].
pub struct InMemoryNetwork {
    registry: parking_lot::Mutex<Registry>,
    faults: FaultConfig,
}

impl InMemoryNetwork {
    pub fn new(faults: FaultConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: parking_lot::Mutex::new(Registry {
                nodes: HashMap::new(),
            }),
            faults,
        })
    }

    /// Register `node` and return its [`Transport`] handle.
    pub fn join(self: &Arc<Self>, node: NodeId) -> Arc<InMemoryTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.lock().nodes.insert(node.clone(), tx);
        Arc::new(InMemoryTransport {
            self_id: node,
            network: Arc::clone(self),
            inbox_rx: AsyncMutex::new(Some(rx)),
        })
    }

    pub fn leave(&self, node: &NodeId) {
        self.registry.lock().nodes.remove(node);
    }

    fn deliver(&self, from: NodeId, to: &NodeId, bytes: Vec<u8>) {
        if roll(self.faults.loss_probability) {
            return;
        }
        let sender = self.registry.lock().nodes.get(to).cloned();
        let Some(sender) = sender else { return };

        let event = TransportEvent {
            from: from.clone(),
            bytes,
        };
        let _ = sender.send(event.clone());
        if roll(self.faults.duplication_probability) {
            let _ = sender.send(event);
        }
    }
}

fn roll(probability: f64) -> bool {
    if probability <= 0.0 {
        return false;
    }
    rand::rng().random_bool(probability.min(1.0))
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn broadcast(&self, bytes: Vec<u8>) -> crate::Result<()> {
        let peers: Vec<NodeId> = self
            .network
            .registry
            .lock()
            .nodes
            .keys()
            .filter(|id| **id != self.self_id)
            .cloned()
            .collect();
        for peer in peers {
            self.network.deliver(self.self_id.clone(), &peer, bytes.clone());
        }
        Ok(())
    }

    async fn send(&self, to: &NodeId, bytes: Vec<u8>) -> crate::Result<()> {
        self.network.deliver(self.self_id.clone(), to, bytes);
        Ok(())
    }

    async fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.inbox_rx
            .lock()
            .await
            .take()
            .expect("InMemoryTransport::subscribe called more than once")
    }
}
