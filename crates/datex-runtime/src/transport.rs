//! Block transport.
//!
//! The runtime only needs to hand an encoded block to the next hop; how it
//! gets there is up to the [`Transport`]. [`MemoryNetwork`] connects
//! runtimes living in the same process, with optional per-endpoint latency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datex_types::IdEndpoint;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::context::RuntimeContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{Runtime, WeakRuntime};

/// Sends encoded blocks to directly reachable endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: IdEndpoint, block: Vec<u8>) -> RuntimeResult<()>;
}

// ══════════════════════════════════════════════════════════════════════════════
// In-memory network
// ══════════════════════════════════════════════════════════════════════════════

/// One block handed to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentBlock {
    pub from: IdEndpoint,
    pub to: IdEndpoint,
    pub bytes: Vec<u8>,
}

struct Node {
    runtime: WeakRuntime,
    latency: Duration,
    /// Inbound blocks are accepted and silently lost.
    muted: bool,
}

/// Runtimes of one process wired to each other. Every delivery runs in
/// its own task, so blocks can overtake each other when latencies differ.
#[derive(Default)]
pub struct MemoryNetwork {
    nodes: RwLock<HashMap<IdEndpoint, Node>>,
    log: Mutex<Vec<SentBlock>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a runtime for `context` and attach it to the network.
    pub fn join(self: &Arc<Self>, context: RuntimeContext) -> Runtime {
        let id = context.id();
        let transport = Arc::new(MemoryTransport {
            network: Arc::clone(self),
            from: id,
        });
        let runtime = Runtime::new(context, transport);
        self.nodes.write().insert(
            id,
            Node {
                runtime: runtime.downgrade(),
                latency: Duration::ZERO,
                muted: false,
            },
        );
        debug!(endpoint = %id, "joined memory network");
        runtime
    }

    /// Delay every block delivered to `endpoint`.
    pub fn set_latency(&self, endpoint: IdEndpoint, latency: Duration) {
        if let Some(node) = self.nodes.write().get_mut(&endpoint) {
            node.latency = latency;
        }
    }

    /// Swallow every block delivered to `endpoint`.
    pub fn mute(&self, endpoint: IdEndpoint, muted: bool) {
        if let Some(node) = self.nodes.write().get_mut(&endpoint) {
            node.muted = muted;
        }
    }

    /// Detach `endpoint`; later sends to it fail.
    pub fn detach(&self, endpoint: IdEndpoint) -> bool {
        self.nodes.write().remove(&endpoint).is_some()
    }

    /// Every block handed to the network so far, in send order.
    pub fn sent(&self) -> Vec<SentBlock> {
        self.log.lock().clone()
    }

    pub fn sent_to(&self, endpoint: IdEndpoint) -> Vec<SentBlock> {
        self.log
            .lock()
            .iter()
            .filter(|block| block.to == endpoint)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    fn deliver(&self, from: IdEndpoint, to: IdEndpoint, bytes: Vec<u8>) -> RuntimeResult<()> {
        let (runtime, latency, muted) = {
            let nodes = self.nodes.read();
            let node = nodes
                .get(&to)
                .ok_or_else(|| RuntimeError::Transport(format!("{to} is not reachable")))?;
            (node.runtime.clone(), node.latency, node.muted)
        };
        let runtime = runtime
            .upgrade()
            .ok_or_else(|| RuntimeError::Transport(format!("{to} has shut down")))?;
        self.log.lock().push(SentBlock {
            from,
            to,
            bytes: bytes.clone(),
        });
        if muted {
            trace!(%from, %to, "dropped block to muted endpoint");
            return Ok(());
        }
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            runtime.receive(bytes).await;
        });
        Ok(())
    }
}

struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    from: IdEndpoint,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, to: IdEndpoint, block: Vec<u8>) -> RuntimeResult<()> {
        self.network.deliver(self.from, to, block)
    }
}
