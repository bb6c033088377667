//! In-process stand-in for the onion network.
//!
//! A [`MemoryNetwork`] routes rendezvous addresses to [`MemoryNode`]s, one per
//! daemon, and carries connections over `tokio::io::duplex` pipes. Nodes can be
//! taken offline to exercise the delivery retry paths.

use crate::transport::{Acceptor, BoxedStream, Dialer, Provisioner};
use crate::utils::{IdentityError, Result, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

/// Capacity of each in-memory pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// Shared routing table for in-process daemons
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<RoutingState>>,
    dial_attempts: Arc<AtomicUsize>,
}

#[derive(Default)]
struct RoutingState {
    next_node: usize,
    next_address: u64,
    routes: HashMap<String, usize>,
    listeners: HashMap<(usize, u16), mpsc::UnboundedSender<DuplexStream>>,
    offline: HashSet<usize>,
}

/// One daemon's attachment to a [`MemoryNetwork`]
pub struct MemoryNode {
    id: usize,
    network: MemoryNetwork,
    fail_provisioning: AtomicBool,
}

/// Inbound connections for one node and port
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new node
    pub fn node(&self) -> MemoryNode {
        let mut state = self.lock();
        let id = state.next_node;
        state.next_node += 1;

        MemoryNode {
            id,
            network: self.clone(),
            fail_provisioning: AtomicBool::new(false),
        }
    }

    /// Number of dials attempted so far, successful or not
    pub fn dial_attempts(&self) -> usize {
        self.dial_attempts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, RoutingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, address: &str, port: u16) -> Result<BoxedStream> {
        self.dial_attempts.fetch_add(1, Ordering::SeqCst);

        let unreachable = |reason: &str| TransportError::Dial {
            address: address.to_string(),
            port,
            reason: reason.to_string(),
        };

        let state = self.lock();
        let node = *state
            .routes
            .get(address)
            .ok_or_else(|| unreachable("unknown rendezvous address"))?;
        if state.offline.contains(&node) {
            return Err(unreachable("host unreachable").into());
        }
        let listener = state
            .listeners
            .get(&(node, port))
            .ok_or_else(|| unreachable("connection refused"))?;

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        listener
            .send(server)
            .map_err(|_| unreachable("listener closed"))?;

        Ok(Box::new(client))
    }
}

impl MemoryNode {
    /// Start accepting connections on `port` for every address of this node
    pub fn listen(&self, port: u16) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.network.lock().listeners.insert((self.id, port), tx);
        MemoryListener { incoming: rx }
    }

    /// Make every address of this node unreachable, or reachable again
    pub fn set_offline(&self, offline: bool) {
        let mut state = self.network.lock();
        if offline {
            state.offline.insert(self.id);
        } else {
            state.offline.remove(&self.id);
        }
    }

    /// Make address acquisition fail from now on
    pub fn fail_provisioning(&self, fail: bool) {
        self.fail_provisioning.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provisioner for MemoryNode {
    async fn acquire_address(&self) -> Result<String> {
        if self.fail_provisioning.load(Ordering::SeqCst) {
            return Err(IdentityError::Provisioning {
                reason: "provisioning disabled on this node".to_string(),
            }
            .into());
        }

        let mut state = self.network.lock();
        let address = format!("{:016x}.memory", state.next_address);
        state.next_address += 1;
        state.routes.insert(address.clone(), self.id);
        Ok(address)
    }
}

#[async_trait]
impl Dialer for MemoryNode {
    async fn dial(&self, address: &str, port: u16) -> Result<BoxedStream> {
        self.network.open(address, port)
    }
}

#[async_trait]
impl Dialer for MemoryNetwork {
    async fn dial(&self, address: &str, port: u16) -> Result<BoxedStream> {
        self.open(address, port)
    }
}

#[async_trait]
impl Acceptor for MemoryListener {
    async fn accept(&mut self) -> Result<BoxedStream> {
        match self.incoming.recv().await {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(TransportError::Cancelled.into()),
        }
    }
}
