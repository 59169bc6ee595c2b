//! In-process transport over `tokio::io::duplex` pipes.
//!
//! Every [`MemoryTransport`] registers a listener on a shared
//! [`MemoryNetwork`] under its address; dialing an address hands the other
//! end of a fresh pipe to that listener. Used by tests and simulations.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::domain::{ConnectionDirection, NetAddress, PeerId};
use crate::events::TransportError;
use crate::ports::{Connection, Transport};

/// Pipe buffer size in bytes, per direction.
pub const DEFAULT_PIPE_BUFFER: usize = 64 * 1024;

struct Listener {
    peer_id: PeerId,
    incoming: mpsc::UnboundedSender<Connection>,
}

/// Shared registry of in-process listeners.
pub struct MemoryNetwork {
    listeners: Mutex<HashMap<NetAddress, Listener>>,
    pipe_buffer: usize,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Self::with_pipe_buffer(DEFAULT_PIPE_BUFFER)
    }

    /// Small buffers make a stalled reader back-pressure the writer sooner.
    pub fn with_pipe_buffer(pipe_buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            pipe_buffer,
        })
    }

    /// Creates a transport listening on `address`.
    pub fn transport(self: &Arc<Self>, peer_id: PeerId, address: NetAddress) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().insert(
            address.clone(),
            Listener {
                peer_id,
                incoming: tx,
            },
        );
        MemoryTransport {
            network: Arc::clone(self),
            peer_id,
            address,
            incoming: tokio::sync::Mutex::new(rx),
        }
    }

    fn connect(
        &self,
        from: PeerId,
        from_address: &NetAddress,
        to: &NetAddress,
    ) -> Result<Connection, TransportError> {
        let listeners = self.listeners.lock();
        let listener = listeners
            .get(to)
            .ok_or_else(|| TransportError::Unreachable(to.clone()))?;

        let (local, remote) = tokio::io::duplex(self.pipe_buffer);
        let (local_reader, local_writer) = tokio::io::split(local);
        let (remote_reader, remote_writer) = tokio::io::split(remote);

        listener
            .incoming
            .send(Connection {
                peer_id: from,
                net_address: from_address.clone(),
                direction: ConnectionDirection::Inbound,
                reader: Box::new(remote_reader),
                writer: Box::new(remote_writer),
            })
            .map_err(|_| TransportError::Unreachable(to.clone()))?;

        trace!(from = %from_address, to = %to, "Memory pipe opened");
        Ok(Connection {
            peer_id: listener.peer_id,
            net_address: to.clone(),
            direction: ConnectionDirection::Outbound,
            reader: Box::new(local_reader),
            writer: Box::new(local_writer),
        })
    }

    pub fn is_listening(&self, address: &NetAddress) -> bool {
        self.listeners.lock().contains_key(address)
    }
}

/// One node's endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    peer_id: PeerId,
    address: NetAddress,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Connection>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn local_address(&self) -> NetAddress {
        self.address.clone()
    }

    async fn dial(&self, address: &NetAddress) -> Result<Connection, TransportError> {
        self.network.connect(self.peer_id, &self.address, address)
    }

    async fn accept(&self) -> Result<Connection, TransportError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    /// Unregisters the listener. Dropping its sender ends `accept`.
    async fn shutdown(&self) {
        self.network.listeners.lock().remove(&self.address);
    }
}
