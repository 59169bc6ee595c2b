//! Outbound ports (SPI) for the overlay network.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::{ConnectionDirection, NetAddress, PeerId, ProtocolInfo};
use crate::events::{HandlerError, OverlayError, TransportError};

/// Upper-layer callback set bound to a group of protocols.
///
/// Callbacks run synchronously on the reader task of the peer that
/// triggered them: a slow reactor only stalls that peer.
pub trait Reactor: Send + Sync {
    /// Handles an inbound payload from the neighbour `from`.
    ///
    /// Returns whether a broadcast/multicast should be relayed further.
    /// An error is reported back through `on_failure` and counts against
    /// the sender's error rate.
    fn on_receive(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        from: PeerId,
    ) -> Result<bool, HandlerError>;

    /// A send or a delivery for `protocol` failed.
    fn on_failure(&self, error: &OverlayError, protocol: ProtocolInfo, payload: &[u8]);

    /// A peer took a slot in the topology.
    fn on_join(&self, peer: PeerId);

    /// A peer left the topology.
    fn on_leave(&self, peer: PeerId);
}

/// Boxed read half of a connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Authenticated, ordered byte stream to one remote node.
pub struct Connection {
    /// Identity of the remote node, established by the transport.
    pub peer_id: PeerId,
    /// Address the remote node listens on.
    pub net_address: NetAddress,
    pub direction: ConnectionDirection,
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_id", &self.peer_id)
            .field("net_address", &self.net_address)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

/// Raw byte-stream transport.
///
/// Dial/listen, authentication and encryption are the transport's job;
/// framing is the overlay's.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity of the local node.
    fn local_peer_id(&self) -> PeerId;

    /// Address the local node listens on.
    fn local_address(&self) -> NetAddress;

    /// Opens an outbound connection.
    async fn dial(&self, address: &NetAddress) -> Result<Connection, TransportError>;

    /// Waits for the next inbound connection.
    ///
    /// Returns `TransportError::Closed` once the transport stops listening.
    async fn accept(&self) -> Result<Connection, TransportError>;

    /// Stops listening.
    async fn shutdown(&self);
}
