//! Events and error types for the overlay network.

use thiserror::Error;

use crate::domain::{NetAddress, PacketError, PeerId, ProtocolInfo};

pub mod control;
pub mod notification;

pub use control::*;
pub use notification::*;

/// Overlay errors.
///
/// `Clone` so one failure can be reported to a reactor and published as an
/// event.
#[derive(Clone, Debug, Error)]
pub enum OverlayError {
    #[error("Queue overflow towards peer {0}")]
    QueueOverflow(PeerId),

    #[error("Peer not available: {0}")]
    NotAvailable(PeerId),

    #[error("Peer not allowed: {0}")]
    NotAllowed(PeerId),

    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Unregistered protocol: {0}")]
    UnregisteredProtocol(ProtocolInfo),

    #[error("Protocol already registered: {0}")]
    DuplicateProtocol(ProtocolInfo),

    #[error("Reactor already registered: {0}")]
    DuplicateReactor(String),

    #[error("Reserved protocol family: {0}")]
    ReservedProtocol(ProtocolInfo),

    #[error("Invalid priority: {0}")]
    InvalidPriority(u8),

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Malformed packet: {0}")]
    Packet(#[from] PacketError),

    #[error("Malformed control message: {0}")]
    Control(String),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Dial timeout: {0}")]
    DialTimeout(NetAddress),

    #[error("Dial already in progress: {0}")]
    DialInProgress(NetAddress),

    #[error("Connection to self rejected")]
    SelfConnection,

    #[error("Network manager already started")]
    AlreadyStarted,

    #[error("Network manager not started")]
    NotStarted,
}

/// Error returned by a reactor's `on_receive`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Transport-level failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Address unreachable: {0}")]
    Unreachable(NetAddress),

    #[error("Transport closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}
