//! # Overlay Events
//!
//! Topology and admission notifications published on an in-memory bus.

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::domain::{CloseReason, ConnectionType, PeerId, PeerRole};

/// Default bus capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Notification emitted by the overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OverlayEvent {
    /// A peer took a topology slot.
    PeerJoined {
        peer: PeerId,
        connection_type: ConnectionType,
    },
    /// A peer left the topology or was disconnected.
    PeerLeft { peer: PeerId, reason: CloseReason },
    /// Admission control rejected or evicted a peer.
    NotAllowed { peer: PeerId },
    /// A peer's drain path stalled and it was closed.
    NotAvailable { peer: PeerId },
    /// The local node's effective role changed.
    RoleChanged { role: PeerRole },
}

/// Broadcast bus for [`OverlayEvent`]s.
///
/// Uses `tokio::sync::broadcast`; slow subscribers lag instead of blocking
/// the overlay.
pub struct EventBus {
    sender: broadcast::Sender<OverlayEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Returns the number of subscribers reached.
    pub fn publish(&self, event: OverlayEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => {
                trace!(receivers, "Overlay event published");
                receivers
            }
            Err(e) => {
                debug!(event = ?e.0, "Overlay event dropped (no subscribers)");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
