//! Inbound ports (API) for the overlay network.

use crate::domain::{
    BroadcastScope, Membership, NetAddress, PeerId, PeerInfo, PeerRole, ProtocolInfo,
    TopologyView,
};
use crate::events::OverlayError;

/// Primary API of the overlay, implemented by the network manager.
///
/// Send operations never block: they enqueue onto per-peer queues and
/// return. They must be called from within a Tokio runtime.
pub trait OverlayApi: Send + Sync {
    /// Sends to one directly connected peer.
    ///
    /// # Errors
    /// - `PeerNotFound` if the peer is not connected
    /// - `QueueOverflow` if its queue for the protocol's priority is full
    ///   (also reported through `on_failure`)
    fn unicast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        peer: PeerId,
    ) -> Result<(), OverlayError>;

    /// Sends to every node holding `role`, relayed across the overlay.
    fn multicast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        role: PeerRole,
    ) -> Result<(), OverlayError>;

    /// Floods (`All`) or sends to immediate neighbours (`Neighbor`).
    fn broadcast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        scope: BroadcastScope,
    ) -> Result<(), OverlayError>;

    /// Grants membership. Takes effect immediately.
    fn set_role(&self, membership: Membership, ids: &[PeerId]);

    /// Revokes membership, disconnecting peers that lose admission.
    fn remove_role(&self, membership: Membership, ids: &[PeerId]);

    /// Lists members.
    fn get_role(&self, membership: Membership) -> Vec<PeerId>;

    /// Effective role of the local node.
    fn role(&self) -> PeerRole;

    fn peer_id(&self) -> PeerId;

    fn address(&self) -> NetAddress;

    /// Snapshot of the local topology.
    fn topology(&self) -> TopologyView;

    /// Snapshot of every connected peer, classified or not.
    fn peers(&self) -> Vec<PeerInfo>;
}

/// Send side of a registered reactor, bound to its protocols.
pub trait ProtocolSender: Send + Sync {
    fn unicast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        peer: PeerId,
    ) -> Result<(), OverlayError>;

    fn multicast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        role: PeerRole,
    ) -> Result<(), OverlayError>;

    fn broadcast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        scope: BroadcastScope,
    ) -> Result<(), OverlayError>;
}
