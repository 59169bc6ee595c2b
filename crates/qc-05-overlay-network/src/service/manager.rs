//! # Network Manager
//!
//! Public entry point of the overlay. Wires the engine to a transport,
//! registers reactors and exposes [`OverlayApi`].
//!
//! ## Thread Safety
//!
//! `NetworkManager` and every [`ProtocolHandler`] it hands out are cheap to
//! clone and can be shared across tasks. All state lives in the engine
//! behind `Arc`.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::p2p::PeerToPeer;
use super::reactor::ReactorRegistry;
use crate::domain::{
    BroadcastScope, Membership, NetAddress, OverlayConfig, PeerId, PeerInfo, PeerRole,
    ProtocolInfo, TopologyLimits, TopologyView,
};
use crate::events::{OverlayError, OverlayEvent};
use crate::ports::{OverlayApi, ProtocolSender, Reactor, Transport};

/// Overlay network manager.
#[derive(Clone)]
pub struct NetworkManager {
    p2p: Arc<PeerToPeer>,
    reactors: Arc<ReactorRegistry>,
}

impl NetworkManager {
    /// Creates a stopped manager. `role` is the base role; membership lists
    /// may later narrow it.
    pub fn new(config: OverlayConfig, transport: Arc<dyn Transport>, role: PeerRole) -> Self {
        let reactors = Arc::new(ReactorRegistry::new());
        let p2p = Arc::new(PeerToPeer::new(
            config,
            transport,
            role,
            Arc::clone(&reactors),
        ));
        Self { p2p, reactors }
    }

    /// Binds `protocols` to `reactor`. Returns the send handle for them.
    ///
    /// # Errors
    /// See [`ReactorRegistry::register`].
    pub fn register_reactor(
        &self,
        name: &str,
        reactor: Arc<dyn Reactor>,
        protocols: &[ProtocolInfo],
        priority: u8,
    ) -> Result<ProtocolHandler, OverlayError> {
        self.reactors.register(name, reactor, protocols, priority)?;
        Ok(ProtocolHandler {
            name: name.to_string(),
            protocols: protocols.to_vec(),
            priority,
            p2p: Arc::clone(&self.p2p),
        })
    }

    pub fn start(&self) -> Result<(), OverlayError> {
        self.p2p.start()
    }

    pub async fn term(&self) {
        self.p2p.term().await;
    }

    pub fn is_running(&self) -> bool {
        self.p2p.is_running()
    }

    /// Connects to `address` outside the maintenance loop.
    pub async fn dial(&self, address: &NetAddress) -> Result<PeerId, OverlayError> {
        self.p2p.dial(address).await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OverlayEvent> {
        self.p2p.events().subscribe()
    }

    /// Changes slot limits. Peers over the new limits are dropped on the
    /// next maintenance pass.
    pub fn set_limits(&self, limits: TopologyLimits) {
        self.p2p.set_limits(limits);
    }

    pub fn config(&self) -> &OverlayConfig {
        self.p2p.config()
    }
}

impl OverlayApi for NetworkManager {
    fn unicast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        peer: PeerId,
    ) -> Result<(), OverlayError> {
        self.p2p.unicast(protocol, payload, peer)
    }

    fn multicast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        role: PeerRole,
    ) -> Result<(), OverlayError> {
        self.p2p.multicast(protocol, payload, role)
    }

    fn broadcast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        scope: BroadcastScope,
    ) -> Result<(), OverlayError> {
        self.p2p.broadcast(protocol, payload, scope)
    }

    fn set_role(&self, membership: Membership, ids: &[PeerId]) {
        self.p2p.set_role(membership, ids);
    }

    fn remove_role(&self, membership: Membership, ids: &[PeerId]) {
        self.p2p.remove_role(membership, ids);
    }

    fn get_role(&self, membership: Membership) -> Vec<PeerId> {
        self.p2p.members(membership)
    }

    fn role(&self) -> PeerRole {
        self.p2p.role()
    }

    fn peer_id(&self) -> PeerId {
        self.p2p.self_id
    }

    fn address(&self) -> NetAddress {
        self.p2p.self_address.clone()
    }

    fn topology(&self) -> TopologyView {
        self.p2p.topology_view()
    }

    fn peers(&self) -> Vec<PeerInfo> {
        self.p2p.peer_infos()
    }
}

/// Send handle of one reactor. Only the reactor's own protocols may be
/// sent through it.
#[derive(Clone)]
pub struct ProtocolHandler {
    name: String,
    protocols: Vec<ProtocolInfo>,
    priority: u8,
    p2p: Arc<PeerToPeer>,
}

impl ProtocolHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocols(&self) -> &[ProtocolInfo] {
        &self.protocols
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    fn check(&self, protocol: ProtocolInfo) -> Result<(), OverlayError> {
        if self.protocols.contains(&protocol) {
            Ok(())
        } else {
            Err(OverlayError::UnregisteredProtocol(protocol))
        }
    }
}

impl std::fmt::Debug for ProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolHandler")
            .field("name", &self.name)
            .field("protocols", &self.protocols)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl ProtocolSender for ProtocolHandler {
    fn unicast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        peer: PeerId,
    ) -> Result<(), OverlayError> {
        self.check(protocol)?;
        self.p2p.unicast(protocol, payload, peer)
    }

    fn multicast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        role: PeerRole,
    ) -> Result<(), OverlayError> {
        self.check(protocol)?;
        self.p2p.multicast(protocol, payload, role)
    }

    fn broadcast(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        scope: BroadcastScope,
    ) -> Result<(), OverlayError> {
        self.check(protocol)?;
        self.p2p.broadcast(protocol, payload, scope)
    }
}
