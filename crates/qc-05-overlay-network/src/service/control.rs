//! Control protocol handling: role exchange, address gossip and the
//! parent/uncle request handshake.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::p2p::PeerToPeer;
use super::peer::Peer;
use crate::domain::{
    can_befriend, can_parent, link_allowed, CloseReason, ConnectionType, NetAddress, Packet,
    PeerRole,
};
use crate::events::ControlMessage;

impl PeerToPeer {
    pub(super) fn handle_control(self: &Arc<Self>, from: &Arc<Peer>, packet: &Packet) {
        let msg = match ControlMessage::decode(&packet.payload) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(peer = %from.id(), error = %e, "Bad control message");
                self.count_error(from);
                return;
            }
        };
        trace!(peer = %from.id(), ?msg, "Control message");

        match msg {
            ControlMessage::Query { role } => {
                if self.on_peer_role(from, role) {
                    let reply = self.query_result_for(from, role);
                    self.send_control(from, &reply);
                }
            }
            ControlMessage::QueryResult { role, roots, seeds } => {
                if self.on_peer_role(from, role) {
                    self.learn_addresses(roots, seeds);
                }
            }
            ControlMessage::ConnectionRequest { requested } => {
                let granted = self.grant_request(from, requested);
                self.send_control(
                    from,
                    &ControlMessage::ConnectionResponse { requested, granted },
                );
            }
            ControlMessage::ConnectionResponse { requested, granted } => {
                self.accept_response(from, requested, granted);
            }
        }
    }

    /// Records a peer's announced role. Returns `false` if the peer was
    /// disconnected as a result.
    fn on_peer_role(self: &Arc<Self>, peer: &Arc<Peer>, role: PeerRole) -> bool {
        let previous = peer.set_role(role);
        if previous != Some(role) {
            debug!(peer = %peer.id(), %role, previous = ?previous, "Peer role announced");
        }
        if !self.roles.read().admits(&peer.id(), role) {
            self.reject(peer);
            return false;
        }

        let local = self.role();
        match self.connection_type(&peer.id()) {
            Some(ct) if !link_allowed(local, role, ct) => {
                info!(peer = %peer.id(), %role, connection_type = %ct, "Link no longer valid");
                self.close_peer(peer, CloseReason::Surplus);
                return false;
            }
            Some(_) => {}
            None if can_befriend(local, role) => {
                self.classify(peer, ConnectionType::Friend);
            }
            None => {}
        }

        let address = peer.net_address().clone();
        if role.has_root() {
            self.known_roots.write().insert(address.clone());
        }
        if role.has_seed() {
            self.known_seeds.write().insert(address);
        }
        true
    }

    /// Address lists for a query answer. Roots are only shared with nodes
    /// that can use them.
    fn query_result_for(&self, requester: &Peer, requester_role: PeerRole) -> ControlMessage {
        let local = self.role();
        let collect = |known: &BTreeSet<NetAddress>, include_self: bool| {
            let mut out: Vec<NetAddress> = known
                .iter()
                .filter(|a| *a != requester.net_address())
                .cloned()
                .collect();
            if include_self {
                out.push(self.self_address.clone());
            }
            out
        };

        let roots = if requester_role.has_root() || requester_role.has_seed() {
            collect(&self.known_roots.read(), local.has_root())
        } else {
            Vec::new()
        };
        let seeds = collect(&self.known_seeds.read(), local.has_seed());
        ControlMessage::QueryResult {
            role: local,
            roots,
            seeds,
        }
    }

    fn learn_addresses(&self, roots: Vec<NetAddress>, seeds: Vec<NetAddress>) {
        let mut learned = 0;
        {
            let mut known = self.known_roots.write();
            for address in roots.into_iter().filter(|a| *a != self.self_address) {
                learned += usize::from(known.insert(address));
            }
        }
        {
            let mut known = self.known_seeds.write();
            for address in seeds.into_iter().filter(|a| *a != self.self_address) {
                learned += usize::from(known.insert(address));
            }
        }
        if learned > 0 {
            debug!(learned, "Learned peer addresses");
            self.schedule_repair();
        }
    }

    /// Upstream side of the handshake. Returns the connection type the
    /// requester should assign us.
    ///
    /// A parent request that finds the child slots full falls back to a
    /// nephew slot, so the requester still gains an uncle.
    fn grant_request(
        self: &Arc<Self>,
        from: &Arc<Peer>,
        requested: ConnectionType,
    ) -> Option<ConnectionType> {
        let local = self.role();
        let suitable = from.role().is_some_and(|role| can_parent(local, role));
        if !suitable {
            debug!(peer = %from.id(), %requested, role = ?from.role(), "Request from unsuitable peer");
            return None;
        }

        let current = self.connection_type(&from.id());
        let granted = match requested {
            ConnectionType::Parent if self.classify(from, ConnectionType::Child) => {
                Some(ConnectionType::Parent)
            }
            ConnectionType::Parent | ConnectionType::Uncle => {
                if current == Some(ConnectionType::Nephew)
                    || self.classify(from, ConnectionType::Nephew)
                {
                    Some(ConnectionType::Uncle)
                } else {
                    None
                }
            }
            _ => None,
        };
        debug!(peer = %from.id(), %requested, granted = ?granted, "Connection request handled");
        granted
    }

    /// Downstream side of the handshake.
    fn accept_response(
        self: &Arc<Self>,
        from: &Arc<Peer>,
        requested: ConnectionType,
        granted: Option<ConnectionType>,
    ) {
        from.take_pending_request();
        match granted {
            Some(ct @ (ConnectionType::Parent | ConnectionType::Uncle)) => {
                if ct != requested {
                    from.set_refused();
                }
                if !self.classify(from, ct) {
                    debug!(peer = %from.id(), connection_type = %ct, "Granted slot already full");
                    self.close_peer(from, CloseReason::Surplus);
                }
            }
            Some(other) => {
                debug!(peer = %from.id(), granted = %other, "Unexpected grant ignored");
            }
            None => {
                debug!(peer = %from.id(), %requested, "Connection request refused");
                from.set_refused();
            }
        }
        self.schedule_repair();
    }
}
