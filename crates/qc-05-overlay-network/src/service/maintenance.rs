//! # Topology Maintenance
//!
//! Runs every seed period and whenever a repair is scheduled (peer loss,
//! refused request, new addresses). Each pass:
//!
//! 1. re-derives the local role and re-checks admission
//! 2. drops orphans that never took a slot and peers over quota
//! 3. roots: dials every known root not yet connected
//!    (each address at most once per seed period, never a barred one)
//! 4. non-roots: fills parent then uncle slots, promoting an uncle to
//!    parent before asking strangers
//! 5. refreshes upstream roles and verifies the topology invariants

use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, warn};

use super::p2p::PeerToPeer;
use super::peer::Peer;
use crate::domain::{
    can_parent, check_all_invariants, quota_for, CloseReason, ConnectionType, NetAddress, PeerId,
};
use crate::events::ControlMessage;

impl PeerToPeer {
    pub(super) async fn run_maintenance(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let period = self.config().seed_period();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = self.repair.notified() => {}
                _ = tokio::time::sleep(period) => {}
            }
            if !self.is_running() {
                break;
            }
            self.maintain();
        }
        debug!("Maintenance loop stopped");
    }

    /// One maintenance pass.
    pub fn maintain(self: &Arc<Self>) {
        self.reconcile_role();
        self.recheck_admission();
        self.expire_orphans();
        self.drop_surplus();

        if self.role().has_root() {
            self.mesh_roots();
        } else {
            self.fill_upstream(ConnectionType::Parent);
            self.fill_upstream(ConnectionType::Uncle);
        }

        if self.peers.read().is_empty() {
            for seed in &self.config().seeds {
                if self.may_dial(seed) {
                    self.spawn_dial(seed.clone());
                }
            }
        }

        self.refresh_upstream();
        self.prune_dial_attempts();
        self.check_invariants();
    }

    fn unclassified(&self) -> Vec<Arc<Peer>> {
        let peers = self.peers.read();
        let topology = self.topology.read();
        peers
            .values()
            .filter(|p| topology.connection_type(&p.id()).is_none())
            .cloned()
            .collect()
    }

    fn has_fresh_request(&self, peer: &Peer) -> bool {
        let timeout = self.config().dial_timeout();
        peer.pending_request()
            .is_some_and(|r| r.sent_at.elapsed() < timeout)
    }

    fn expire_orphans(self: &Arc<Self>) {
        let timeout = self.config().orphan_timeout();
        for peer in self.unclassified() {
            if peer.age() > timeout && !self.has_fresh_request(&peer) {
                debug!(peer = %peer.id(), age_ms = peer.age().as_millis() as u64, "Orphan expired");
                self.close_peer(&peer, CloseReason::Orphaned);
            }
        }
    }

    /// Closes peers beyond the slot limits or in slots the local role has
    /// no quota for.
    fn drop_surplus(self: &Arc<Self>) {
        let role = self.role();
        let doomed: Vec<PeerId> = {
            let topology = self.topology.read();
            let limits = topology.limits();
            topology
                .surplus()
                .into_iter()
                .chain(
                    topology
                        .links()
                        .into_iter()
                        .filter(|(_, ct)| quota_for(role, limits, *ct) == 0),
                )
                .map(|(id, _)| id)
                .collect()
        };
        for id in doomed {
            if let Some(peer) = self.peer(&id) {
                debug!(peer = %id, "Dropping surplus link");
                self.close_peer(&peer, CloseReason::Surplus);
            }
        }
    }

    fn mesh_roots(self: &Arc<Self>) {
        let targets: Vec<NetAddress> = self.known_roots.read().iter().cloned().collect();
        for address in targets {
            if self.may_dial(&address) {
                self.spawn_dial(address);
            }
        }
    }

    /// Fills a parent or uncle slot: asks a connected candidate, otherwise
    /// dials a new one.
    fn fill_upstream(self: &Arc<Self>, ct: ConnectionType) {
        if !self.topology.read().has_room(ct) {
            return;
        }
        let timeout = self.config().dial_timeout();
        let requesting = self.peers.read().values().any(|p| {
            p.pending_request()
                .is_some_and(|r| r.requested == ct && r.sent_at.elapsed() < timeout)
        });
        if requesting {
            return;
        }

        let local = self.role();
        let refusal_memory = self.config().orphan_timeout();
        let suitable = |peer: &Arc<Peer>| {
            !peer.was_refused(refusal_memory)
                && peer.role().is_some_and(|role| can_parent(role, local))
        };

        let promotable = if ct == ConnectionType::Parent {
            let peers = self.peers.read();
            let uncles = self.topology.read().members(ConnectionType::Uncle);
            uncles
                .iter()
                .filter_map(|id| peers.get(id).cloned())
                .find(|p| suitable(p))
        } else {
            None
        };
        let candidate = promotable.or_else(|| {
            self.unclassified()
                .into_iter()
                .find(|p| suitable(p) && !self.has_fresh_request(p))
        });

        match candidate {
            Some(peer) => {
                debug!(peer = %peer.id(), requested = %ct, "Requesting upstream slot");
                peer.set_pending_request(ct);
                self.send_control(&peer, &ControlMessage::ConnectionRequest { requested: ct });
            }
            None => self.dial_upstream_candidate(),
        }
    }

    /// Dials one random address able to serve as upstream. Seeds look for
    /// roots, citizens for seeds; configured seeds are the last resort.
    fn dial_upstream_candidate(self: &Arc<Self>) {
        if !self.dialing.lock().is_empty() {
            return;
        }
        let known = if self.role().has_seed() {
            self.known_roots.read().clone()
        } else {
            self.known_seeds.read().clone()
        };
        let fresh = |address: &&NetAddress| self.may_dial(address);

        let mut candidates: Vec<&NetAddress> = known.iter().filter(&fresh).collect();
        if candidates.is_empty() {
            candidates = self.config().seeds.iter().filter(&fresh).collect();
        }
        if let Some(address) = candidates.choose(&mut rand::thread_rng()) {
            debug!(%address, "Dialing upstream candidate");
            self.spawn_dial((*address).clone());
        }
    }

    fn refresh_upstream(&self) {
        let role = self.role();
        let upstream: Vec<Arc<Peer>> = {
            let peers = self.peers.read();
            let topology = self.topology.read();
            [
                ConnectionType::Friend,
                ConnectionType::Parent,
                ConnectionType::Uncle,
            ]
            .into_iter()
            .flat_map(|ct| topology.members(ct))
            .filter_map(|id| peers.get(&id).cloned())
            .collect()
        };
        for peer in &upstream {
            self.send_control(peer, &ControlMessage::Query { role });
        }
    }

    fn check_invariants(&self) {
        let peers = self.peers.read();
        let topology = self.topology.read();
        let view = topology.view(self.role());
        let limits = topology.limits();
        if let Err(violation) =
            check_all_invariants(&view, &limits, |id| peers.get(id).and_then(|p| p.role()))
        {
            warn!(?violation, role = %view.role, "Topology invariant violated");
        }
    }
}
