//! # Topology Engine
//!
//! `PeerToPeer` owns every live [`Peer`], the topology slots and the
//! dissemination algorithms. The control protocol lives in `control.rs`
//! and the repair loop in `maintenance.rs`; both extend this type.
//!
//! ## Locking
//!
//! `peers` → `topology` → `roles`, never held across an `.await` and
//! never held while a reactor callback runs. Fan-outs snapshot the
//! targets first and enqueue afterwards.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, trace, warn};

use super::peer::{run_reader, run_writer, Peer};
use super::reactor::{ReactorEntry, ReactorRegistry};
use crate::domain::{
    broadcast_links, link_allowed, multicast_links, BroadcastScope, CloseReason, ConnectionType,
    Destination, Direction, Membership, NetAddress, OverlayConfig, Packet, PacketError,
    PacketFingerprinter, PacketHeader, PeerId, PeerInfo, PeerRole, ProtocolInfo, RoleRegistry,
    SeenPacketCache, Topology, TopologyLimits, TopologyView, HEADER_LEN, MAX_PRIORITY,
    TTL_LAST_HOP, TTL_UNBOUNDED,
};
use crate::events::{
    ControlMessage, EventBus, OverlayError, OverlayEvent, TransportError, CONTROL_PRIORITY,
    CONTROL_PROTOCOL,
};
use crate::ports::{Connection, Transport};

pub struct PeerToPeer {
    pub(super) self_id: PeerId,
    pub(super) self_address: NetAddress,
    pub(super) base_role: PeerRole,
    pub(super) role: RwLock<PeerRole>,
    config: OverlayConfig,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
    pub(super) topology: RwLock<Topology>,
    pub(super) roles: RwLock<RoleRegistry>,
    pub(super) known_roots: RwLock<BTreeSet<NetAddress>>,
    pub(super) known_seeds: RwLock<BTreeSet<NetAddress>>,
    pub(super) dialing: Mutex<HashSet<NetAddress>>,
    /// Last dial attempt per address.
    pub(super) dial_attempts: Mutex<HashMap<NetAddress, Instant>>,
    /// Addresses of peers refused by admission control. Cleared whenever
    /// the allow-lists change.
    pub(super) barred: Mutex<HashSet<NetAddress>>,
    seen: SeenPacketCache,
    fingerprinter: PacketFingerprinter,
    /// Origin sequence of the next broadcast/multicast.
    sequence: AtomicU32,
    pub(super) reactors: Arc<ReactorRegistry>,
    pub(super) events: EventBus,
    pub(super) repair: Notify,
    pub(super) shutdown: watch::Sender<bool>,
    pub(super) running: AtomicBool,
}

impl PeerToPeer {
    pub fn new(
        config: OverlayConfig,
        transport: Arc<dyn Transport>,
        base_role: PeerRole,
        reactors: Arc<ReactorRegistry>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            self_id: transport.local_peer_id(),
            self_address: transport.local_address(),
            base_role,
            role: RwLock::new(base_role),
            topology: RwLock::new(Topology::new(config.limits())),
            seen: SeenPacketCache::new(config.seen_cache_size),
            fingerprinter: PacketFingerprinter::random(),
            sequence: AtomicU32::new(rand::random()),
            config,
            transport,
            peers: RwLock::new(HashMap::new()),
            roles: RwLock::new(RoleRegistry::new()),
            known_roots: RwLock::new(BTreeSet::new()),
            known_seeds: RwLock::new(BTreeSet::new()),
            dialing: Mutex::new(HashSet::new()),
            dial_attempts: Mutex::new(HashMap::new()),
            barred: Mutex::new(HashSet::new()),
            reactors,
            events: EventBus::new(),
            repair: Notify::new(),
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn role(&self) -> PeerRole {
        *self.role.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peer(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.read().get(id).cloned()
    }

    pub fn topology_view(&self) -> TopologyView {
        self.topology.read().view(self.role())
    }

    pub fn peer_infos(&self) -> Vec<PeerInfo> {
        let peers: Vec<_> = self.peers.read().values().cloned().collect();
        let topology = self.topology.read();
        peers
            .iter()
            .map(|p| p.info(topology.connection_type(&p.id())))
            .collect()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn schedule_repair(&self) {
        self.repair.notify_one();
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Adopts a transport connection as a peer.
    ///
    /// Duplicate connections between the same pair are resolved on both
    /// ends the same way: the connection dialed by the smaller `PeerId`
    /// survives.
    pub fn register_connection(self: &Arc<Self>, conn: Connection) -> Result<PeerId, OverlayError> {
        let id = conn.peer_id;
        if id == self.self_id {
            return Err(OverlayError::SelfConnection);
        }
        if !self.is_running() {
            return Err(OverlayError::NotStarted);
        }
        if !self.roles.read().is_connectable(&id) {
            warn!(peer = %id, address = %conn.net_address, "Connection not allowed");
            self.barred.lock().insert(conn.net_address.clone());
            self.events.publish(OverlayEvent::NotAllowed { peer: id });
            return Err(OverlayError::NotAllowed(id));
        }

        let peer = Arc::new(Peer::new(
            id,
            conn.net_address.clone(),
            conn.direction,
            &self.config,
        ));
        let replaced = {
            let mut peers = self.peers.write();
            match peers.get(&id) {
                Some(existing) => {
                    let winner = self.self_id.min(id);
                    let keep_new = peer.dialer(self.self_id) != existing.dialer(self.self_id)
                        && peer.dialer(self.self_id) == winner;
                    if !keep_new {
                        debug!(peer = %id, direction = ?conn.direction, "Duplicate connection dropped");
                        return Ok(id);
                    }
                    peers.insert(id, Arc::clone(&peer))
                }
                None => {
                    peers.insert(id, Arc::clone(&peer));
                    None
                }
            }
        };

        let engine = Arc::clone(self);
        tokio::spawn(run_reader(Arc::clone(&peer), conn.reader, engine));
        let engine = Arc::clone(self);
        tokio::spawn(run_writer(
            Arc::clone(&peer),
            conn.writer,
            engine,
            self.config.detection_window(),
        ));
        peer.mark_connected();

        if let Some(old) = replaced {
            debug!(peer = %id, "Replacing duplicate connection");
            if let Some(role) = old.role() {
                peer.set_role(role);
            }
            old.close(CloseReason::Duplicate);
            old.mark_closed();
            for packet in old.drain_queue() {
                let priority = self.priority_for(packet.protocol);
                if let Err(e) = peer.send(priority, packet.clone()) {
                    self.report_undelivered_with(&e, &packet);
                }
            }
        }

        info!(
            peer = %id,
            address = %peer.net_address(),
            direction = ?peer.direction(),
            "Peer connected"
        );
        self.send_control(&peer, &ControlMessage::Query { role: self.role() });
        self.schedule_repair();
        Ok(id)
    }

    /// Closes a peer, vacates its slot and reports what it still held.
    pub fn close_peer(self: &Arc<Self>, peer: &Arc<Peer>, reason: CloseReason) {
        if !peer.close(reason) {
            return;
        }
        let id = peer.id();
        let removed = {
            let mut peers = self.peers.write();
            match peers.get(&id) {
                Some(current) if Arc::ptr_eq(current, peer) => {
                    peers.remove(&id);
                    true
                }
                _ => false,
            }
        };
        peer.mark_closed();
        if !removed {
            return;
        }

        let slot = self.topology.write().remove(&id);
        match reason {
            CloseReason::Terminate | CloseReason::Duplicate => {
                debug!(peer = %id, %reason, slot = ?slot, "Peer closed")
            }
            _ => info!(peer = %id, %reason, slot = ?slot, "Peer closed"),
        }

        if slot.is_some() {
            self.reactors.notify_leave(id);
        }
        if reason == CloseReason::NotAvailable {
            self.events.publish(OverlayEvent::NotAvailable { peer: id });
        }
        self.events.publish(OverlayEvent::PeerLeft { peer: id, reason });

        if reason != CloseReason::Terminate {
            for packet in peer.drain_queue() {
                self.report_undelivered(peer, &packet);
            }
            self.schedule_repair();
        }
    }

    /// Admission-control rejection of a connected peer.
    pub(super) fn reject(self: &Arc<Self>, peer: &Arc<Peer>) {
        warn!(peer = %peer.id(), role = ?peer.role(), "Peer not allowed");
        self.barred.lock().insert(peer.net_address().clone());
        self.events.publish(OverlayEvent::NotAllowed { peer: peer.id() });
        self.close_peer(peer, CloseReason::NotAllowed);
    }

    /// Places a live peer into a slot. Fails for full slots or peers that
    /// closed meanwhile.
    pub(super) fn classify(&self, peer: &Arc<Peer>, ct: ConnectionType) -> bool {
        let id = peer.id();
        let (placed, previous) = {
            let peers = self.peers.read();
            if !peers.get(&id).is_some_and(|p| Arc::ptr_eq(p, peer)) {
                return false;
            }
            let mut topology = self.topology.write();
            let previous = topology.connection_type(&id);
            (topology.classify(id, ct), previous)
        };
        if placed && previous != Some(ct) {
            info!(peer = %id, connection_type = %ct, previous = ?previous, "Peer classified");
            self.events.publish(OverlayEvent::PeerJoined {
                peer: id,
                connection_type: ct,
            });
            if previous.is_none() {
                self.reactors.notify_join(id);
            }
        }
        placed
    }

    pub(super) fn connection_type(&self, id: &PeerId) -> Option<ConnectionType> {
        self.topology.read().connection_type(id)
    }

    // =========================================================================
    // Dissemination
    // =========================================================================

    fn priority_for(&self, protocol: ProtocolInfo) -> u8 {
        if protocol.is_control() {
            CONTROL_PRIORITY
        } else {
            self.reactors
                .priority_of(protocol)
                .unwrap_or(MAX_PRIORITY)
        }
    }

    fn next_seq(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn prepare(&self, protocol: ProtocolInfo, payload: &[u8]) -> Result<u8, OverlayError> {
        if payload.len() > self.config.max_payload_bytes {
            return Err(OverlayError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_bytes,
            });
        }
        self.reactors.priority_of(protocol)
    }

    pub fn unicast(
        self: &Arc<Self>,
        protocol: ProtocolInfo,
        payload: &[u8],
        target: PeerId,
    ) -> Result<(), OverlayError> {
        let priority = self.prepare(protocol, payload)?;
        let peer = self
            .peer(&target)
            .ok_or(OverlayError::PeerNotFound(target))?;
        let packet = Packet::new(
            protocol,
            self.self_id,
            Destination::Peer,
            TTL_LAST_HOP,
            payload.to_vec(),
        );
        peer.send(priority, packet).inspect_err(|e| {
            debug!(peer = %target, %protocol, error = %e, "Unicast failed");
            self.reactors.report_failure(e, protocol, payload);
        })
    }

    pub fn multicast(
        self: &Arc<Self>,
        protocol: ProtocolInfo,
        payload: &[u8],
        target: PeerRole,
    ) -> Result<(), OverlayError> {
        let priority = self.prepare(protocol, payload)?;
        let packet = Packet::new(
            protocol,
            self.self_id,
            Destination::Role(target),
            TTL_UNBOUNDED,
            payload.to_vec(),
        )
        .with_seq(self.next_seq());
        let fingerprint = self.fingerprinter.fingerprint(&packet);
        self.seen.observe(fingerprint, None);
        let links = multicast_links(self.role(), target, Direction::Local);
        self.fan_out(&packet, priority, &links, None, fingerprint);
        Ok(())
    }

    pub fn broadcast(
        self: &Arc<Self>,
        protocol: ProtocolInfo,
        payload: &[u8],
        scope: BroadcastScope,
    ) -> Result<(), OverlayError> {
        let priority = self.prepare(protocol, payload)?;
        let ttl = match scope {
            BroadcastScope::All => TTL_UNBOUNDED,
            BroadcastScope::Neighbor => TTL_LAST_HOP,
        };
        let packet = Packet::new(protocol, self.self_id, Destination::All, ttl, payload.to_vec())
            .with_seq(self.next_seq());
        let fingerprint = self.fingerprinter.fingerprint(&packet);
        self.seen.observe(fingerprint, None);
        self.fan_out(&packet, priority, &broadcast_links(), None, fingerprint);
        Ok(())
    }

    /// Enqueues `packet` on every peer in `links`, except `exclude`.
    ///
    /// Primary links are served immediately; uncles and nephews after the
    /// alternate send period, skipping peers the packet already came from.
    /// A failure is reported once per batch to the owning reactor.
    fn fan_out(
        self: &Arc<Self>,
        packet: &Packet,
        priority: u8,
        links: &[ConnectionType],
        exclude: Option<PeerId>,
        fingerprint: u64,
    ) {
        let (primary, alternate) = {
            let peers = self.peers.read();
            let topology = self.topology.read();
            let mut primary = Vec::new();
            let mut alternate = Vec::new();
            for ct in links {
                for id in topology.members(*ct) {
                    if Some(id) == exclude {
                        continue;
                    }
                    if let Some(peer) = peers.get(&id) {
                        if ct.is_alternate() {
                            alternate.push(Arc::clone(peer));
                        } else {
                            primary.push(Arc::clone(peer));
                        }
                    }
                }
            }
            (primary, alternate)
        };

        trace!(
            protocol = %packet.protocol,
            primary = primary.len(),
            alternate = alternate.len(),
            "Fan-out"
        );
        self.send_batch(&primary, priority, packet, None);

        if !alternate.is_empty() {
            let engine = Arc::clone(self);
            let packet = packet.clone();
            let delay = self.config.alternate_send_period();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                engine.send_batch(&alternate, priority, &packet, Some(fingerprint));
            });
        }
    }

    fn send_batch(
        &self,
        targets: &[Arc<Peer>],
        priority: u8,
        packet: &Packet,
        skip_senders_of: Option<u64>,
    ) {
        let mut failure = None;
        for peer in targets {
            if skip_senders_of.is_some_and(|fp| self.seen.received_from(fp, &peer.id())) {
                continue;
            }
            if let Err(e) = peer.send(priority, packet.clone()) {
                debug!(peer = %peer.id(), protocol = %packet.protocol, error = %e, "Send failed");
                failure.get_or_insert(e);
            }
        }
        if let Some(e) = failure {
            self.reactors
                .report_failure(&e, packet.protocol, &packet.payload);
        }
    }

    pub(super) fn send_control(&self, peer: &Arc<Peer>, msg: &ControlMessage) {
        let payload = match msg.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Control message encoding failed");
                return;
            }
        };
        let packet = Packet::new(
            CONTROL_PROTOCOL,
            self.self_id,
            Destination::Peer,
            TTL_LAST_HOP,
            payload,
        );
        if let Err(e) = peer.send(CONTROL_PRIORITY, packet) {
            debug!(peer = %peer.id(), error = %e, "Control message not queued");
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Dispatches one inbound packet. Runs on the peer's reader task.
    pub fn handle_packet(self: &Arc<Self>, from: &Arc<Peer>, packet: Packet) {
        if packet.protocol.is_control() {
            self.handle_control(from, &packet);
            return;
        }
        let Some(entry) = self.reactors.lookup(packet.protocol) else {
            debug!(peer = %from.id(), protocol = %packet.protocol, "Unregistered protocol");
            return;
        };

        match packet.dest {
            Destination::Peer => {
                self.deliver(from, &entry, &packet);
            }
            Destination::All => {
                let fingerprint = self.fingerprinter.fingerprint(&packet);
                if !self.seen.observe(fingerprint, Some(from.id())) {
                    trace!(peer = %from.id(), protocol = %packet.protocol, "Duplicate broadcast");
                    return;
                }
                if self.deliver(from, &entry, &packet) {
                    if let Some(next) = packet.next_hop() {
                        self.fan_out(
                            &next,
                            entry.priority,
                            &broadcast_links(),
                            Some(from.id()),
                            fingerprint,
                        );
                    }
                }
            }
            Destination::Role(target) => {
                let fingerprint = self.fingerprinter.fingerprint(&packet);
                if !self.seen.observe(fingerprint, Some(from.id())) {
                    trace!(peer = %from.id(), protocol = %packet.protocol, "Duplicate multicast");
                    return;
                }
                let local = self.role();
                let relay = !local.matches(target) || self.deliver(from, &entry, &packet);
                if relay {
                    if let Some(next) = packet.next_hop() {
                        let direction = Direction::of_sender(self.connection_type(&from.id()));
                        let links = multicast_links(local, target, direction);
                        self.fan_out(&next, entry.priority, &links, Some(from.id()), fingerprint);
                    }
                }
            }
        }
    }

    /// Hands a payload to its reactor. Returns the relay verdict.
    fn deliver(self: &Arc<Self>, from: &Arc<Peer>, entry: &ReactorEntry, packet: &Packet) -> bool {
        match entry
            .reactor
            .on_receive(packet.protocol, &packet.payload, from.id())
        {
            Ok(relay) => relay,
            Err(e) => {
                let error = OverlayError::Handler(e);
                debug!(
                    peer = %from.id(),
                    reactor = %entry.name,
                    protocol = %packet.protocol,
                    %error,
                    "Handler failed"
                );
                entry
                    .reactor
                    .on_failure(&error, packet.protocol, &packet.payload);
                self.count_error(from);
                false
            }
        }
    }

    /// Frame whose header failed validation. The stream stays in sync, so
    /// only the error rate is affected.
    pub fn handle_malformed(
        self: &Arc<Self>,
        from: &Arc<Peer>,
        header: &[u8; HEADER_LEN],
        error: PacketError,
        payload: &[u8],
    ) {
        let protocol = PacketHeader::raw_protocol(header);
        warn!(peer = %from.id(), %protocol, %error, "Malformed packet");
        self.reactors
            .report_failure(&OverlayError::Packet(error), protocol, payload);
        self.count_error(from);
    }

    pub(super) fn count_error(self: &Arc<Self>, peer: &Arc<Peer>) {
        if peer.record_error() {
            warn!(peer = %peer.id(), threshold = self.config.error_threshold, "Error rate exceeded");
            self.close_peer(peer, CloseReason::ErrorRate);
        }
    }

    /// Reports a packet the peer could not deliver.
    pub(super) fn report_undelivered(&self, peer: &Peer, packet: &Packet) {
        self.report_undelivered_with(&OverlayError::NotAvailable(peer.id()), packet);
    }

    fn report_undelivered_with(&self, error: &OverlayError, packet: &Packet) {
        if packet.protocol.is_control() {
            return;
        }
        self.reactors
            .report_failure(error, packet.protocol, &packet.payload);
    }
}

// =============================================================================
// Lifecycle and admission control
// =============================================================================

impl PeerToPeer {
    /// Starts the accept loop, the maintenance loop and the seed dials.
    pub fn start(self: &Arc<Self>) -> Result<(), OverlayError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OverlayError::AlreadyStarted);
        }
        self.reconcile_role();
        info!(
            peer_id = %self.self_id,
            address = %self.self_address,
            role = %self.role(),
            seeds = self.config.seeds.len(),
            "Overlay started"
        );

        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    result = engine.transport.accept() => match result {
                        Ok(conn) => {
                            let address = conn.net_address.clone();
                            if let Err(e) = engine.register_connection(conn) {
                                debug!(%address, error = %e, "Inbound connection rejected");
                            }
                        }
                        Err(TransportError::Closed) => break,
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
            }
            debug!("Accept loop stopped");
        });

        tokio::spawn(Arc::clone(self).run_maintenance());

        for seed in self.config.seeds.clone() {
            self.spawn_dial(seed);
        }
        Ok(())
    }

    /// Closes every peer and stops the transport.
    pub async fn term(self: &Arc<Self>) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        let peers: Vec<_> = self.peers.read().values().cloned().collect();
        for peer in &peers {
            self.close_peer(peer, CloseReason::Terminate);
        }
        self.transport.shutdown().await;
        info!(peer_id = %self.self_id, closed = peers.len(), "Overlay terminated");
    }

    /// Dials `address` and adopts the resulting connection.
    pub async fn dial(self: &Arc<Self>, address: &NetAddress) -> Result<PeerId, OverlayError> {
        if *address == self.self_address {
            return Err(OverlayError::SelfConnection);
        }
        if !self.is_running() {
            return Err(OverlayError::NotStarted);
        }
        if !self.dialing.lock().insert(address.clone()) {
            return Err(OverlayError::DialInProgress(address.clone()));
        }
        self.dial_attempts
            .lock()
            .insert(address.clone(), Instant::now());
        let result = tokio::time::timeout(self.config.dial_timeout(), self.transport.dial(address)).await;
        self.dialing.lock().remove(address);

        let conn = match result {
            Ok(conn) => conn?,
            Err(_) => return Err(OverlayError::DialTimeout(address.clone())),
        };
        self.register_connection(conn)
    }

    pub(super) fn spawn_dial(self: &Arc<Self>, address: NetAddress) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine.dial(&address).await {
                Ok(peer) => debug!(%peer, %address, "Dial succeeded"),
                Err(OverlayError::DialInProgress(_)) => {}
                Err(e) => debug!(%address, error = %e, "Dial failed"),
            }
        });
    }

    pub(super) fn is_connected_to(&self, address: &NetAddress) -> bool {
        self.peers
            .read()
            .values()
            .any(|p| p.net_address() == address)
    }

    pub(super) fn is_dialing(&self, address: &NetAddress) -> bool {
        self.dialing.lock().contains(address)
    }

    /// Whether maintenance may dial `address` now: not self, not connected
    /// or being dialed, not barred, and not attempted within the last
    /// seed period.
    pub(super) fn may_dial(&self, address: &NetAddress) -> bool {
        if *address == self.self_address
            || self.is_connected_to(address)
            || self.is_dialing(address)
            || self.barred.lock().contains(address)
        {
            return false;
        }
        let backoff = self.config.seed_period();
        self.dial_attempts
            .lock()
            .get(address)
            .map_or(true, |at| at.elapsed() >= backoff)
    }

    /// Forgets dial attempts old enough to no longer hold anything back.
    pub(super) fn prune_dial_attempts(&self) {
        let backoff = self.config.seed_period();
        self.dial_attempts
            .lock()
            .retain(|_, at| at.elapsed() < backoff);
    }

    pub fn set_limits(&self, limits: TopologyLimits) {
        self.topology.write().set_limits(limits);
        self.schedule_repair();
    }

    /// Grants membership and re-evaluates admission at once.
    pub fn set_role(self: &Arc<Self>, membership: Membership, ids: &[PeerId]) {
        let added = self.roles.write().grant(membership, ids);
        if !added.is_empty() {
            info!(?membership, added = added.len(), "Membership granted");
            self.apply_roles();
        }
    }

    /// Revokes membership and re-evaluates admission at once.
    pub fn remove_role(self: &Arc<Self>, membership: Membership, ids: &[PeerId]) {
        let removed = self.roles.write().revoke(membership, ids);
        if !removed.is_empty() {
            info!(?membership, removed = removed.len(), "Membership revoked");
            self.apply_roles();
        }
    }

    pub fn members(&self, membership: Membership) -> Vec<PeerId> {
        self.roles.read().members(membership)
    }

    fn apply_roles(self: &Arc<Self>) {
        self.barred.lock().clear();
        self.reconcile_role();
        self.recheck_admission();
        self.schedule_repair();
    }

    /// Recomputes the local role from the allow-lists. On a change, drops
    /// links the new role cannot hold and re-announces itself.
    pub(super) fn reconcile_role(self: &Arc<Self>) {
        let role = self.roles.read().effective_role(&self.self_id, self.base_role);
        let previous = std::mem::replace(&mut *self.role.write(), role);
        if previous == role {
            return;
        }
        info!(%previous, %role, "Local role changed");
        self.events.publish(OverlayEvent::RoleChanged { role });

        let peers: Vec<_> = self.peers.read().values().cloned().collect();
        for peer in &peers {
            if let Some(ct) = self.connection_type(&peer.id()) {
                let allowed = peer
                    .role()
                    .is_some_and(|remote| link_allowed(role, remote, ct));
                if !allowed {
                    self.close_peer(peer, CloseReason::Surplus);
                    continue;
                }
            }
            self.send_control(peer, &ControlMessage::Query { role });
        }
    }

    /// Disconnects every peer the allow-lists no longer admit.
    pub(super) fn recheck_admission(self: &Arc<Self>) {
        let peers: Vec<_> = self.peers.read().values().cloned().collect();
        for peer in &peers {
            let admitted = {
                let roles = self.roles.read();
                match peer.role() {
                    Some(role) => roles.admits(&peer.id(), role),
                    None => roles.is_connectable(&peer.id()),
                }
            };
            if !admitted {
                self.reject(peer);
            }
        }
    }
}
