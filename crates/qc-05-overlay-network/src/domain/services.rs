//! Domain services for the overlay: placement rules, multicast routing and
//! packet fingerprints.

use rand::Rng;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

use super::{ConnectionType, Packet, PeerRole, TopologyLimits};

/// Whether a node with role `upper` may serve as parent/uncle of a node
/// with role `lower`.
///
/// Seeds hang below roots, citizens hang below seed-capable nodes, and
/// roots never have an upstream.
pub fn can_parent(upper: PeerRole, lower: PeerRole) -> bool {
    if lower.has_root() {
        false
    } else if lower.has_seed() {
        upper.has_root()
    } else {
        upper.has_seed()
    }
}

/// Whether two nodes form a friend (root mesh) link.
pub fn can_befriend(a: PeerRole, b: PeerRole) -> bool {
    a.has_root() && b.has_root()
}

/// Whether a peer with role `remote` may hold slot `ct` at a node with
/// role `local`.
pub fn link_allowed(local: PeerRole, remote: PeerRole, ct: ConnectionType) -> bool {
    match ct {
        ConnectionType::Friend => can_befriend(local, remote),
        ConnectionType::Parent | ConnectionType::Uncle => can_parent(remote, local),
        ConnectionType::Child | ConnectionType::Nephew => can_parent(local, remote),
    }
}

/// Slot quota a role is entitled to.
pub fn quota_for(role: PeerRole, limits: TopologyLimits, ct: ConnectionType) -> usize {
    let downstream = role.has_root() || role.has_seed();
    match ct {
        ConnectionType::Friend if role.has_root() => usize::MAX,
        ConnectionType::Parent if !role.has_root() => 1,
        ConnectionType::Uncle if !role.has_root() => limits.uncles,
        ConnectionType::Child if downstream => limits.children,
        ConnectionType::Nephew if downstream => limits.nephews,
        _ => 0,
    }
}

/// Where a packet came from, relative to the local node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Originated locally, or from an unclassified peer.
    Local,
    /// From a parent or uncle.
    FromAbove,
    /// From a child or nephew.
    FromBelow,
    /// From a friend.
    FromSide,
}

impl Direction {
    pub fn of_sender(ct: Option<ConnectionType>) -> Self {
        match ct {
            None => Direction::Local,
            Some(ConnectionType::Friend) => Direction::FromSide,
            Some(ConnectionType::Parent | ConnectionType::Uncle) => Direction::FromAbove,
            Some(ConnectionType::Child | ConnectionType::Nephew) => Direction::FromBelow,
        }
    }
}

/// Link classes a multicast to `target` must be forwarded along.
///
/// Packets climb to the root tier, spread across the friend mesh, then
/// descend only as far as the target's tier.
pub fn multicast_links(self_role: PeerRole, target: PeerRole, dir: Direction) -> Vec<ConnectionType> {
    let climbing = matches!(dir, Direction::Local | Direction::FromBelow);
    let mut links = Vec::with_capacity(5);
    if self_role.has_root() {
        if climbing {
            links.push(ConnectionType::Friend);
        }
    } else if climbing {
        links.push(ConnectionType::Parent);
        links.push(ConnectionType::Uncle);
    }
    if target.tier() < self_role.tier() {
        links.push(ConnectionType::Child);
        links.push(ConnectionType::Nephew);
    }
    links
}

/// Link classes a full broadcast floods along.
pub fn broadcast_links() -> [ConnectionType; 5] {
    [
        ConnectionType::Friend,
        ConnectionType::Parent,
        ConnectionType::Child,
        ConnectionType::Uncle,
        ConnectionType::Nephew,
    ]
}

/// Keyed packet fingerprint for loop suppression.
///
/// Formula: `SipHash-1-3(k0, k1, protocol || src || dest || seq || payload)`.
/// The TTL is excluded since relays rewrite it.
#[derive(Clone, Copy, Debug)]
pub struct PacketFingerprinter {
    k0: u64,
    k1: u64,
}

impl PacketFingerprinter {
    pub fn new(k0: u64, k1: u64) -> Self {
        Self { k0, k1 }
    }

    /// Fingerprinter with per-process random keys.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self::new(rng.gen(), rng.gen())
    }

    pub fn fingerprint(&self, packet: &Packet) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(self.k0, self.k1);
        hasher.write(&packet.protocol.to_be_bytes());
        hasher.write(packet.src.as_bytes());
        hasher.write_u8(packet.dest.to_byte());
        hasher.write_u32(packet.seq);
        hasher.write(&packet.payload);
        hasher.finish()
    }
}
