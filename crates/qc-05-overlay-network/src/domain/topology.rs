//! Topology slot bookkeeping.
//!
//! [`Topology`] is plain data: the runtime holds it behind a lock and
//! hands out [`TopologyView`] snapshots to readers.

use std::collections::BTreeSet;

use super::{ConnectionType, PeerId, PeerRole};

/// Slot quotas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopologyLimits {
    pub children: usize,
    pub uncles: usize,
    pub nephews: usize,
}

/// Connection slots of the local node.
///
/// A peer occupies at most one slot. `children`, `uncles` and `nephews`
/// keep insertion order so the newest entries are dropped first when a
/// quota shrinks.
#[derive(Clone, Debug)]
pub struct Topology {
    limits: TopologyLimits,
    friends: BTreeSet<PeerId>,
    parent: Option<PeerId>,
    children: Vec<PeerId>,
    uncles: Vec<PeerId>,
    nephews: Vec<PeerId>,
}

impl Topology {
    pub fn new(limits: TopologyLimits) -> Self {
        Self {
            limits,
            friends: BTreeSet::new(),
            parent: None,
            children: Vec::new(),
            uncles: Vec::new(),
            nephews: Vec::new(),
        }
    }

    pub fn limits(&self) -> TopologyLimits {
        self.limits
    }

    /// Changes quotas. Entries beyond the new quotas stay until the
    /// maintenance loop drops them (see [`Topology::surplus`]).
    pub fn set_limits(&mut self, limits: TopologyLimits) {
        self.limits = limits;
    }

    pub fn connection_type(&self, id: &PeerId) -> Option<ConnectionType> {
        if self.friends.contains(id) {
            Some(ConnectionType::Friend)
        } else if self.parent.as_ref() == Some(id) {
            Some(ConnectionType::Parent)
        } else if self.children.contains(id) {
            Some(ConnectionType::Child)
        } else if self.uncles.contains(id) {
            Some(ConnectionType::Uncle)
        } else if self.nephews.contains(id) {
            Some(ConnectionType::Nephew)
        } else {
            None
        }
    }

    pub fn count(&self, ct: ConnectionType) -> usize {
        match ct {
            ConnectionType::Friend => self.friends.len(),
            ConnectionType::Parent => usize::from(self.parent.is_some()),
            ConnectionType::Child => self.children.len(),
            ConnectionType::Uncle => self.uncles.len(),
            ConnectionType::Nephew => self.nephews.len(),
        }
    }

    pub fn limit(&self, ct: ConnectionType) -> usize {
        match ct {
            ConnectionType::Friend => usize::MAX,
            ConnectionType::Parent => 1,
            ConnectionType::Child => self.limits.children,
            ConnectionType::Uncle => self.limits.uncles,
            ConnectionType::Nephew => self.limits.nephews,
        }
    }

    pub fn has_room(&self, ct: ConnectionType) -> bool {
        self.count(ct) < self.limit(ct)
    }

    /// Places `id` into the `ct` slot, moving it out of any previous slot.
    ///
    /// Returns `false` and leaves the topology untouched when `ct` is full.
    pub fn classify(&mut self, id: PeerId, ct: ConnectionType) -> bool {
        let previous = self.connection_type(&id);
        if previous == Some(ct) {
            return true;
        }
        if !self.has_room(ct) {
            return false;
        }
        self.remove(&id);
        match ct {
            ConnectionType::Friend => {
                self.friends.insert(id);
            }
            ConnectionType::Parent => self.parent = Some(id),
            ConnectionType::Child => self.children.push(id),
            ConnectionType::Uncle => self.uncles.push(id),
            ConnectionType::Nephew => self.nephews.push(id),
        }
        true
    }

    /// Vacates the slot held by `id`.
    pub fn remove(&mut self, id: &PeerId) -> Option<ConnectionType> {
        let ct = self.connection_type(id)?;
        match ct {
            ConnectionType::Friend => {
                self.friends.remove(id);
            }
            ConnectionType::Parent => self.parent = None,
            ConnectionType::Child => self.children.retain(|p| p != id),
            ConnectionType::Uncle => self.uncles.retain(|p| p != id),
            ConnectionType::Nephew => self.nephews.retain(|p| p != id),
        }
        Some(ct)
    }

    pub fn members(&self, ct: ConnectionType) -> Vec<PeerId> {
        match ct {
            ConnectionType::Friend => self.friends.iter().copied().collect(),
            ConnectionType::Parent => self.parent.into_iter().collect(),
            ConnectionType::Child => self.children.clone(),
            ConnectionType::Uncle => self.uncles.clone(),
            ConnectionType::Nephew => self.nephews.clone(),
        }
    }

    /// Every classified peer with its slot.
    pub fn links(&self) -> Vec<(PeerId, ConnectionType)> {
        [
            ConnectionType::Friend,
            ConnectionType::Parent,
            ConnectionType::Child,
            ConnectionType::Uncle,
            ConnectionType::Nephew,
        ]
        .into_iter()
        .flat_map(|ct| self.members(ct).into_iter().map(move |id| (id, ct)))
        .collect()
    }

    /// Peers beyond their slot quota, newest first.
    pub fn surplus(&self) -> Vec<(PeerId, ConnectionType)> {
        let mut out = Vec::new();
        for (list, ct) in [
            (&self.children, ConnectionType::Child),
            (&self.uncles, ConnectionType::Uncle),
            (&self.nephews, ConnectionType::Nephew),
        ] {
            let limit = self.limit(ct);
            out.extend(list.iter().skip(limit).rev().map(|id| (*id, ct)));
        }
        out
    }

    pub fn view(&self, role: PeerRole) -> TopologyView {
        TopologyView {
            role,
            friends: self.members(ConnectionType::Friend),
            parent: self.parent,
            children: self.children.clone(),
            uncles: self.uncles.clone(),
            nephews: self.nephews.clone(),
        }
    }
}

/// Read-only snapshot of the local node's topology.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologyView {
    pub role: PeerRole,
    pub friends: Vec<PeerId>,
    pub parent: Option<PeerId>,
    pub children: Vec<PeerId>,
    pub uncles: Vec<PeerId>,
    pub nephews: Vec<PeerId>,
}

impl TopologyView {
    pub fn count(&self, ct: ConnectionType) -> usize {
        match ct {
            ConnectionType::Friend => self.friends.len(),
            ConnectionType::Parent => usize::from(self.parent.is_some()),
            ConnectionType::Child => self.children.len(),
            ConnectionType::Uncle => self.uncles.len(),
            ConnectionType::Nephew => self.nephews.len(),
        }
    }

    /// Every neighbour in the topology.
    pub fn neighbors(&self) -> Vec<PeerId> {
        self.friends
            .iter()
            .chain(self.parent.iter())
            .chain(self.children.iter())
            .chain(self.uncles.iter())
            .chain(self.nephews.iter())
            .copied()
            .collect()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.neighbors().contains(id)
    }
}
