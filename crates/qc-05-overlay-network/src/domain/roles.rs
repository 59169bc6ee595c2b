//! Admission-control allow-lists.

use std::collections::BTreeSet;

use super::{Membership, PeerId, PeerRole};

/// Allow-lists keyed by [`Membership`].
///
/// An empty list imposes no restriction. A non-empty `Normal` list limits
/// who may connect at all; non-empty `Validator`/`Seed` lists limit who may
/// claim the ROOT/SEED bits.
#[derive(Clone, Debug, Default)]
pub struct RoleRegistry {
    validators: BTreeSet<PeerId>,
    seeds: BTreeSet<PeerId>,
    normals: BTreeSet<PeerId>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, membership: Membership) -> &BTreeSet<PeerId> {
        match membership {
            Membership::Validator => &self.validators,
            Membership::Seed => &self.seeds,
            Membership::Normal => &self.normals,
        }
    }

    fn list_mut(&mut self, membership: Membership) -> &mut BTreeSet<PeerId> {
        match membership {
            Membership::Validator => &mut self.validators,
            Membership::Seed => &mut self.seeds,
            Membership::Normal => &mut self.normals,
        }
    }

    /// Adds ids to a list. Returns the ids that were not already present.
    pub fn grant(&mut self, membership: Membership, ids: &[PeerId]) -> Vec<PeerId> {
        let list = self.list_mut(membership);
        ids.iter().copied().filter(|id| list.insert(*id)).collect()
    }

    /// Removes ids from a list. Returns the ids that were present.
    pub fn revoke(&mut self, membership: Membership, ids: &[PeerId]) -> Vec<PeerId> {
        let list = self.list_mut(membership);
        ids.iter().copied().filter(|id| list.remove(id)).collect()
    }

    pub fn members(&self, membership: Membership) -> Vec<PeerId> {
        self.list(membership).iter().copied().collect()
    }

    pub fn contains(&self, membership: Membership, id: &PeerId) -> bool {
        self.list(membership).contains(id)
    }

    fn allows(&self, membership: Membership, id: &PeerId) -> bool {
        let list = self.list(membership);
        list.is_empty() || list.contains(id)
    }

    /// Whether `id` may hold a connection at all.
    pub fn is_connectable(&self, id: &PeerId) -> bool {
        self.allows(Membership::Normal, id)
    }

    /// Whether `id` may connect while claiming `role`.
    pub fn admits(&self, id: &PeerId, role: PeerRole) -> bool {
        self.is_connectable(id)
            && (!role.has_root() || self.allows(Membership::Validator, id))
            && (!role.has_seed() || self.allows(Membership::Seed, id))
    }

    /// Role of the local node given its configured base role.
    ///
    /// A non-empty list decides the corresponding bit; an empty one leaves
    /// the base role's bit in place.
    pub fn effective_role(&self, self_id: &PeerId, base: PeerRole) -> PeerRole {
        let root = if self.validators.is_empty() {
            base.has_root()
        } else {
            self.validators.contains(self_id)
        };
        let seed = if self.seeds.is_empty() {
            base.has_seed()
        } else {
            self.seeds.contains(self_id)
        };
        PeerRole::from_flags(root, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::new([n; 32])
    }

    #[test]
    fn test_empty_lists_admit_everyone() {
        let registry = RoleRegistry::new();
        assert!(registry.is_connectable(&peer(1)));
        assert!(registry.admits(&peer(1), PeerRole::RootSeed));
    }

    #[test]
    fn test_normal_list_restricts_connections() {
        let mut registry = RoleRegistry::new();
        assert_eq!(registry.grant(Membership::Normal, &[peer(1), peer(2)]).len(), 2);
        assert!(registry.grant(Membership::Normal, &[peer(1)]).is_empty());

        assert!(registry.is_connectable(&peer(1)));
        assert!(!registry.is_connectable(&peer(3)));

        assert_eq!(registry.revoke(Membership::Normal, &[peer(1), peer(9)]), vec![peer(1)]);
        assert!(!registry.is_connectable(&peer(1)));
        assert_eq!(registry.members(Membership::Normal), vec![peer(2)]);
    }

    #[test]
    fn test_validator_list_restricts_root_claims() {
        let mut registry = RoleRegistry::new();
        registry.grant(Membership::Validator, &[peer(1)]);

        assert!(registry.admits(&peer(1), PeerRole::Root));
        assert!(!registry.admits(&peer(2), PeerRole::Root));
        assert!(!registry.admits(&peer(2), PeerRole::RootSeed));
        assert!(registry.admits(&peer(2), PeerRole::Seed));
    }

    #[test]
    fn test_effective_role_follows_lists() {
        let mut registry = RoleRegistry::new();
        assert_eq!(registry.effective_role(&peer(1), PeerRole::Seed), PeerRole::Seed);

        registry.grant(Membership::Validator, &[peer(1)]);
        assert_eq!(registry.effective_role(&peer(1), PeerRole::Seed), PeerRole::RootSeed);
        assert_eq!(registry.effective_role(&peer(2), PeerRole::Root), PeerRole::None);
    }
}
