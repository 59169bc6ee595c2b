//! Topology invariants.
//!
//! Checked by the maintenance loop after every pass; a violation is logged
//! and repaired on the next tick.

use std::collections::HashSet;

use super::{
    can_befriend, can_parent, ConnectionType, PeerId, PeerRole, TopologyLimits, TopologyView,
};

/// INVARIANT-1: Slot quotas
/// `children ≤ ChildrenLimit`, `uncles ≤ UncleLimit`, `nephews ≤ NephewLimit`.
pub fn invariant_slot_limits(view: &TopologyView, limits: &TopologyLimits) -> bool {
    view.children.len() <= limits.children
        && view.uncles.len() <= limits.uncles
        && view.nephews.len() <= limits.nephews
}

/// INVARIANT-2: Friends are roots
/// A friend link only exists between two ROOT/ROOT_SEED nodes.
pub fn invariant_friends_are_roots<F>(view: &TopologyView, role_of: F) -> bool
where
    F: Fn(&PeerId) -> Option<PeerRole>,
{
    view.friends.is_empty()
        || (view.role.has_root()
            && view
                .friends
                .iter()
                .all(|id| role_of(id).is_some_and(|r| can_befriend(view.role, r))))
}

/// INVARIANT-3: Single slot
/// A remote peer occupies at most one connection slot.
pub fn invariant_single_slot(view: &TopologyView) -> bool {
    let neighbors = view.neighbors();
    let unique: HashSet<_> = neighbors.iter().collect();
    unique.len() == neighbors.len()
}

/// INVARIANT-4: Roots have no upstream
pub fn invariant_no_upstream_for_roots(view: &TopologyView) -> bool {
    !view.role.has_root() || (view.parent.is_none() && view.uncles.is_empty())
}

/// INVARIANT-5: Upstream links point to roles able to serve us.
pub fn invariant_upstream_roles<F>(view: &TopologyView, role_of: F) -> bool
where
    F: Fn(&PeerId) -> Option<PeerRole>,
{
    view.parent
        .iter()
        .chain(view.uncles.iter())
        .all(|id| role_of(id).is_some_and(|r| can_parent(r, view.role)))
}

/// Topology check result.
#[derive(Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    SlotLimitExceeded,
    NonRootFriend,
    DuplicateSlot,
    RootWithUpstream,
    UnsuitableUpstream(ConnectionType),
}

/// Check all topology invariants.
pub fn check_all_invariants<F>(
    view: &TopologyView,
    limits: &TopologyLimits,
    role_of: F,
) -> Result<(), InvariantViolation>
where
    F: Fn(&PeerId) -> Option<PeerRole>,
{
    if !invariant_slot_limits(view, limits) {
        return Err(InvariantViolation::SlotLimitExceeded);
    }

    if !invariant_single_slot(view) {
        return Err(InvariantViolation::DuplicateSlot);
    }

    if !invariant_friends_are_roots(view, &role_of) {
        return Err(InvariantViolation::NonRootFriend);
    }

    if !invariant_no_upstream_for_roots(view) {
        return Err(InvariantViolation::RootWithUpstream);
    }

    if !invariant_upstream_roles(view, &role_of) {
        let parent_ok = view
            .parent
            .map_or(true, |p| role_of(&p).is_some_and(|r| can_parent(r, view.role)));
        let ct = if !parent_ok {
            ConnectionType::Parent
        } else {
            ConnectionType::Uncle
        };
        return Err(InvariantViolation::UnsuitableUpstream(ct));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::new([n; 32])
    }

    fn limits() -> TopologyLimits {
        TopologyLimits {
            children: 1,
            uncles: 1,
            nephews: 1,
        }
    }

    #[test]
    fn test_invariant_slot_limits() {
        let mut view = TopologyView {
            role: PeerRole::Root,
            children: vec![peer(1)],
            ..Default::default()
        };
        assert!(invariant_slot_limits(&view, &limits()));
        view.children.push(peer(2));
        assert!(!invariant_slot_limits(&view, &limits()));
    }

    #[test]
    fn test_invariant_friends_are_roots() {
        let view = TopologyView {
            role: PeerRole::Root,
            friends: vec![peer(1)],
            ..Default::default()
        };
        assert!(invariant_friends_are_roots(&view, |_| Some(PeerRole::RootSeed)));
        assert!(!invariant_friends_are_roots(&view, |_| Some(PeerRole::Seed)));

        let seed_view = TopologyView {
            role: PeerRole::Seed,
            ..view
        };
        assert!(!invariant_friends_are_roots(&seed_view, |_| Some(PeerRole::Root)));
    }

    #[test]
    fn test_check_all_invariants() {
        let view = TopologyView {
            role: PeerRole::Seed,
            parent: Some(peer(1)),
            uncles: vec![peer(2)],
            children: vec![peer(3)],
            ..Default::default()
        };
        let roles = |id: &PeerId| {
            Some(if id.0[0] == 3 {
                PeerRole::None
            } else {
                PeerRole::Root
            })
        };
        assert!(check_all_invariants(&view, &limits(), roles).is_ok());

        let duplicated = TopologyView {
            nephews: vec![peer(3)],
            ..view.clone()
        };
        assert_eq!(
            check_all_invariants(&duplicated, &limits(), roles),
            Err(InvariantViolation::DuplicateSlot)
        );

        assert_eq!(
            check_all_invariants(&view, &limits(), |_| Some(PeerRole::Seed)),
            Err(InvariantViolation::UnsuitableUpstream(ConnectionType::Parent))
        );
    }
}
