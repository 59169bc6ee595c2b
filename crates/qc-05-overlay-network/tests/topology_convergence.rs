//! # Topology Convergence Tests
//!
//! Starting from an empty topology, maintenance must drive every root to a
//! full friend mesh and full child/nephew slots, and keep every slot
//! consistent with the placement rules.

mod common;

use std::time::Duration;

use common::*;
use qc_05_overlay_network::adapters::MemoryNetwork;
use qc_05_overlay_network::{
    ConnectionType, OverlayApi, OverlayConfig, OverlayEvent, PeerRole, TopologyLimits,
};

fn tight_config() -> OverlayConfig {
    OverlayConfig {
        children_limit: 1,
        nephew_limit: 1,
        uncle_limit: 1,
        ..OverlayConfig::for_testing()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_roots_converge_to_full_slots() {
    init_tracing();
    let network = MemoryNetwork::new();
    let nodes = spawn_cluster(&network, 3, 6, 0, tight_config()).await;
    let roots = &nodes[..3];
    let seeds = &nodes[3..];

    let converged = wait_until(Duration::from_secs(30), || {
        roots.iter().all(|r| {
            let view = r.manager.topology();
            view.friends.len() == 2 && view.children.len() == 1 && view.nephews.len() == 1
        })
    })
    .await;
    assert!(converged, "roots did not converge");

    // Every seed parent is a root, and only roots hold the ROOT role
    for seed in seeds {
        let view = seed.manager.topology();
        assert!(view.friends.is_empty());
        assert!(view.children.is_empty() && view.nephews.is_empty());
        if let Some(parent) = view.parent {
            assert!(roots.iter().any(|r| r.id() == parent));
        }
    }
    for root in roots {
        assert!(root.manager.topology().parent.is_none());
        assert_eq!(root.manager.role(), PeerRole::Root);
    }

    shutdown(&nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_seeds_find_parent_and_uncle() {
    init_tracing();
    let network = MemoryNetwork::new();
    let nodes = spawn_cluster(&network, 2, 2, 0, OverlayConfig::for_testing()).await;

    let placed = wait_until(Duration::from_secs(15), || {
        nodes[2..].iter().all(|s| {
            let view = s.manager.topology();
            view.parent.is_some() && view.uncles.len() == 1
        })
    })
    .await;
    assert!(placed, "seeds did not find parent and uncle");

    // Each seed's parent and uncle are distinct roots
    for seed in &nodes[2..] {
        let view = seed.manager.topology();
        assert_ne!(view.parent, Some(view.uncles[0]));
    }
    // The roots see the seeds as children or nephews
    let downstream: usize = nodes[..2]
        .iter()
        .map(|r| {
            let view = r.manager.topology();
            view.count(ConnectionType::Child) + view.count(ConnectionType::Nephew)
        })
        .sum();
    assert_eq!(downstream, 4);

    shutdown(&nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_citizens_attach_below_seeds() {
    init_tracing();
    let network = MemoryNetwork::new();
    let nodes = spawn_cluster(&network, 1, 2, 2, OverlayConfig::for_testing()).await;
    let seeds = &nodes[1..3];
    let citizens = &nodes[3..];

    let attached = wait_until(Duration::from_secs(15), || {
        citizens.iter().all(|c| {
            c.manager
                .topology()
                .parent
                .is_some_and(|p| seeds.iter().any(|s| s.id() == p))
        })
    })
    .await;
    assert!(attached, "citizens did not attach to seeds");

    // Citizens are never taken as children of a pure root
    let root_view = nodes[0].manager.topology();
    for citizen in citizens {
        assert!(!root_view.contains(&citizen.id()));
    }

    shutdown(&nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lowering_limits_drops_surplus() {
    init_tracing();
    let network = MemoryNetwork::new();
    let nodes = spawn_cluster(&network, 1, 2, 0, OverlayConfig::for_testing()).await;
    let root = &nodes[0];

    assert!(
        wait_until(Duration::from_secs(15), || {
            root.manager.topology().children.len() == 2
        })
        .await
    );

    let mut events = root.manager.subscribe_events();
    root.manager.set_limits(TopologyLimits {
        children: 1,
        uncles: 1,
        nephews: 10,
    });

    assert!(
        wait_until(Duration::from_secs(5), || {
            root.manager.topology().children.len() <= 1
        })
        .await
    );
    let mut dropped = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, OverlayEvent::PeerLeft { .. }) {
            dropped = true;
        }
    }
    assert!(dropped);

    shutdown(&nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_uncle_promoted_when_parent_leaves() {
    init_tracing();
    let network = MemoryNetwork::new();
    let nodes = spawn_cluster(&network, 2, 1, 0, OverlayConfig::for_testing()).await;
    let seed = &nodes[2];

    assert!(
        wait_until(Duration::from_secs(15), || {
            let view = seed.manager.topology();
            view.parent.is_some() && view.uncles.len() == 1
        })
        .await,
        "seed did not find parent and uncle"
    );
    let view = seed.manager.topology();
    let (parent, uncle) = (view.parent.unwrap(), view.uncles[0]);
    let parent_node = nodes[..2].iter().find(|n| n.id() == parent).unwrap();

    // Act: the parent goes away
    parent_node.manager.term().await;

    // Assert: the former uncle takes the parent slot
    assert!(
        wait_until(Duration::from_secs(10), || {
            seed.manager.topology().parent == Some(uncle)
        })
        .await,
        "uncle was not promoted to parent"
    );
    let uncle_node = nodes[..2].iter().find(|n| n.id() == uncle).unwrap();
    let uncle_view = uncle_node.manager.topology();
    assert!(uncle_view.children.contains(&seed.id()));
    assert!(!uncle_view.nephews.contains(&seed.id()));

    shutdown(&nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nephew_promoted_when_child_slot_frees() {
    init_tracing();
    let network = MemoryNetwork::new();
    let config = OverlayConfig {
        children_limit: 1,
        ..OverlayConfig::for_testing()
    };
    let nodes = spawn_cluster(&network, 1, 2, 0, config).await;
    let root = &nodes[0];

    assert!(
        wait_until(Duration::from_secs(15), || {
            let view = root.manager.topology();
            view.children.len() == 1 && view.nephews.len() == 1
        })
        .await,
        "root did not fill its child and nephew slots"
    );
    let view = root.manager.topology();
    let (child, nephew) = (view.children[0], view.nephews[0]);
    let child_node = nodes[1..].iter().find(|n| n.id() == child).unwrap();
    let nephew_node = nodes[1..].iter().find(|n| n.id() == nephew).unwrap();
    assert_eq!(nephew_node.manager.topology().uncles, vec![root.id()]);

    // Act: the child goes away, freeing the only child slot
    child_node.manager.term().await;

    // Assert: the nephew moves into the child slot on both ends
    assert!(
        wait_until(Duration::from_secs(10), || {
            root.manager.topology().children == vec![nephew]
                && nephew_node.manager.topology().parent == Some(root.id())
        })
        .await,
        "nephew was not promoted to child"
    );
    assert!(root.manager.topology().nephews.is_empty());
    assert!(nephew_node.manager.topology().uncles.is_empty());

    shutdown(&nodes).await;
}
