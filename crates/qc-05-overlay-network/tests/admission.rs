//! # Admission Control Tests
//!
//! Revoking a peer's membership disconnects it at once; it is refused on
//! every later attempt and drops out of dissemination.

mod common;

use std::time::Duration;

use common::*;
use tokio::sync::broadcast::error::TryRecvError;
use qc_05_overlay_network::adapters::MemoryNetwork;
use qc_05_overlay_network::{
    BroadcastScope, Membership, OverlayApi, OverlayConfig, OverlayEvent, PeerRole,
};

const N: usize = 4;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remove_role_disconnects_and_excludes_peer() {
    init_tracing();
    let network = MemoryNetwork::new();
    let nodes = spawn_cluster(&network, N, 0, 0, OverlayConfig::for_testing()).await;
    let all_ids: Vec<_> = (0..N).map(peer_id).collect();

    assert!(
        wait_until(Duration::from_secs(10), || {
            nodes
                .iter()
                .all(|n| n.manager.topology().friends.len() == N - 1)
        })
        .await,
        "roots did not mesh"
    );

    for node in &nodes {
        node.manager.set_role(Membership::Normal, &all_ids);
    }
    assert_eq!(nodes[0].manager.get_role(Membership::Normal).len(), N);

    // Act: everyone but the victim revokes the victim
    let victim = &nodes[N - 1];
    let mut events = nodes[0].manager.subscribe_events();
    for node in &nodes[..N - 1] {
        node.manager.remove_role(Membership::Normal, &[victim.id()]);
    }

    // Assert: NotAllowed raised and the victim is gone from every topology
    let mut not_allowed = false;
    while let Ok(event) = events.try_recv() {
        if event == (OverlayEvent::NotAllowed { peer: victim.id() }) {
            not_allowed = true;
        }
    }
    assert!(not_allowed);
    assert!(
        wait_until(Duration::from_secs(5), || {
            nodes[..N - 1]
                .iter()
                .all(|n| !n.manager.topology().contains(&victim.id()))
        })
        .await
    );

    let payload = b"after-revocation".to_vec();
    nodes[0]
        .manager
        .broadcast(PI_GOSSIP, &payload, BroadcastScope::All)
        .unwrap();

    let delivered = wait_until(Duration::from_secs(5), || {
        nodes[1..N - 1]
            .iter()
            .all(|n| n.reactor.count(PI_GOSSIP, &payload) == 1)
    })
    .await;
    assert!(delivered, "broadcast did not reach the remaining peers");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let reached = nodes
        .iter()
        .filter(|n| n.reactor.count(PI_GOSSIP, &payload) > 0)
        .count();
    assert_eq!(reached, N - 2);
    assert_eq!(victim.reactor.count(PI_GOSSIP, &payload), 0);

    shutdown(&nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unlisted_dialer_refused() {
    init_tracing();
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, 0, PeerRole::Root, OverlayConfig::for_testing());
    let b = spawn_node(&network, 1, PeerRole::Root, OverlayConfig::for_testing());

    // A only admits itself and node 7
    a.manager
        .set_role(Membership::Normal, &[a.id(), peer_id(7)]);
    let mut events = a.manager.subscribe_events();

    let _ = b.manager.dial(&address(0)).await;

    let refused = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(OverlayEvent::NotAllowed { peer }) = events.recv().await {
                break peer;
            }
        }
    })
    .await
    .expect("NotAllowed within timeout");
    assert_eq!(refused, b.id());
    assert!(a.manager.peers().is_empty());

    a.manager.term().await;
    b.manager.term().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unlisted_role_claim_rejected() {
    init_tracing();
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, 0, PeerRole::Root, OverlayConfig::for_testing());
    // B claims ROOT but A only recognises itself as a validator
    let b = spawn_node(&network, 1, PeerRole::Root, OverlayConfig::for_testing());
    a.manager.set_role(Membership::Validator, &[a.id()]);
    let mut events = a.manager.subscribe_events();

    let _ = b.manager.dial(&address(0)).await;

    let rejected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(OverlayEvent::NotAllowed { peer }) = events.recv().await {
                break peer;
            }
        }
    })
    .await
    .expect("NotAllowed within timeout");
    assert_eq!(rejected, b.id());
    assert!(!a.manager.topology().contains(&b.id()));

    a.manager.term().await;
    b.manager.term().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_revoked_peer_not_redialed_in_a_loop() {
    init_tracing();
    let network = MemoryNetwork::new();
    let config = OverlayConfig::for_testing();
    let period_ms = config.seed_period_ms;
    let (a, b) = meshed_pair(&network, config).await;

    a.manager.set_role(Membership::Normal, &[a.id(), b.id()]);
    let mut events = a.manager.subscribe_events();

    // Act: revoke B and let both maintenance loops run for a while
    let window = Duration::from_secs(2);
    a.manager.remove_role(Membership::Normal, &[b.id()]);
    tokio::time::sleep(window).await;

    // Assert: at most one refused attempt per seed period
    let mut not_allowed = 0usize;
    loop {
        match events.try_recv() {
            Ok(OverlayEvent::NotAllowed { peer }) => {
                assert_eq!(peer, b.id());
                not_allowed += 1;
            }
            Ok(_) => continue,
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("event stream broke: {e}"),
        }
    }
    let bound = window.as_millis() as usize / period_ms as usize + 5;
    assert!(not_allowed >= 1);
    assert!(
        not_allowed <= bound,
        "{not_allowed} refusals in {window:?}, expected at most {bound}"
    );
    assert!(!a.manager.topology().contains(&b.id()));

    // Granting the role again lifts the bar and the pair re-meshes
    a.manager.set_role(Membership::Normal, &[b.id()]);
    let remeshed = wait_until(Duration::from_secs(5), || {
        a.manager.topology().friends.contains(&b.id())
    })
    .await;
    assert!(remeshed, "peer not readmitted after the role was restored");

    a.manager.term().await;
    b.manager.term().await;
}
