//! # Failure Detection Tests
//!
//! A peer whose reactor blocks stops draining its pipe. The sender's writer
//! must give up after the detection window, close the peer as not
//! available and report what it could not deliver.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use qc_05_overlay_network::adapters::MemoryNetwork;
use qc_05_overlay_network::{
    CloseReason, OverlayApi, OverlayConfig, OverlayEvent, PeerRole, ProtocolSender,
};
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stalled_peer_declared_not_available() {
    init_tracing();
    // Small pipes so a stalled reader back-pressures quickly
    let network = MemoryNetwork::with_pipe_buffer(4 * 1024);
    let a = spawn_node(&network, 0, PeerRole::Root, OverlayConfig::for_testing());
    let b = spawn_node(&network, 1, PeerRole::Root, OverlayConfig::for_testing());
    b.reactor.stall_ms.store(2_000, Ordering::SeqCst);

    b.manager.dial(&address(0)).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            a.manager.topology().friends.contains(&b.id())
        })
        .await
    );
    let mut events = a.manager.subscribe_events();

    // Act: B blocks on the first frame; the rest pile up behind it
    a.handler.unicast(PI_STALL, b"stall", b.id()).unwrap();
    let bulk = vec![7u8; 16 * 1024];
    for _ in 0..8 {
        a.handler.unicast(PI_GOSSIP, &bulk, b.id()).unwrap();
    }

    // Assert: NotAvailable, then PeerLeft with the same reason
    let not_available = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(OverlayEvent::NotAvailable { peer }) => break peer,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("NotAvailable within timeout");
    assert_eq!(not_available, b.id());

    let left = timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("PeerLeft within timeout")
        .unwrap();
    assert_eq!(
        left,
        OverlayEvent::PeerLeft {
            peer: b.id(),
            reason: CloseReason::NotAvailable
        }
    );

    assert!(!a.manager.topology().contains(&b.id()));
    assert!(a.reactor.leaves.lock().contains(&b.id()));
    assert!(a.reactor.failures_for(PI_GOSSIP) >= 1);
    assert!(a
        .reactor
        .failures
        .lock()
        .iter()
        .any(|(error, _)| error.contains("not available")));

    a.manager.term().await;
    b.manager.term().await;
}
