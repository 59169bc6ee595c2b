//! Shared fixtures for the in-process overlay tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use qc_05_overlay_network::adapters::MemoryNetwork;
use qc_05_overlay_network::{
    HandlerError, NetAddress, NetworkManager, OverlayApi, OverlayConfig, OverlayError, PeerId,
    PeerRole, ProtocolHandler, ProtocolInfo, ProtocolSender, Reactor,
};

pub const PI_GOSSIP: ProtocolInfo = ProtocolInfo::new(0x10, 0x01);
pub const PI_REQUEST: ProtocolInfo = ProtocolInfo::new(0x10, 0x02);
pub const PI_RESPONSE: ProtocolInfo = ProtocolInfo::new(0x10, 0x03);
pub const PI_STALL: ProtocolInfo = ProtocolInfo::new(0x10, 0x04);
/// Always rejected by [`Recorder`].
pub const PI_REJECT: ProtocolInfo = ProtocolInfo::new(0x10, 0x05);

pub const APP_PRIORITY: u8 = 3;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn peer_id(i: usize) -> PeerId {
    PeerId::from_public_key(format!("node-{i}").as_bytes())
}

pub fn address(i: usize) -> NetAddress {
    NetAddress::parse(&format!("node-{i}:7000")).unwrap()
}

/// Reactor that records everything and answers requests.
#[derive(Default)]
pub struct Recorder {
    pub received: Mutex<Vec<(ProtocolInfo, Vec<u8>, PeerId)>>,
    pub failures: Mutex<Vec<(String, ProtocolInfo)>>,
    pub joins: Mutex<Vec<PeerId>>,
    pub leaves: Mutex<Vec<PeerId>>,
    /// Blocks the reader task this long when a `PI_STALL` arrives.
    pub stall_ms: AtomicU64,
    pub handler: OnceLock<ProtocolHandler>,
}

impl Recorder {
    pub fn count(&self, protocol: ProtocolInfo, payload: &[u8]) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|(pi, p, _)| *pi == protocol && p == payload)
            .count()
    }

    pub fn failures_for(&self, protocol: ProtocolInfo) -> usize {
        self.failures
            .lock()
            .iter()
            .filter(|(_, pi)| *pi == protocol)
            .count()
    }
}

impl Reactor for Recorder {
    fn on_receive(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        from: PeerId,
    ) -> Result<bool, HandlerError> {
        self.received
            .lock()
            .push((protocol, payload.to_vec(), from));

        if protocol == PI_REQUEST {
            if let Some(handler) = self.handler.get() {
                handler
                    .unicast(PI_RESPONSE, payload, from)
                    .map_err(|e| HandlerError::Rejected(e.to_string()))?;
            }
        }
        if protocol == PI_REJECT {
            return Err(HandlerError::Rejected("refused by recorder".into()));
        }
        if protocol == PI_STALL {
            let ms = self.stall_ms.load(Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(ms));
        }
        Ok(true)
    }

    fn on_failure(&self, error: &OverlayError, protocol: ProtocolInfo, _payload: &[u8]) {
        self.failures.lock().push((error.to_string(), protocol));
    }

    fn on_join(&self, peer: PeerId) {
        self.joins.lock().push(peer);
    }

    fn on_leave(&self, peer: PeerId) {
        self.leaves.lock().push(peer);
    }
}

pub struct Node {
    pub index: usize,
    pub manager: NetworkManager,
    pub reactor: Arc<Recorder>,
    pub handler: ProtocolHandler,
}

impl Node {
    pub fn id(&self) -> PeerId {
        self.manager.peer_id()
    }
}

/// Builds and starts node `i` on `network`.
pub fn spawn_node(
    network: &Arc<MemoryNetwork>,
    i: usize,
    role: PeerRole,
    config: OverlayConfig,
) -> Node {
    let transport = network.transport(peer_id(i), address(i));
    let manager = NetworkManager::new(config, Arc::new(transport), role);
    let reactor = Arc::new(Recorder::default());
    let handler = manager
        .register_reactor(
            "app",
            reactor.clone(),
            &[PI_GOSSIP, PI_REQUEST, PI_RESPONSE, PI_STALL, PI_REJECT],
            APP_PRIORITY,
        )
        .unwrap();
    let _ = reactor.handler.set(handler.clone());
    manager.start().unwrap();
    Node {
        index: i,
        manager,
        reactor,
        handler,
    }
}

/// Polls `check` until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, check: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Roots `0..roots` meshed through node 0, seeds `roots..roots+seeds`
/// bootstrapping from node 0, and citizens bootstrapping from the first
/// seed.
pub async fn spawn_cluster(
    network: &Arc<MemoryNetwork>,
    roots: usize,
    seeds: usize,
    citizens: usize,
    config: OverlayConfig,
) -> Vec<Node> {
    let mut nodes = Vec::new();
    for i in 0..roots {
        nodes.push(spawn_node(network, i, PeerRole::Root, config.clone()));
    }
    for node in nodes.iter().skip(1) {
        node.manager.dial(&address(0)).await.unwrap();
    }

    let seed_config = OverlayConfig {
        seeds: vec![address(0)],
        ..config.clone()
    };
    for i in roots..roots + seeds {
        nodes.push(spawn_node(network, i, PeerRole::Seed, seed_config.clone()));
    }

    let citizen_config = OverlayConfig {
        seeds: vec![address(roots)],
        ..config
    };
    for i in roots + seeds..roots + seeds + citizens {
        nodes.push(spawn_node(network, i, PeerRole::None, citizen_config.clone()));
    }
    nodes
}

/// Two roots meshed as friends.
pub async fn meshed_pair(network: &Arc<MemoryNetwork>, config: OverlayConfig) -> (Node, Node) {
    let a = spawn_node(network, 0, PeerRole::Root, config.clone());
    let b = spawn_node(network, 1, PeerRole::Root, config);
    b.manager.dial(&address(0)).await.unwrap();
    let meshed = wait_until(Duration::from_secs(5), || {
        a.manager.topology().friends.contains(&b.id())
            && b.manager.topology().friends.contains(&a.id())
    })
    .await;
    assert!(meshed, "roots did not mesh");
    (a, b)
}

pub async fn shutdown(nodes: &[Node]) {
    for node in nodes {
        node.manager.term().await;
    }
}
