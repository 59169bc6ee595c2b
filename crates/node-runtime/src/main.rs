//! # Quantum-Chain Overlay Node
//!
//! Runs one overlay node over TCP.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (file, environment, flags)
//! 2. Bind the TCP transport
//! 3. Register the announcement reactor
//! 4. Start the overlay (accept loop, maintenance, seed dials)
//! 5. Run until Ctrl+C, then terminate every peer

mod config;
mod reactor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use qc_05_overlay_network::adapters::TcpTransport;
use qc_05_overlay_network::{
    BroadcastScope, NetworkManager, OverlayApi, OverlayEvent, ProtocolHandler, ProtocolSender,
};

use crate::config::{load_config, Args, NodeConfig};
use crate::reactor::{LoggingReactor, ANNOUNCE_PRIORITY, PI_ANNOUNCE};

/// Interval between topology summaries in the log.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// The running node.
struct NodeRuntime {
    manager: NetworkManager,
    announcer: ProtocolHandler,
    shutdown_tx: watch::Sender<bool>,
}

impl NodeRuntime {
    async fn new(config: &NodeConfig) -> Result<Self> {
        let transport = TcpTransport::bind(
            &config.listen,
            config.advertised.clone(),
            config.peer_id,
            config.overlay.dial_timeout(),
        )
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;

        let manager = NetworkManager::new(config.overlay.clone(), Arc::new(transport), config.role);
        let announcer = manager
            .register_reactor(
                "announce",
                Arc::new(LoggingReactor::new()),
                &[PI_ANNOUNCE],
                ANNOUNCE_PRIORITY,
            )
            .context("Failed to register announcement reactor")?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            manager,
            announcer,
            shutdown_tx,
        })
    }

    fn start(&self, announce_interval: Option<Duration>) -> Result<()> {
        info!("===========================================");
        info!("  Quantum-Chain Overlay Node v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        self.manager.start().context("Failed to start overlay")?;
        info!(
            peer_id = %self.manager.peer_id(),
            address = %self.manager.address(),
            role = %self.manager.role(),
            "Overlay started"
        );

        self.spawn_event_log();
        self.spawn_status_log();
        if let Some(interval) = announce_interval {
            self.spawn_announcer(interval);
        }
        Ok(())
    }

    fn spawn_event_log(&self) {
        let mut events = self.manager.subscribe_events();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => match event {
                        Ok(event) => log_event(&event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Event log lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    fn spawn_status_log(&self) {
        let manager = self.manager.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATUS_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let view = manager.topology();
                        info!(
                            peers = manager.peers().len(),
                            parent = ?view.parent,
                            friends = view.friends.len(),
                            children = view.children.len(),
                            uncles = view.uncles.len(),
                            nephews = view.nephews.len(),
                            "Topology status"
                        );
                    }
                }
            }
        });
    }

    fn spawn_announcer(&self, interval: Duration) {
        let announcer = self.announcer.clone();
        let peer_id = self.manager.peer_id();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut sequence: u64 = 0;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        sequence += 1;
                        let payload = format!("{peer_id} #{sequence}");
                        if let Err(e) =
                            announcer.broadcast(PI_ANNOUNCE, payload.as_bytes(), BroadcastScope::All)
                        {
                            warn!(error = %e, sequence, "Announcement failed");
                        }
                    }
                }
            }
        });
    }

    async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        self.shutdown_tx.send_replace(true);
        self.manager.term().await;
        info!("Shutdown complete");
    }
}

fn log_event(event: &OverlayEvent) {
    match event {
        OverlayEvent::PeerJoined {
            peer,
            connection_type,
        } => info!(%peer, ?connection_type, "Peer joined topology"),
        OverlayEvent::PeerLeft { peer, reason } => info!(%peer, %reason, "Peer left topology"),
        OverlayEvent::NotAllowed { peer } => warn!(%peer, "Peer not allowed"),
        OverlayEvent::NotAvailable { peer } => warn!(%peer, "Peer not available"),
        OverlayEvent::RoleChanged { role } => info!(%role, "Local role changed"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(Args::parse())?;

    let runtime = NodeRuntime::new(&config).await?;
    runtime.start(config.announce_interval)?;

    info!("Node is running. Press Ctrl+C to stop.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
    }

    runtime.shutdown().await;
    Ok(())
}
