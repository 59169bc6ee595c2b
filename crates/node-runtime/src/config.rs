//! # Node Configuration
//!
//! Layers, lowest precedence first: overlay defaults, the TOML file,
//! environment variables, command-line flags.
//!
//! | variable | meaning |
//! |---|---|
//! | `QC_CONFIG` | path of the TOML config file |
//! | `QC_P2P_ADDR` | socket address to listen on |
//! | `QC_NODE_ROLE` | `NONE`, `SEED`, `ROOT` or `ROOT_SEED` |
//! | `QC_SEEDS` | comma-separated bootstrap addresses |
//! | `QC_NODE_KEY` | 32-byte node key, hex |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use qc_05_overlay_network::adapters::TomlConfigLoader;
use qc_05_overlay_network::{NetAddress, OverlayConfig, PeerId, PeerRole};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:30303";

/// Command-line flags.
#[derive(Debug, Default, Parser)]
#[command(name = "node-runtime", version, about = "Quantum-Chain overlay node")]
pub struct Args {
    /// TOML config file with an `[overlay]` section
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Socket address to listen on
    #[arg(long)]
    pub listen: Option<String>,

    /// Address other nodes dial to reach this one
    #[arg(long)]
    pub advertise: Option<NetAddress>,

    /// Node role
    #[arg(long)]
    pub role: Option<PeerRole>,

    /// Bootstrap seed addresses, comma separated
    #[arg(long, value_delimiter = ',')]
    pub seeds: Vec<NetAddress>,

    /// 32-byte node key in hex; a random key is generated when absent
    #[arg(long)]
    pub key: Option<String>,

    /// Broadcast an announcement every N seconds
    #[arg(long, value_name = "SECS")]
    pub announce: Option<u64>,
}

/// Fully resolved node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen: String,
    pub advertised: Option<NetAddress>,
    pub role: PeerRole,
    pub peer_id: PeerId,
    pub announce_interval: Option<Duration>,
    pub overlay: OverlayConfig,
}

/// Resolves the configuration from flags and the process environment.
pub fn load_config(args: Args) -> Result<NodeConfig> {
    resolve(args, |name| std::env::var(name).ok())
}

/// Resolves the configuration with `env` standing in for the environment.
pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<NodeConfig> {
    let config_path = args.config.or_else(|| env("QC_CONFIG").map(PathBuf::from));
    let mut overlay = match &config_path {
        Some(path) => TomlConfigLoader::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => OverlayConfig::default(),
    };

    let listen = args
        .listen
        .or_else(|| env("QC_P2P_ADDR"))
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());

    let role = match (args.role, env("QC_NODE_ROLE")) {
        (Some(role), _) => role,
        (None, Some(value)) => value
            .parse::<PeerRole>()
            .map_err(anyhow::Error::msg)
            .context("QC_NODE_ROLE")?,
        (None, None) => PeerRole::None,
    };

    if !args.seeds.is_empty() {
        overlay.seeds = args.seeds;
    } else if let Some(value) = env("QC_SEEDS") {
        overlay.seeds = parse_seeds(&value)?;
    }

    let key = match args.key.or_else(|| env("QC_NODE_KEY")) {
        Some(encoded) => decode_key(&encoded)?,
        None => {
            warn!("No node key configured, generating an ephemeral identity");
            rand::random::<[u8; 32]>()
        }
    };
    let peer_id = PeerId::from_public_key(&key);

    info!(
        %peer_id,
        %role,
        %listen,
        seeds = overlay.seeds.len(),
        config = ?config_path,
        "Node configuration resolved"
    );

    Ok(NodeConfig {
        listen,
        advertised: args.advertise,
        role,
        peer_id,
        announce_interval: args.announce.filter(|s| *s > 0).map(Duration::from_secs),
        overlay,
    })
}

fn parse_seeds(value: &str) -> Result<Vec<NetAddress>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| NetAddress::parse(s).context("QC_SEEDS"))
        .collect()
}

fn decode_key(encoded: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(encoded.trim()).context("Node key is not valid hex")?;
    match <[u8; 32]>::try_from(bytes.as_slice()) {
        Ok(key) => Ok(key),
        Err(_) => bail!("Node key must be 32 bytes (64 hex chars), got {}", bytes.len()),
    }
}
