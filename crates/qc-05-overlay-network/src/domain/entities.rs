//! # Core Domain Entities
//!
//! Defines the fundamental data structures of the overlay.
//!
//! ## Entities
//!
//! - [`PeerId`]: 32-byte node identity derived from a public key
//! - [`NetAddress`]: `host:port` endpoint used to dial a peer
//! - [`PeerRole`]: validator / seed / citizen class of a node
//! - [`ConnectionType`]: relationship of a live peer to the local node
//! - [`ProtocolInfo`]: 2-byte protocol identifier (family + sub-protocol)
//!
//! ## Role Bits
//!
//! ```text
//! NONE      = 0b00   citizen, attaches below a seed
//! SEED      = 0b01   attaches below a root, serves citizens
//! ROOT      = 0b10   validator, meshes with other roots
//! ROOT_SEED = 0b11   validator that also serves citizens
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Peer identifier (32 bytes).
///
/// Identity is compared by value, never by address: the same node reached
/// through two different endpoints is the same peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Creates a new peer ID from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives the identity of a node from its public key (SHA-256).
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = Sha256::digest(public_key);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..6]))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0[..6]))
    }
}

/// Malformed network address.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Invalid network address: {0}")]
pub struct AddressError(pub String);

/// `host:port` endpoint string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetAddress(String);

impl NetAddress {
    /// Parses and validates a `host:port` string.
    pub fn parse(addr: &str) -> Result<Self, AddressError> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| AddressError(addr.to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(AddressError(addr.to_string()));
        }
        Ok(Self(addr.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn host(&self) -> &str {
        self.0.rsplit_once(':').map(|(h, _)| h).unwrap_or(&self.0)
    }

    pub fn port(&self) -> u16 {
        self.0
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse().ok())
            .unwrap_or(0)
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NetAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NetAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NetAddress> for String {
    fn from(value: NetAddress) -> Self {
        value.0
    }
}

/// Node role.
///
/// `ROOT_SEED` holds both the root and the seed bit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum PeerRole {
    #[default]
    None = 0,
    Seed = 1,
    Root = 2,
    RootSeed = 3,
}

impl PeerRole {
    const SEED_BIT: u8 = 0b01;
    const ROOT_BIT: u8 = 0b10;

    pub fn from_flags(root: bool, seed: bool) -> Self {
        match (root, seed) {
            (false, false) => Self::None,
            (false, true) => Self::Seed,
            (true, false) => Self::Root,
            (true, true) => Self::RootSeed,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Seed),
            2 => Some(Self::Root),
            3 => Some(Self::RootSeed),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn has_root(self) -> bool {
        self.as_u8() & Self::ROOT_BIT != 0
    }

    pub fn has_seed(self) -> bool {
        self.as_u8() & Self::SEED_BIT != 0
    }

    /// Whether a node with this role is a member of the `target` role group.
    ///
    /// `NONE` only matches citizens; other roles match every node holding
    /// all of their bits, so `ROOT_SEED` is both a root and a seed.
    pub fn matches(self, target: PeerRole) -> bool {
        match target {
            PeerRole::None => self == PeerRole::None,
            _ => self.as_u8() & target.as_u8() == target.as_u8(),
        }
    }

    /// Vertical position in the overlay: roots 2, seeds 1, citizens 0.
    pub fn tier(self) -> u8 {
        if self.has_root() {
            2
        } else if self.has_seed() {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerRole::None => "NONE",
            PeerRole::Seed => "SEED",
            PeerRole::Root => "ROOT",
            PeerRole::RootSeed => "ROOT_SEED",
        };
        f.write_str(name)
    }
}

impl FromStr for PeerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" | "CITIZEN" => Ok(PeerRole::None),
            "SEED" => Ok(PeerRole::Seed),
            "ROOT" | "VALIDATOR" => Ok(PeerRole::Root),
            "ROOT_SEED" => Ok(PeerRole::RootSeed),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Relationship of a live peer to the local node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    Friend,
    Parent,
    Child,
    Uncle,
    Nephew,
}

impl ConnectionType {
    /// The type the remote side assigns to us.
    pub fn inverse(self) -> Self {
        match self {
            ConnectionType::Friend => ConnectionType::Friend,
            ConnectionType::Parent => ConnectionType::Child,
            ConnectionType::Child => ConnectionType::Parent,
            ConnectionType::Uncle => ConnectionType::Nephew,
            ConnectionType::Nephew => ConnectionType::Uncle,
        }
    }

    /// Uncles and nephews are fallback links, used after a delay.
    pub fn is_alternate(self) -> bool {
        matches!(self, ConnectionType::Uncle | ConnectionType::Nephew)
    }

    pub fn is_upstream(self) -> bool {
        matches!(self, ConnectionType::Parent | ConnectionType::Uncle)
    }

    pub fn is_downstream(self) -> bool {
        matches!(self, ConnectionType::Child | ConnectionType::Nephew)
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionType::Friend => "friend",
            ConnectionType::Parent => "parent",
            ConnectionType::Child => "child",
            ConnectionType::Uncle => "uncle",
            ConnectionType::Nephew => "nephew",
        };
        f.write_str(name)
    }
}

/// 2-byte protocol identifier.
///
/// High byte is the protocol family, low byte the sub-protocol. Family
/// `0x00` is reserved for the overlay's own control protocol.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolInfo(pub u16);

impl ProtocolInfo {
    pub const fn new(family: u8, id: u8) -> Self {
        Self(((family as u16) << 8) | id as u16)
    }

    pub fn family(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn id(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn is_control(self) -> bool {
        self.family() == 0
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ProtocolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl fmt::Debug for ProtocolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolInfo({:#06x})", self.0)
    }
}

/// Propagation scope of a broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastScope {
    /// Flood along every topology edge with loop suppression.
    All,
    /// Immediate topology neighbours only, never relayed.
    Neighbor,
}

/// Admission-control allow-lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Membership {
    /// Peers allowed to act as ROOT.
    Validator,
    /// Peers allowed to act as SEED.
    Seed,
    /// Peers allowed to connect at all.
    Normal,
}

/// Which side initiated a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionDirection {
    Outbound,
    Inbound,
}

/// Liveness of a peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Why a peer connection was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Manager terminated.
    Terminate,
    /// Transport read or write failed.
    ConnectionLost,
    /// Outbound drain stalled past the detection window.
    NotAvailable,
    /// Admission control rejected the peer.
    NotAllowed,
    /// Another connection to the same peer was kept.
    Duplicate,
    /// Stayed unclassified past the orphan timeout.
    Orphaned,
    /// Slot quota exceeded or the link no longer fits the local role.
    Surplus,
    /// Handler errors crossed the error-rate threshold.
    ErrorRate,
    /// Inbound frame violated the packet format.
    Protocol,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseReason::Terminate => "terminate",
            CloseReason::ConnectionLost => "connection lost",
            CloseReason::NotAvailable => "not available",
            CloseReason::NotAllowed => "not allowed",
            CloseReason::Duplicate => "duplicate connection",
            CloseReason::Orphaned => "orphaned",
            CloseReason::Surplus => "surplus",
            CloseReason::ErrorRate => "error rate exceeded",
            CloseReason::Protocol => "protocol violation",
        };
        f.write_str(name)
    }
}

/// Snapshot of one connected peer.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub net_address: NetAddress,
    pub role: PeerRole,
    pub connection_type: Option<ConnectionType>,
    pub direction: ConnectionDirection,
    pub state: PeerState,
}
