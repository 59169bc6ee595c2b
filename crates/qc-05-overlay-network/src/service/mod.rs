//! # Overlay Service Layer
//!
//! - `manager`: public facade ([`NetworkManager`], [`ProtocolHandler`])
//! - `p2p`: topology engine and dissemination
//! - `control`: role exchange and slot handshake
//! - `maintenance`: periodic topology repair
//! - `peer`: one connection with its queues and I/O tasks
//! - `reactor`: protocol → reactor registry

mod control;
mod maintenance;
pub mod manager;
pub mod p2p;
pub mod peer;
pub mod reactor;

pub use manager::{NetworkManager, ProtocolHandler};
pub use p2p::PeerToPeer;
pub use peer::{Peer, PendingRequest};
pub use reactor::{ReactorEntry, ReactorRegistry};
