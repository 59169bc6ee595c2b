//! # Domain Layer for the Overlay Network
//!
//! Pure logic with no I/O dependencies. This is the innermost layer of the
//! hexagonal architecture.
//!
//! ## Contents
//!
//! - **entities**: Identities and classifications (`PeerId`, `PeerRole`, `ConnectionType`)
//! - **packet**: Wire packet codec (`Packet`, `PacketHeader`, `Destination`)
//! - **queue**: Bounded per-peer priority queues (`RingBuffer`, `PriorityQueue`)
//! - **topology**: Connection slot bookkeeping (`Topology`, `TopologyView`)
//! - **roles**: Admission-control allow-lists (`RoleRegistry`)
//! - **value_objects**: Configuration and caches (`OverlayConfig`, `SeenPacketCache`)
//! - **services**: Placement and routing rules (`can_parent`, `multicast_links`)
//! - **invariants**: Topology invariant checks
//!
//! ## Design Principles
//!
//! 1. **No I/O**: All functions are pure and synchronous
//! 2. **Testable**: All logic can be unit tested without a network

mod entities;
mod invariants;
mod packet;
mod queue;
mod roles;
mod services;
mod topology;
mod value_objects;

pub use entities::*;
pub use invariants::*;
pub use packet::*;
pub use queue::*;
pub use roles::*;
pub use services::*;
pub use topology::*;
pub use value_objects::*;
