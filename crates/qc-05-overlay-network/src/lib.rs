//! # Overlay Network Subsystem (qc-05)
//!
//! Role-aware peer-to-peer overlay for Quantum-Chain nodes. Builds a
//! tree-plus-mesh topology among validators (roots), seeds and citizens and
//! disseminates protocol messages across it.
//!
//! ## Architecture Role
//!
//! ```text
//!   [Reactor A]  [Reactor B]  ...          upper layers
//!        │ ProtocolHandler │
//!        ↓                 ↓
//!   ┌──────────── NetworkManager ────────────┐
//!   │  PeerToPeer: friends / parent / children│
//!   │              uncles / nephews           │
//!   │  unicast · multicast · broadcast        │
//!   └───────┬──────────────┬─────────────────┘
//!           ↓              ↓
//!       [Peer]         [Peer] ...   one reader + one writer task each
//!           │              │
//!       ════╧══ Transport ═╧════    TCP or in-memory
//! ```
//!
//! ## Topology
//!
//! - ROOT / ROOT_SEED: meshed with every other root, bounded children and
//!   nephews, no parent
//! - SEED: one root parent, bounded uncles, bounded children and nephews
//! - NONE: one seed parent, bounded uncles
//!
//! ## Admission Control
//!
//! Validator, seed and normal allow-lists restrict who may connect and which
//! role bits a peer may claim. Changes apply immediately to live peers.

pub mod adapters;
pub mod domain;
pub mod events;
pub mod ports;
pub mod service;

pub use domain::*;
pub use events::{HandlerError, OverlayError, OverlayEvent, TransportError};
pub use ports::inbound::{OverlayApi, ProtocolSender};
pub use ports::outbound::{Connection, Reactor, Transport};
pub use service::{NetworkManager, ProtocolHandler};
