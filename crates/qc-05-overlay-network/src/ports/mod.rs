//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! - **Driving Ports (Inbound):** APIs the overlay exposes to reactors and the node
//! - **Driven Ports (Outbound):** collaborators the overlay requires (reactors, transport)

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
