//! Control protocol messages.
//!
//! Exchanged on [`CONTROL_PROTOCOL`] at [`CONTROL_PRIORITY`] and never
//! delivered to reactors.
//!
//! ```text
//! dialer                          acceptor
//!   │──── Query{role} ─────────────→│
//!   │←─── Query{role} ──────────────│
//!   │←─── QueryResult{roots,seeds} ─│
//!   │──── QueryResult{roots,seeds} →│
//!   │──── ConnectionRequest{Parent} →│
//!   │←─── ConnectionResponse{Some(Parent)} ─│
//! ```

use serde::{Deserialize, Serialize};

use super::OverlayError;
use crate::domain::{ConnectionType, NetAddress, PeerRole, ProtocolInfo};

pub use crate::domain::CONTROL_PRIORITY;

/// Protocol id of the control channel (reserved family `0x00`).
pub const CONTROL_PROTOCOL: ProtocolInfo = ProtocolInfo::new(0x00, 0x01);

/// Overlay control message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Announces the sender's role and asks for known addresses.
    Query { role: PeerRole },
    /// Answer to a query. `roots` is only filled for ROOT/SEED requesters.
    QueryResult {
        role: PeerRole,
        roots: Vec<NetAddress>,
        seeds: Vec<NetAddress>,
    },
    /// Asks the receiver to become the sender's parent or uncle.
    ConnectionRequest { requested: ConnectionType },
    /// `granted` is the type the requester should assign the responder;
    /// `None` is a refusal.
    ConnectionResponse {
        requested: ConnectionType,
        granted: Option<ConnectionType>,
    },
}

impl ControlMessage {
    pub fn encode(&self) -> Result<Vec<u8>, OverlayError> {
        bincode::serialize(self).map_err(|e| OverlayError::Control(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, OverlayError> {
        bincode::deserialize(bytes).map_err(|e| OverlayError::Control(e.to_string()))
    }
}
