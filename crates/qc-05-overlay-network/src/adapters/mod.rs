//! # Overlay Adapters
//!
//! - `MemoryNetwork` / `MemoryTransport` - in-process transport for tests
//! - `TcpTransport` - TCP transport with an identity hello
//! - `TomlConfigLoader` - `[overlay]` section of a TOML config file

pub mod config;
pub mod memory;
pub mod tcp;

pub use config::{ConfigError, TomlConfigLoader};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;
