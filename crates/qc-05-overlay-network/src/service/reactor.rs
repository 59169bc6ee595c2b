//! Reactor registry: protocol id → (reactor, priority).
//!
//! Built up by `register_reactor` and resolved per packet with a single map
//! lookup. Registrations are permanent for the lifetime of the manager.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{PeerId, ProtocolInfo, CONTROL_PRIORITY, MAX_PRIORITY};
use crate::events::OverlayError;
use crate::ports::Reactor;

/// One registered reactor.
pub struct ReactorEntry {
    pub name: String,
    pub reactor: Arc<dyn Reactor>,
    pub priority: u8,
}

#[derive(Default)]
struct Registry {
    entries: Vec<Arc<ReactorEntry>>,
    by_protocol: HashMap<ProtocolInfo, Arc<ReactorEntry>>,
}

#[derive(Default)]
pub struct ReactorRegistry {
    inner: RwLock<Registry>,
}

impl ReactorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `protocols` to `reactor` at `priority`.
    ///
    /// # Errors
    /// - `InvalidPriority` for the control lane or anything past `MAX_PRIORITY`
    /// - `ReservedProtocol` for family `0x00`
    /// - `DuplicateReactor` / `DuplicateProtocol` for conflicting registrations
    pub fn register(
        &self,
        name: &str,
        reactor: Arc<dyn Reactor>,
        protocols: &[ProtocolInfo],
        priority: u8,
    ) -> Result<(), OverlayError> {
        if priority == CONTROL_PRIORITY || priority > MAX_PRIORITY {
            return Err(OverlayError::InvalidPriority(priority));
        }
        if let Some(pi) = protocols.iter().find(|pi| pi.is_control()) {
            return Err(OverlayError::ReservedProtocol(*pi));
        }

        let mut inner = self.inner.write();
        if inner.entries.iter().any(|e| e.name == name) {
            return Err(OverlayError::DuplicateReactor(name.to_string()));
        }
        for (i, pi) in protocols.iter().enumerate() {
            if inner.by_protocol.contains_key(pi) || protocols[..i].contains(pi) {
                return Err(OverlayError::DuplicateProtocol(*pi));
            }
        }

        let entry = Arc::new(ReactorEntry {
            name: name.to_string(),
            reactor,
            priority,
        });
        for pi in protocols {
            inner.by_protocol.insert(*pi, Arc::clone(&entry));
        }
        inner.entries.push(entry);

        info!(reactor = name, priority, protocols = ?protocols, "Reactor registered");
        Ok(())
    }

    pub fn lookup(&self, protocol: ProtocolInfo) -> Option<Arc<ReactorEntry>> {
        self.inner.read().by_protocol.get(&protocol).cloned()
    }

    pub fn priority_of(&self, protocol: ProtocolInfo) -> Result<u8, OverlayError> {
        self.lookup(protocol)
            .map(|e| e.priority)
            .ok_or(OverlayError::UnregisteredProtocol(protocol))
    }

    fn snapshot(&self) -> Vec<Arc<ReactorEntry>> {
        self.inner.read().entries.clone()
    }

    /// Reports a failure to the reactor owning `protocol`.
    pub fn report_failure(&self, error: &OverlayError, protocol: ProtocolInfo, payload: &[u8]) {
        match self.lookup(protocol) {
            Some(entry) => entry.reactor.on_failure(error, protocol, payload),
            None => debug!(%protocol, %error, "Failure for unregistered protocol"),
        }
    }

    pub fn notify_join(&self, peer: PeerId) {
        for entry in self.snapshot() {
            entry.reactor.on_join(peer);
        }
    }

    pub fn notify_leave(&self, peer: PeerId) {
        for entry in self.snapshot() {
            entry.reactor.on_leave(peer);
        }
    }
}
