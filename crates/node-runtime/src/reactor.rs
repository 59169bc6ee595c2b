//! Reactor that logs traffic on the node's announcement protocol.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use qc_05_overlay_network::{HandlerError, OverlayError, PeerId, ProtocolInfo, Reactor};

/// Protocol family used for node announcements.
pub const ANNOUNCE_FAMILY: u8 = 0x10;
pub const PI_ANNOUNCE: ProtocolInfo = ProtocolInfo::new(ANNOUNCE_FAMILY, 0x01);
pub const ANNOUNCE_PRIORITY: u8 = 3;

#[derive(Debug, Default)]
pub struct LoggingReactor {
    received: AtomicU64,
    failed: AtomicU64,
}

impl LoggingReactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Reactor for LoggingReactor {
    fn on_receive(
        &self,
        protocol: ProtocolInfo,
        payload: &[u8],
        from: PeerId,
    ) -> Result<bool, HandlerError> {
        if protocol != PI_ANNOUNCE {
            return Err(HandlerError::Rejected(format!("unexpected protocol {protocol}")));
        }
        self.received.fetch_add(1, Ordering::Relaxed);
        info!(
            peer = %from,
            bytes = payload.len(),
            text = %String::from_utf8_lossy(payload),
            "Announcement received"
        );
        Ok(true)
    }

    fn on_failure(&self, error: &OverlayError, protocol: ProtocolInfo, payload: &[u8]) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        warn!(%error, %protocol, bytes = payload.len(), "Announcement not delivered");
    }

    fn on_join(&self, peer: PeerId) {
        debug!(%peer, "Peer joined");
    }

    fn on_leave(&self, peer: PeerId) {
        debug!(%peer, "Peer left");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_announcements() {
        let reactor = LoggingReactor::new();
        let from = PeerId::new([1; 32]);
        assert!(reactor.on_receive(PI_ANNOUNCE, b"hello", from).unwrap());
        assert_eq!(reactor.received(), 1);

        let other = ProtocolInfo::new(ANNOUNCE_FAMILY, 0x02);
        assert!(reactor.on_receive(other, b"x", from).is_err());
        assert_eq!(reactor.received(), 1);

        reactor.on_failure(&OverlayError::QueueOverflow(from), PI_ANNOUNCE, b"x");
        assert_eq!(reactor.failed(), 1);
    }
}
