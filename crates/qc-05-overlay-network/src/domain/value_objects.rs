//! Value objects for overlay configuration and per-packet/per-peer state.

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::{NetAddress, PeerId, TopologyLimits};

/// Overlay configuration.
///
/// Every field has a default, so a TOML section only needs the values it
/// changes.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Maximum children per seed/root
    pub children_limit: usize,
    /// Maximum uncles (fallback parents) per seed/citizen
    pub uncle_limit: usize,
    /// Maximum nephews (fallback children) per seed/root
    pub nephew_limit: usize,
    /// Maintenance period in ms
    pub seed_period_ms: u64,
    /// Delay before sending on uncle/nephew links in ms
    pub alternate_send_period_ms: u64,
    /// Ring buffer capacity per (peer, priority)
    pub queue_capacity: usize,
    /// Per-priority overrides of `queue_capacity`
    pub priority_queue_capacity: BTreeMap<u8, usize>,
    /// Drain stall tolerated before a peer is declared not available, in ms
    pub detection_window_ms: u64,
    /// Dial and handshake timeout in ms
    pub dial_timeout_ms: u64,
    /// Unclassified connections are closed after this many ms
    pub orphan_timeout_ms: u64,
    /// Broadcast loop-suppression cache size
    pub seen_cache_size: usize,
    /// Maximum payload size in bytes
    pub max_payload_bytes: usize,
    /// Handler failures tolerated per window before closing a peer
    pub error_threshold: u32,
    /// Error-rate window in ms
    pub error_window_ms: u64,
    /// Trusted bootstrap seed addresses
    pub seeds: Vec<NetAddress>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            children_limit: 10,
            uncle_limit: 1,
            nephew_limit: 10,
            seed_period_ms: 3_000,
            alternate_send_period_ms: 1_000,
            queue_capacity: 1_000,
            priority_queue_capacity: BTreeMap::new(),
            detection_window_ms: 5_000,
            dial_timeout_ms: 5_000,
            orphan_timeout_ms: 6_000,
            seen_cache_size: 4_096,
            max_payload_bytes: 1024 * 1024, // 1 MiB
            error_threshold: 10,
            error_window_ms: 10_000,
            seeds: Vec::new(),
        }
    }
}

impl OverlayConfig {
    /// Short periods for in-process overlays.
    pub fn for_testing() -> Self {
        Self {
            seed_period_ms: 100,
            alternate_send_period_ms: 50,
            detection_window_ms: 500,
            dial_timeout_ms: 500,
            orphan_timeout_ms: 2_000,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> TopologyLimits {
        TopologyLimits {
            children: self.children_limit,
            uncles: self.uncle_limit,
            nephews: self.nephew_limit,
        }
    }

    pub fn seed_period(&self) -> Duration {
        Duration::from_millis(self.seed_period_ms)
    }

    pub fn alternate_send_period(&self) -> Duration {
        Duration::from_millis(self.alternate_send_period_ms)
    }

    pub fn detection_window(&self) -> Duration {
        Duration::from_millis(self.detection_window_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn orphan_timeout(&self) -> Duration {
        Duration::from_millis(self.orphan_timeout_ms)
    }

    pub fn error_window(&self) -> Duration {
        Duration::from_millis(self.error_window_ms)
    }
}

/// Information about a seen packet.
#[derive(Clone, Debug)]
pub struct SeenPacketInfo {
    pub first_seen: Instant,
    /// Peers the packet arrived from; `None` entries are local sends.
    pub senders: Vec<Option<PeerId>>,
}

#[derive(Debug, Default)]
struct SeenInner {
    entries: HashMap<u64, SeenPacketInfo>,
    order: VecDeque<u64>,
}

/// Bounded FIFO cache of packet fingerprints (loop suppression).
///
/// The oldest fingerprint is evicted once `max_size` is reached.
pub struct SeenPacketCache {
    inner: RwLock<SeenInner>,
    max_size: usize,
}

impl SeenPacketCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(SeenInner {
                entries: HashMap::with_capacity(max_size),
                order: VecDeque::with_capacity(max_size),
            }),
            max_size: max_size.max(1),
        }
    }

    /// Records an arrival. Returns `true` the first time a fingerprint is seen.
    pub fn observe(&self, fingerprint: u64, from: Option<PeerId>) -> bool {
        let mut inner = self.inner.write();
        if let Some(info) = inner.entries.get_mut(&fingerprint) {
            if !info.senders.contains(&from) {
                info.senders.push(from);
            }
            return false;
        }

        if inner.entries.len() >= self.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(
            fingerprint,
            SeenPacketInfo {
                first_seen: Instant::now(),
                senders: vec![from],
            },
        );
        inner.order.push_back(fingerprint);
        true
    }

    pub fn has_seen(&self, fingerprint: u64) -> bool {
        self.inner.read().entries.contains_key(&fingerprint)
    }

    /// Whether the packet has already arrived from `peer`.
    pub fn received_from(&self, fingerprint: u64, peer: &PeerId) -> bool {
        self.inner
            .read()
            .entries
            .get(&fingerprint)
            .is_some_and(|info| info.senders.contains(&Some(*peer)))
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

/// Fixed-window failure counter.
#[derive(Clone, Debug)]
pub struct ErrorWindow {
    window: Duration,
    threshold: u32,
    window_start: Instant,
    count: u32,
}

impl ErrorWindow {
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self {
            window,
            threshold,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Records one failure. Returns `true` once the threshold is reached
    /// within the current window.
    pub fn record(&mut self) -> bool {
        self.record_at(Instant::now())
    }

    pub fn record_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.threshold > 0 && self.count >= self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_config_defaults() {
        let config = OverlayConfig::default();
        assert_eq!(config.children_limit, 10);
        assert_eq!(config.uncle_limit, 1);
        assert_eq!(config.queue_capacity, 1_000);
        assert_eq!(config.seed_period(), Duration::from_secs(3));
        assert_eq!(config.alternate_send_period(), Duration::from_secs(1));
    }

    #[test]
    fn test_seen_cache_dedup_and_senders() {
        let cache = SeenPacketCache::new(16);
        let a = PeerId::new([1; 32]);
        let b = PeerId::new([2; 32]);

        assert!(cache.observe(42, Some(a)));
        assert!(!cache.observe(42, Some(b)));
        assert!(cache.received_from(42, &a));
        assert!(cache.received_from(42, &b));
        assert!(!cache.received_from(7, &a));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_seen_cache_eviction() {
        let cache = SeenPacketCache::new(3);
        cache.observe(1, None);
        cache.observe(2, None);
        cache.observe(3, None);
        assert_eq!(cache.len(), 3);

        // Adding 4th should evict first
        cache.observe(4, None);
        assert_eq!(cache.len(), 3);
        assert!(!cache.has_seen(1));
        assert!(cache.has_seen(4));
    }

    #[test]
    fn test_error_window_threshold() {
        let start = Instant::now();
        let mut window = ErrorWindow::new(Duration::from_secs(10), 3);
        assert!(!window.record_at(start));
        assert!(!window.record_at(start + Duration::from_secs(1)));
        assert!(window.record_at(start + Duration::from_secs(2)));

        // New window resets the count
        assert!(!window.record_at(start + Duration::from_secs(30)));
        assert_eq!(window.count(), 1);
    }
}
