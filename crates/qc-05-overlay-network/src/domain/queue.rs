//! Bounded outbound queues.
//!
//! Every peer owns one [`RingBuffer`] per priority lane. Lanes are created
//! on first use so a peer only carries queues for the priorities actually
//! sent to it.

use std::collections::BTreeMap;

/// Highest-precedence lane. Reserved for the control protocol.
pub const CONTROL_PRIORITY: u8 = 0;
/// Lowest-precedence lane.
pub const MAX_PRIORITY: u8 = 7;

/// Fixed-capacity FIFO.
///
/// Push never blocks: a full buffer hands the item back. A capacity of
/// zero rejects every push.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Appends an item, returning it back when the buffer is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let tail = (self.head + self.len) % self.capacity();
        self.slots[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }

    /// Removes every queued item in FIFO order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);
        while let Some(item) = self.pop() {
            items.push(item);
        }
        items
    }
}

/// Per-peer set of priority lanes.
///
/// `pop` serves the lowest-numbered non-empty lane first; order within a
/// lane is FIFO.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    lanes: BTreeMap<u8, RingBuffer<T>>,
    default_capacity: usize,
    overrides: BTreeMap<u8, usize>,
}

impl<T> PriorityQueue<T> {
    pub fn new(default_capacity: usize, overrides: BTreeMap<u8, usize>) -> Self {
        Self {
            lanes: BTreeMap::new(),
            default_capacity,
            overrides,
        }
    }

    pub fn capacity_of(&self, priority: u8) -> usize {
        self.overrides
            .get(&priority)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    pub fn push(&mut self, priority: u8, item: T) -> Result<(), T> {
        let capacity = self.capacity_of(priority);
        self.lanes
            .entry(priority)
            .or_insert_with(|| RingBuffer::new(capacity))
            .push(item)
    }

    pub fn pop(&mut self) -> Option<T> {
        self.lanes.values_mut().find_map(RingBuffer::pop)
    }

    pub fn len(&self) -> usize {
        self.lanes.values().map(RingBuffer::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.values().all(RingBuffer::is_empty)
    }

    /// Empties every lane, highest priority first.
    pub fn drain(&mut self) -> Vec<T> {
        self.lanes.values_mut().flat_map(RingBuffer::drain).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_fifo_and_wraparound() {
        let mut ring = RingBuffer::new(3);
        assert!(ring.push(1).is_ok());
        assert!(ring.push(2).is_ok());
        assert!(ring.push(3).is_ok());
        assert_eq!(ring.push(4), Err(4));

        assert_eq!(ring.pop(), Some(1));
        assert!(ring.push(4).is_ok());
        assert_eq!(ring.drain(), vec![2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_zero_capacity_always_overflows() {
        let mut ring = RingBuffer::new(0);
        assert!(ring.is_full());
        assert_eq!(ring.push("x"), Err("x"));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_priority_lanes_drain_in_order() {
        let mut queue = PriorityQueue::new(4, BTreeMap::new());
        queue.push(3, "low-a").unwrap();
        queue.push(1, "high").unwrap();
        queue.push(3, "low-b").unwrap();
        queue.push(CONTROL_PRIORITY, "control").unwrap();

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.pop(), Some("control"));
        assert_eq!(queue.pop(), Some("high"));
        assert_eq!(queue.pop(), Some("low-a"));
        assert_eq!(queue.pop(), Some("low-b"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity_override_per_lane() {
        let mut overrides = BTreeMap::new();
        overrides.insert(2, 0);
        let mut queue = PriorityQueue::new(2, overrides);

        assert_eq!(queue.push(2, 1), Err(1));
        assert!(queue.push(3, 1).is_ok());
        assert!(queue.push(3, 2).is_ok());
        assert_eq!(queue.push(3, 3), Err(3));
        assert_eq!(queue.capacity_of(2), 0);
        assert_eq!(queue.capacity_of(5), 2);
    }
}
