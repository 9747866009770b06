//! Admission queue (spec §4.3): bounded, priority-ordered, coalescing by
//! asset id. Grounded on `doorway`'s `worker-pool.rs` request/oneshot
//! completion pattern, generalized from "one FIFO slot per request" to a
//! bounded priority heap with de-duplication.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::descriptor::InspectDescriptor;
use crate::error::GatewayError;
use crate::models::{InspectResult, Priority};

pub const QUEUE_CAPACITY: usize = 100;
pub const QUEUE_DEADLINE: Duration = Duration::from_secs(10);

pub type InspectReply = oneshot::Sender<Result<InspectResult, GatewayError>>;

pub struct Entry {
    asset_id: u64,
    descriptor: InspectDescriptor,
    priority: Priority,
    enqueued_at: Instant,
    deadline: Instant,
    /// All waiters coalesced onto this asset id; every one of them gets the
    /// same eventual result.
    waiters: Vec<InspectReply>,
}

/// Max-heap ordering: higher `Priority` first, earlier `enqueued_at` first
/// among equal priorities (§4.3).
struct HeapKey {
    priority: Priority,
    enqueued_at: Instant,
}

impl PartialEq for HeapKey {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueued_at == other.enqueued_at
    }
}
impl Eq for HeapKey {}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
    }
}

struct HeapItem {
    key: HeapKey,
    asset_id: u64,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Bounded admission queue. Entries live in `by_asset`; `heap` holds
/// dispatch-order keys and is swept lazily — an id no longer present in
/// `by_asset` is a stale heap entry and gets dropped on pop.
pub struct AdmissionQueue {
    by_asset: HashMap<u64, Entry>,
    heap: BinaryHeap<HeapItem>,
    capacity: usize,
    deadline: Duration,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::with_limits(QUEUE_CAPACITY, QUEUE_DEADLINE)
    }

    pub fn with_limits(capacity: usize, deadline: Duration) -> Self {
        Self {
            by_asset: HashMap::new(),
            heap: BinaryHeap::new(),
            capacity,
            deadline,
        }
    }

    pub fn len(&self) -> usize {
        self.by_asset.len()
    }

    pub fn is_full(&self) -> bool {
        self.by_asset.len() >= self.capacity
    }

    /// Enqueue a request, coalescing onto an existing entry for the same
    /// asset id if one is already queued (§4.3). Returns `QueueFull` only
    /// when a *new* entry would be needed and the queue is already at
    /// capacity; a coalesced request never counts against the cap.
    pub fn enqueue(
        &mut self,
        descriptor: InspectDescriptor,
        priority: Priority,
        reply: InspectReply,
    ) -> Result<(), GatewayError> {
        if let Some(existing) = self.by_asset.get_mut(&descriptor.a) {
            existing.waiters.push(reply);
            if priority > existing.priority {
                existing.priority = priority;
            }
            return Ok(());
        }

        if self.is_full() {
            return Err(GatewayError::QueueFull);
        }

        let now = Instant::now();
        let entry = Entry {
            asset_id: descriptor.a,
            descriptor,
            priority,
            enqueued_at: now,
            deadline: now + self.deadline,
            waiters: vec![reply],
        };
        self.heap.push(HeapItem {
            key: HeapKey {
                priority,
                enqueued_at: now,
            },
            asset_id: entry.asset_id,
        });
        self.by_asset.insert(entry.asset_id, entry);
        Ok(())
    }

    /// Pop the highest-priority, earliest-enqueued entry still present,
    /// along with how long it waited in the queue.
    pub fn pop_ready(&mut self) -> Option<(InspectDescriptor, Vec<InspectReply>, Duration)> {
        while let Some(item) = self.heap.pop() {
            if let Some(entry) = self.by_asset.remove(&item.asset_id) {
                let wait = entry.enqueued_at.elapsed();
                return Some((entry.descriptor, entry.waiters, wait));
            }
            // stale heap entry (already dispatched via coalescing or expired)
        }
        None
    }

    /// Remove and return every entry whose deadline has passed, so the
    /// caller can fail them with `InspectTimeout` (§4.3, §8 boundary case:
    /// "all bots cooling" waits up to the deadline then times out).
    pub fn sweep_expired(&mut self) -> Vec<Entry> {
        let now = Instant::now();
        let expired_ids: Vec<u64> = self
            .by_asset
            .values()
            .filter(|e| e.deadline <= now)
            .map(|e| e.asset_id)
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|id| self.by_asset.remove(&id))
            .collect()
    }
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Entry {
    pub fn into_waiters(self) -> Vec<InspectReply> {
        self.waiters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(asset_id: u64) -> InspectDescriptor {
        InspectDescriptor::new(1, asset_id, 3, 0).unwrap()
    }

    #[test]
    fn coalesces_requests_for_the_same_asset() {
        let mut q = AdmissionQueue::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        q.enqueue(desc(42), Priority::Normal, tx1).unwrap();
        q.enqueue(desc(42), Priority::Normal, tx2).unwrap();
        assert_eq!(q.len(), 1);
        let (_, waiters, _) = q.pop_ready().unwrap();
        assert_eq!(waiters.len(), 2);
    }

    #[test]
    fn rejects_new_asset_once_full() {
        let mut q = AdmissionQueue::new();
        for i in 0..QUEUE_CAPACITY as u64 {
            let (tx, _rx) = oneshot::channel();
            q.enqueue(desc(i), Priority::Normal, tx).unwrap();
        }
        let (tx, _rx) = oneshot::channel();
        let err = q.enqueue(desc(9999), Priority::Normal, tx).unwrap_err();
        assert_eq!(err, GatewayError::QueueFull);
    }

    #[test]
    fn coalescing_still_works_when_full() {
        let mut q = AdmissionQueue::new();
        for i in 0..QUEUE_CAPACITY as u64 {
            let (tx, _rx) = oneshot::channel();
            q.enqueue(desc(i), Priority::Normal, tx).unwrap();
        }
        let (tx, _rx) = oneshot::channel();
        assert!(q.enqueue(desc(0), Priority::High, tx).is_ok());
    }

    #[test]
    fn high_priority_dispatched_before_normal() {
        let mut q = AdmissionQueue::new();
        let (tx_n, _rx_n) = oneshot::channel();
        let (tx_h, _rx_h) = oneshot::channel();
        q.enqueue(desc(1), Priority::Normal, tx_n).unwrap();
        q.enqueue(desc(2), Priority::High, tx_h).unwrap();
        let (first, _, _) = q.pop_ready().unwrap();
        assert_eq!(first.a, 2);
    }

    #[test]
    fn fifo_among_equal_priority() {
        let mut q = AdmissionQueue::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        q.enqueue(desc(1), Priority::Normal, tx1).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        q.enqueue(desc(2), Priority::Normal, tx2).unwrap();
        let (first, _, _) = q.pop_ready().unwrap();
        assert_eq!(first.a, 1);
    }
}
