//! Per-connection inventory hash tracking.
//!
//! * [`FifoSet`] - bounded set evicting in insertion order, used for the
//!   hashes sent to a peer and the hashes known to it.
//! * [`PendingKnownHashes`] - hashes a peer announced that are awaiting
//!   retrieval, kept in arrival order so expiry sweeps stop at the first
//!   entry that is still fresh.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A capped set that evicts its oldest entry when full.
#[derive(Debug)]
pub struct FifoSet<T> {
    capacity: usize,
    order: VecDeque<T>,
    members: HashSet<T>,
}

impl<T> FifoSet<T>
where
    T: Hash + Eq + Clone,
{
    /// Create a set holding at most `capacity` items, at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    /// Insert an item, returning `false` if it was already present.
    pub fn add(&mut self, item: T) -> bool {
        if self.members.contains(&item) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        self.members.insert(item.clone());
        self.order.push_back(item);
        true
    }

    pub fn contains(&self, item: &T) -> bool {
        self.members.contains(item)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Hashes announced by a peer, each stamped with its arrival time.
///
/// Removal leaves a stale entry in the arrival queue which the sweep or a
/// compaction discards later. Entries carry a sequence number so a hash
/// removed and re-added is not confused with its stale predecessor.
#[derive(Debug, Default)]
pub struct PendingKnownHashes<T> {
    queue: VecDeque<(T, u64)>,
    entries: HashMap<T, (u64, Instant)>,
    next_sequence: u64,
}

impl<T> PendingKnownHashes<T>
where
    T: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            entries: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Record a hash as pending since `now`, returning `false` if it already is.
    pub fn add(&mut self, item: T, now: Instant) -> bool {
        if self.entries.contains_key(&item) {
            return false;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(item.clone(), (sequence, now));
        self.queue.push_back((item, sequence));
        true
    }

    /// Remove a hash, returning `true` if it was pending.
    pub fn remove(&mut self, item: &T) -> bool {
        let removed = self.entries.remove(item).is_some();
        if removed && self.queue.len() > 2 * self.entries.len() + 32 {
            self.compact();
        }
        removed
    }

    pub fn contains(&self, item: &T) -> bool {
        self.entries.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict entries older than `timeout` from the head, returning how many expired.
    ///
    /// Stops at the first live entry that has not yet expired.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> usize {
        let mut expired = 0;
        while let Some((item, sequence)) = self.queue.front() {
            match self.entries.get(item) {
                Some((live_sequence, _)) if live_sequence != sequence => {}
                Some((_, added)) => {
                    if now.saturating_duration_since(*added) <= timeout {
                        break;
                    }
                    self.entries.remove(item);
                    expired += 1;
                }
                None => {}
            }
            self.queue.pop_front();
        }
        expired
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.queue.retain(|(item, sequence)| {
            entries
                .get(item)
                .map_or(false, |(live_sequence, _)| live_sequence == sequence)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_set_evicts_oldest() {
        let mut set = FifoSet::new(3);
        assert!(set.add(1));
        assert!(set.add(2));
        assert!(set.add(3));
        assert!(!set.add(2));
        assert!(set.add(4));

        assert!(!set.contains(&1));
        assert!(set.contains(&2));
        assert!(set.contains(&4));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_fifo_set_zero_capacity() {
        let mut set = FifoSet::new(0);
        assert_eq!(set.capacity(), 1);
        assert!(set.add("a"));
        assert!(set.add("b"));
        assert!(!set.contains(&"a"));
        assert!(set.contains(&"b"));
    }

    #[test]
    fn test_pending_sweep_stops_at_fresh_entry() {
        let start = Instant::now();
        let timeout = Duration::from_secs(60);
        let mut pending = PendingKnownHashes::new();
        pending.add(1, start);
        pending.add(2, start + Duration::from_secs(10));
        pending.add(3, start + Duration::from_secs(50));

        assert_eq!(pending.sweep(start + Duration::from_secs(60), timeout), 0);
        assert_eq!(pending.sweep(start + Duration::from_secs(71), timeout), 2);
        assert!(!pending.contains(&1));
        assert!(!pending.contains(&2));
        assert!(pending.contains(&3));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_pending_remove_once() {
        let now = Instant::now();
        let mut pending = PendingKnownHashes::new();
        assert!(pending.add(7, now));
        assert!(!pending.add(7, now));
        assert!(pending.remove(&7));
        assert!(!pending.remove(&7));
        assert!(!pending.contains(&7));

        // The stale queue entry is skipped without counting as expired.
        assert_eq!(pending.sweep(now + Duration::from_secs(600), Duration::from_secs(1)), 0);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_pending_readd_after_remove() {
        let start = Instant::now();
        let timeout = Duration::from_secs(60);
        let mut pending = PendingKnownHashes::new();
        pending.add(1, start);
        pending.remove(&1);
        pending.add(1, start + Duration::from_secs(30));

        // The old arrival must not expire the re-added entry.
        assert_eq!(pending.sweep(start + Duration::from_secs(61), timeout), 0);
        assert!(pending.contains(&1));
        assert_eq!(pending.sweep(start + Duration::from_secs(91), timeout), 1);
        assert!(!pending.contains(&1));
    }

    #[test]
    fn test_pending_compaction() {
        let now = Instant::now();
        let mut pending = PendingKnownHashes::new();
        for i in 0..100 {
            pending.add(i, now);
        }
        for i in 0..90 {
            pending.remove(&i);
        }
        assert_eq!(pending.len(), 10);
        assert!(pending.queue.len() <= 2 * pending.len() + 32);
        for i in 90..100 {
            assert!(pending.contains(&i));
        }
    }
}
