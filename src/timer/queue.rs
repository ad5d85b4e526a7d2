//! Binary min-heap of deadlines with keyed removal.

use std::{collections::HashMap, time::Instant};

/// Handle returned by [`DeadlineQueue::offer`], used to remove an entry
/// before it expires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeadlineKey(u64);

#[derive(Debug)]
struct Entry<T> {
    deadline: Instant,
    key: u64,
    item: T,
}

impl<T> Entry<T> {
    // Keys grow monotonically, so equal deadlines pop in insertion order.
    fn before(&self, other: &Self) -> bool {
        (self.deadline, self.key) < (other.deadline, other.key)
    }
}

/// Priority queue ordered by deadline, earliest first.
///
/// The heap is stored in a flat vector (children of `k` at `2k+1` and
/// `2k+2`) alongside an index from key to heap slot, so removing an
/// arbitrary entry costs `O(log n)` rather than a linear scan.
///
/// ```
/// use std::time::{Duration, Instant};
///
/// use httpwire::timer::DeadlineQueue;
///
/// let now = Instant::now();
/// let mut queue = DeadlineQueue::new();
/// let late = queue.offer(now + Duration::from_secs(2), "late");
/// queue.offer(now + Duration::from_secs(1), "early");
///
/// assert_eq!(queue.remove(late), Some("late"));
/// assert_eq!(queue.poll().map(|(_, item)| item), Some("early"));
/// assert!(queue.is_empty());
/// ```
#[derive(Debug)]
pub struct DeadlineQueue<T> {
    heap: Vec<Entry<T>>,
    slots: HashMap<u64, usize>,
    next_key: u64,
}

impl<T> Default for DeadlineQueue<T> {
    fn default() -> Self { Self::new() }
}

impl<T> DeadlineQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            slots: HashMap::new(),
            next_key: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize { self.heap.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.heap.is_empty() }

    /// Insert `item` to expire at `deadline`.
    pub fn offer(&mut self, deadline: Instant, item: T) -> DeadlineKey {
        let key = self.next_key;
        self.next_key += 1;
        self.heap.push(Entry {
            deadline,
            key,
            item,
        });
        let slot = self.heap.len() - 1;
        self.slots.insert(key, slot);
        self.sift_up(slot);
        DeadlineKey(key)
    }

    /// Earliest entry without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<(Instant, &T)> {
        self.heap.first().map(|entry| (entry.deadline, &entry.item))
    }

    /// Earliest deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> { self.heap.first().map(|entry| entry.deadline) }

    /// Remove and return the earliest entry.
    pub fn poll(&mut self) -> Option<(Instant, T)> {
        self.remove_at(0).map(|entry| (entry.deadline, entry.item))
    }

    /// Remove and return the earliest entry if it expired at or before `now`.
    pub fn poll_expired(&mut self, now: Instant) -> Option<(Instant, T)> {
        if self.next_deadline()? <= now {
            self.poll()
        } else {
            None
        }
    }

    /// Remove the entry for `key`. Returns `None` if it already expired or
    /// was removed.
    pub fn remove(&mut self, key: DeadlineKey) -> Option<T> {
        let slot = *self.slots.get(&key.0)?;
        self.remove_at(slot).map(|entry| entry.item)
    }

    #[must_use]
    pub fn contains(&self, key: DeadlineKey) -> bool { self.slots.contains_key(&key.0) }

    fn remove_at(&mut self, slot: usize) -> Option<Entry<T>> {
        if slot >= self.heap.len() {
            return None;
        }
        let entry = self.heap.swap_remove(slot);
        self.slots.remove(&entry.key);
        if slot < self.heap.len() {
            self.slots.insert(self.heap[slot].key, slot);
            let settled = self.sift_down(slot);
            if settled == slot {
                self.sift_up(slot);
            }
        }
        Some(entry)
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.slots.insert(self.heap[a].key, a);
        self.slots.insert(self.heap[b].key, b);
    }

    fn sift_up(&mut self, mut k: usize) {
        while k > 0 {
            let parent = (k - 1) / 2;
            if !self.heap[k].before(&self.heap[parent]) {
                break;
            }
            self.swap(k, parent);
            k = parent;
        }
    }

    fn sift_down(&mut self, mut k: usize) -> usize {
        let len = self.heap.len();
        loop {
            let left = 2 * k + 1;
            if left >= len {
                return k;
            }
            let right = left + 1;
            let child = if right < len && self.heap[right].before(&self.heap[left]) {
                right
            } else {
                left
            };
            if !self.heap[child].before(&self.heap[k]) {
                return k;
            }
            self.swap(k, child);
            k = child;
        }
    }
}
