//! Time-ordered queue of pending continuations.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

struct Slot<T> {
    fire_at: DateTime<Utc>,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    // Reversed so the max-heap yields the earliest entry; ties keep
    // insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap keyed by fire time, FIFO among equal times.
pub struct TimerQueue<T> {
    heap: BinaryHeap<Slot<T>>,
    next_seq: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fire_at: DateTime<Utc>, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Slot { fire_at, seq, item });
    }

    /// Remove and return the earliest entry due at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, T)> {
        if self.heap.peek()?.fire_at > now {
            return None;
        }
        self.heap.pop().map(|slot| (slot.fire_at, slot.item))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
