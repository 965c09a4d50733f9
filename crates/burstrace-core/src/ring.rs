//! Fixed-capacity FIFO buffer with O(1) eviction of the oldest entry.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A capacity of zero is bumped to one so the newest entry is always kept.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the evicted oldest entry when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.items.front()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl RingBuffer<f64> {
    pub fn mean(&self) -> Option<f64> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.items.iter().sum::<f64>() / self.items.len() as f64)
    }
}
