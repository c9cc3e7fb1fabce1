//! Ring Buffer Implementation

use std::collections::VecDeque;

/// Fixed-capacity ring buffer (overwrites oldest when full)
///
/// Items are kept in insertion order; `iter` yields oldest first.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    /// Total items pushed (for statistics)
    total_written: u64,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            total_written: 0,
        }
    }

    /// Push an item, returning the evicted oldest item if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        self.total_written += 1;
        evicted
    }

    /// Number of items currently held
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the buffer holds `capacity` items
    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently pushed item
    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    /// Oldest item still held
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Total items ever pushed
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Drop all held items (statistics are kept)
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy of the contents, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Read the last N items (most recent first)
    pub fn read_last(&self, count: usize) -> Vec<T> {
        self.items.iter().rev().take(count).cloned().collect()
    }
}

impl RingBuffer<bool> {
    /// True if any held flag is set
    pub fn any(&self) -> bool {
        self.items.iter().any(|v| *v)
    }

    /// True if the buffer is non-empty and every held flag is set
    pub fn all(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|v| *v)
    }

    /// Number of set flags
    pub fn count_true(&self) -> usize {
        self.items.iter().filter(|v| **v).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_and_read() {
        let mut buffer = RingBuffer::new(10);

        for i in 0..5 {
            buffer.push(i * 100);
        }

        assert_eq!(buffer.len(), 5);
        assert!(!buffer.is_full());

        let items = buffer.read_last(3);
        assert_eq!(items, vec![400, 300, 200]); // Most recent first
    }

    #[test]
    fn test_overwrite_oldest() {
        let mut buffer = RingBuffer::new(5);

        let mut evicted = Vec::new();
        for i in 0..8 {
            if let Some(old) = buffer.push(i) {
                evicted.push(old);
            }
        }

        assert!(buffer.is_full());
        assert_eq!(buffer.snapshot(), vec![3, 4, 5, 6, 7]);
        assert_eq!(evicted, vec![0, 1, 2]);
        assert_eq!(buffer.total_written(), 8);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buffer = RingBuffer::new(0);
        buffer.push('a');
        buffer.push('b');
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.back(), Some(&'b'));
    }

    #[test]
    fn test_flag_helpers() {
        let mut flags = RingBuffer::new(3);
        assert!(!flags.all());
        assert!(!flags.any());

        flags.push(true);
        flags.push(false);
        assert!(flags.any());
        assert!(!flags.all());

        flags.push(true);
        flags.push(true); // evicts the first true
        assert_eq!(flags.count_true(), 2);
        flags.push(true); // evicts the false
        assert!(flags.all());

        flags.clear();
        assert!(flags.is_empty());
    }

    proptest! {
        #[test]
        fn prop_len_never_exceeds_capacity(cap in 1usize..32, pushes in 0usize..200) {
            let mut buffer = RingBuffer::new(cap);
            for i in 0..pushes {
                buffer.push(i);
                prop_assert!(buffer.len() <= cap);
            }
            prop_assert_eq!(buffer.len(), pushes.min(cap));
            if pushes > 0 {
                prop_assert_eq!(buffer.back().copied(), Some(pushes - 1));
                prop_assert_eq!(buffer.front().copied(), Some(pushes.saturating_sub(cap)));
            }
        }
    }
}
