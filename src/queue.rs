//! Growable circular FIFO used as the diagnostic record store.
//!
//! Elements live in a contiguous slot array addressed by a start offset and a
//! count, so popping never shifts storage. A full queue either grows by its
//! expansion factor (elements are re-laid out linearly from slot 0) or, when
//! the factor is <= 1.0, rejects the push.

use crate::error::QueueError;
use log::debug;

/// Default minimum live count below which the queue never shrinks.
pub const DEFAULT_MIN_SIZE: usize = 16;
/// Default growth factor applied when a push finds the queue full.
pub const DEFAULT_EXPANSION_FACTOR: f32 = 2.0;
/// Default shrink threshold; 0.0 disables shrinking.
pub const DEFAULT_REDUCTION_FACTOR: f32 = 0.0;

/// Sizing policy of a [`MessageQueue`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueConfig {
    /// The queue only shrinks while holding at least this many elements.
    pub min_size: usize,
    /// Growth factor on a full push; <= 1.0 makes the queue fixed-capacity.
    pub expansion_factor: f32,
    /// Shrink once `len / capacity` drops below this fraction; 0.0 disables.
    pub reduction_factor: f32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            expansion_factor: DEFAULT_EXPANSION_FACTOR,
            reduction_factor: DEFAULT_REDUCTION_FACTOR,
        }
    }
}

impl QueueConfig {
    /// Fixed-capacity policy: pushes on a full queue fail.
    pub fn fixed() -> Self {
        Self {
            expansion_factor: 1.0,
            ..Self::default()
        }
    }
}

/// Circular FIFO over a contiguous slot array.
#[derive(Debug)]
pub struct MessageQueue<T> {
    slots: Vec<Option<T>>,
    start: usize,
    len: usize,
    config: QueueConfig,
}

impl<T> MessageQueue<T> {
    /// Creates an expandable queue with the default policy.
    pub fn new(capacity: usize) -> Self {
        Self::with_config(capacity, QueueConfig::default())
    }

    pub fn with_config(capacity: usize, config: QueueConfig) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            start: 0,
            len: 0,
            config,
        }
    }

    /// Number of queued elements.
    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots in the backing store.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Appends `item` at the back.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] on a full fixed-capacity queue and
    /// [`QueueError::Alloc`] if growing the backing store fails. Existing
    /// contents are untouched in both cases.
    pub fn push(&mut self, item: T) -> Result<(), QueueError> {
        if self.len == self.capacity() {
            let grown = self.grown_capacity();
            if grown <= self.capacity() {
                return Err(QueueError::Full(self.capacity()));
            }
            self.resize(grown)?;
        }
        let idx = (self.start + self.len) % self.capacity();
        self.slots[idx] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Removes and returns the oldest element, `None` when empty.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.start].take();
        self.start = (self.start + 1) % self.capacity();
        self.len -= 1;

        if self.len >= self.config.min_size {
            let fill = self.len as f32 / self.capacity() as f32;
            if fill < self.config.reduction_factor {
                // Shrinking is best effort; a failed reallocation keeps the old store.
                let _ = self.resize(self.len);
            }
        }
        item
    }

    /// Returns the `i`-th element from the front without removing it.
    pub fn peek(&self, i: usize) -> Option<&T> {
        if i >= self.len {
            return None;
        }
        self.slots[(self.start + i) % self.capacity()].as_ref()
    }

    /// Iterates front to back without removing anything.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.peek(i))
    }

    fn grown_capacity(&self) -> usize {
        if self.config.expansion_factor <= 1.0 {
            return self.capacity();
        }
        if self.capacity() == 0 {
            return self.config.min_size.max(1);
        }
        // small factors may round back to the current size; always gain a slot
        let grown = (self.len as f32 * self.config.expansion_factor).round() as usize;
        grown.max(self.capacity() + 1)
    }

    /// Reallocates to `new_capacity` slots, moving elements to linear order from slot 0.
    fn resize(&mut self, new_capacity: usize) -> Result<(), QueueError> {
        let mut slots: Vec<Option<T>> = Vec::new();
        slots
            .try_reserve_exact(new_capacity)
            .map_err(|_| QueueError::Alloc(new_capacity))?;

        let old_capacity = self.capacity();
        for i in 0..self.len {
            slots.push(self.slots[(self.start + i) % old_capacity].take());
        }
        slots.resize_with(new_capacity, || None);

        debug!(
            "diagnostic queue resized {} -> {} slots ({} queued)",
            old_capacity, new_capacity, self.len
        );
        self.slots = slots;
        self.start = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_queue_config_default() {
        let config = QueueConfig::default();
        assert_eq!(config.min_size, 16);
        assert_eq!(config.expansion_factor, 2.0);
        assert_eq!(config.reduction_factor, 0.0);
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = MessageQueue::new(4);
        for i in 0..4 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.size(), 4);
        for i in 0..4 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_peek() {
        let mut queue = MessageQueue::new(4);
        assert!(queue.peek(0).is_none());
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        assert_eq!(queue.peek(0), Some(&"a"));
        assert_eq!(queue.peek(1), Some(&"b"));
        assert!(queue.peek(2).is_none());
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn test_fixed_capacity_rejects_and_keeps_contents() {
        let mut queue = MessageQueue::with_config(3, QueueConfig::fixed());
        for i in 0..3 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.push(99), Err(QueueError::Full(3)));
        assert_eq!(queue.capacity(), 3);
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_expansion_preserves_order_across_wraparound() {
        let mut queue = MessageQueue::new(16);
        for i in 0..100u32 {
            queue.push(i).unwrap();
        }
        assert!(queue.capacity() >= 100);
        let popped: Vec<u32> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(popped.len(), 100);
        assert!(popped.windows(2).all(|w| w[0] + 1 == w[1]));
    }

    #[test]
    fn test_expansion_from_wrapped_state() {
        let mut queue = MessageQueue::new(4);
        for i in 0..4 {
            queue.push(i).unwrap();
        }
        // advance the start offset so storage wraps around
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(1));
        queue.push(4).unwrap();
        queue.push(5).unwrap();
        // full and wrapped: this push grows the store
        queue.push(6).unwrap();
        assert_eq!(queue.capacity(), 8);
        assert_eq!(
            queue.iter().copied().collect::<Vec<_>>(),
            vec![2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn test_small_factor_still_grows() {
        let config = QueueConfig {
            expansion_factor: 1.2,
            ..QueueConfig::default()
        };
        let mut queue = MessageQueue::with_config(2, config);
        for i in 0..10 {
            queue.push(i).unwrap();
        }
        assert!(queue.capacity() >= 10);
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_capacity_grows() {
        let mut queue = MessageQueue::new(0);
        queue.push(1).unwrap();
        assert_eq!(queue.capacity(), DEFAULT_MIN_SIZE);
        assert_eq!(queue.pop(), Some(1));
    }

    #[test]
    fn test_reduction_shrinks_store() {
        let config = QueueConfig {
            min_size: 2,
            expansion_factor: 2.0,
            reduction_factor: 0.25,
        };
        let mut queue = MessageQueue::with_config(64, config);
        for i in 0..20 {
            queue.push(i).unwrap();
        }
        for _ in 0..16 {
            queue.pop();
        }
        // 4 live in 64 slots is below a quarter: the store follows the live count
        assert!(queue.capacity() < 64);
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec![16, 17, 18, 19]);
    }

    #[test]
    fn test_no_reduction_by_default() {
        let mut queue = MessageQueue::new(64);
        for i in 0..40 {
            queue.push(i).unwrap();
        }
        while queue.pop().is_some() {}
        assert_eq!(queue.capacity(), 64);
    }

    proptest! {
        #[test]
        fn prop_fifo_and_size(ops in proptest::collection::vec(any::<bool>(), 0..300)) {
            let mut queue = MessageQueue::new(16);
            let mut model = std::collections::VecDeque::new();
            let mut next = 0u32;
            for push in ops {
                if push {
                    queue.push(next).unwrap();
                    model.push_back(next);
                    next += 1;
                } else {
                    prop_assert_eq!(queue.pop(), model.pop_front());
                }
                prop_assert_eq!(queue.size(), model.len());
            }
        }

        #[test]
        fn prop_expandable_push_never_fails(factor in 1.01f32..3.0, cap in 0usize..8, n in 0usize..100) {
            let config = QueueConfig { expansion_factor: factor, ..QueueConfig::default() };
            let mut queue = MessageQueue::with_config(cap, config);
            for i in 0..n {
                prop_assert!(queue.push(i).is_ok());
            }
            prop_assert_eq!(queue.size(), n);
        }

        #[test]
        fn prop_size_after_pushes_and_pops(n in 0usize..200, m in 0usize..200) {
            let m = m.min(n);
            let mut queue = MessageQueue::new(16);
            for i in 0..n {
                queue.push(i).unwrap();
            }
            for i in 0..m {
                prop_assert_eq!(queue.pop(), Some(i));
            }
            prop_assert_eq!(queue.size(), n - m);
        }
    }
}
