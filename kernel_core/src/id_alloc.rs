//! Identifier allocator
//!
//! Hands out integers from a bounded range, always the lowest free one.
//! Allocation state is a bitmap plus a hint pointing at or below the
//! lowest free identifier, so the common case never scans allocated words
//! twice.

const WORD_BITS: u32 = u64::BITS;

#[derive(Debug, Clone)]
pub struct IdAllocator {
    min: u32,
    max: u32,
    used: Vec<u64>,
    /// Offset from `min` at or below the lowest free identifier
    next_free: u64,
    live: usize,
}

impl IdAllocator {
    /// Allocator for the range `[min, max]`
    pub fn new(min: u32, max: u32) -> Self {
        if min > max {
            crate::fatal!("identifier range [{}, {}] is empty", min, max);
        }
        let slots = (max - min) as usize + 1;
        let words = slots.div_ceil(WORD_BITS as usize);
        Self {
            min,
            max,
            used: vec![0; words],
            next_free: 0,
            live: 0,
        }
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Number of identifiers currently handed out
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn capacity(&self) -> usize {
        (self.max - self.min) as usize + 1
    }

    fn slot(&self, id: u32) -> (usize, u64) {
        Self::slot_of(u64::from(id - self.min))
    }

    fn slot_of(offset: u64) -> (usize, u64) {
        let bits = u64::from(WORD_BITS);
        ((offset / bits) as usize, 1u64 << (offset % bits))
    }

    pub fn is_allocated(&self, id: u32) -> bool {
        if id < self.min || id > self.max {
            return false;
        }
        let (word, bit) = self.slot(id);
        self.used[word] & bit != 0
    }

    /// Allocates the lowest free identifier
    ///
    /// Running out of identifiers is fatal: callers bound their live
    /// objects below [`IdAllocator::capacity`].
    pub fn alloc(&mut self) -> u32 {
        let span = u64::from(self.max - self.min);
        let bits = u64::from(WORD_BITS);
        let mut offset = self.next_free;
        while offset <= span {
            let (word, bit) = Self::slot_of(offset);
            if self.used[word] == u64::MAX {
                // skip to the first identifier of the next word
                offset = (word as u64 + 1) * bits;
                continue;
            }
            if self.used[word] & bit == 0 {
                self.used[word] |= bit;
                self.live += 1;
                self.next_free = offset + 1;
                // offset <= span, so this stays within [min, max]
                return self.min + offset as u32;
            }
            offset += 1;
        }
        crate::fatal!(
            "identifier space [{}, {}] exhausted",
            self.min,
            self.max
        );
    }

    /// Returns `id` to the free set
    ///
    /// Freeing an identifier outside the range, or one that is not
    /// allocated, is an invariant violation and halts.
    pub fn free(&mut self, id: u32) {
        if !self.is_allocated(id) {
            crate::fatal!(
                "free of unallocated identifier {} (range [{}, {}])",
                id,
                self.min,
                self.max
            );
        }
        let (word, bit) = self.slot(id);
        self.used[word] &= !bit;
        self.live -= 1;
        let offset = u64::from(id - self.min);
        if offset < self.next_free {
            self.next_free = offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_allocates_lowest_first() {
        let mut ids = IdAllocator::new(1, 16);
        assert_eq!(ids.alloc(), 1);
        assert_eq!(ids.alloc(), 2);
        assert_eq!(ids.alloc(), 3);
        assert_eq!(ids.live(), 3);
    }

    #[test]
    fn test_free_lowers_hint() {
        let mut ids = IdAllocator::new(1, 16);
        for _ in 0..5 {
            ids.alloc();
        }
        ids.free(2);
        ids.free(4);
        assert_eq!(ids.alloc(), 2);
        assert_eq!(ids.alloc(), 4);
        assert_eq!(ids.alloc(), 6);
    }

    #[test]
    fn test_full_range_then_reuse() {
        let mut ids = IdAllocator::new(1, 4);
        let all: Vec<u32> = (0..4).map(|_| ids.alloc()).collect();
        assert_eq!(all, vec![1, 2, 3, 4]);
        ids.free(3);
        assert_eq!(ids.alloc(), 3);
    }

    #[test]
    fn test_spans_multiple_words() {
        let mut ids = IdAllocator::new(1, 200);
        for expected in 1..=200 {
            assert_eq!(ids.alloc(), expected);
        }
        ids.free(130);
        assert_eq!(ids.alloc(), 130);
    }

    #[test]
    fn test_no_live_identifier_is_handed_out_twice() {
        let mut ids = IdAllocator::new(1, 64);
        let mut live = BTreeSet::new();
        // deterministic interleaving of allocations and frees
        for step in 0u32..500 {
            if step % 3 == 2 && !live.is_empty() {
                let victim = *live.iter().nth((step as usize * 7) % live.len()).unwrap();
                live.remove(&victim);
                ids.free(victim);
            } else if live.len() < 64 {
                let lowest_free = (1..=64).find(|i| !live.contains(i));
                let id = ids.alloc();
                assert_eq!(Some(id), lowest_free);
                assert!(live.insert(id), "identifier {} handed out twice", id);
            }
            assert_eq!(ids.live(), live.len());
        }
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_exhaustion_is_fatal() {
        let mut ids = IdAllocator::new(1, 2);
        ids.alloc();
        ids.alloc();
        ids.alloc();
    }

    #[test]
    fn test_range_ending_at_top_of_u32() {
        let mut ids = IdAllocator::new(u32::MAX - 1, u32::MAX);
        assert_eq!(ids.alloc(), u32::MAX - 1);
        assert_eq!(ids.alloc(), u32::MAX);
        ids.free(u32::MAX);
        assert_eq!(ids.alloc(), u32::MAX);
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_exhaustion_at_top_of_u32_is_fatal() {
        let mut ids = IdAllocator::new(u32::MAX - 1, u32::MAX);
        ids.alloc();
        ids.alloc();
        ids.alloc();
    }

    #[test]
    #[should_panic(expected = "unallocated")]
    fn test_free_out_of_range_is_fatal() {
        let mut ids = IdAllocator::new(1, 8);
        ids.free(9);
    }

    #[test]
    #[should_panic(expected = "unallocated")]
    fn test_double_free_is_fatal() {
        let mut ids = IdAllocator::new(1, 8);
        let id = ids.alloc();
        ids.free(id);
        ids.free(id);
    }
}
