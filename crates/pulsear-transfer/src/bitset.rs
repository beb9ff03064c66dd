/// Per-transfer slice tracking.
///
/// One bit per slice; a set bit means "not yet acknowledged". A fresh bitset
/// has every bit set, and the transfer is complete once it is empty.

use pulsear_types::SliceRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceBitset {
    words: Vec<u64>,
    len: u32,
    pending: u32,
}

impl SliceBitset {
    /// Create a bitset of `len` slices, all pending.
    pub fn new(len: u32) -> Self {
        let word_count = (len as usize).div_ceil(64);
        let mut words = vec![u64::MAX; word_count];
        let tail = len as usize % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Self {
            words,
            len,
            pending: len,
        }
    }

    /// Total slice count.
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Slices still waiting for acknowledgement.
    #[inline]
    pub fn pending(&self) -> u32 {
        self.pending
    }

    #[inline]
    pub fn acknowledged(&self) -> u32 {
        self.len - self.pending
    }

    /// True once every slice has been acknowledged.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    #[inline]
    pub fn is_pending(&self, index: u32) -> bool {
        if index >= self.len {
            return false;
        }
        let idx = index as usize;
        self.words[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    /// Acknowledge every slice in `range` (clamped to the bitset).
    /// Returns how many bits were newly cleared; repeating a range returns 0.
    pub fn clear_range(&mut self, range: SliceRange) -> u32 {
        let end = range.end.min(self.len);
        let mut cleared = 0;
        for index in range.start..end {
            let idx = index as usize;
            let mask = 1u64 << (idx % 64);
            let word = &mut self.words[idx / 64];
            if *word & mask != 0 {
                *word &= !mask;
                cleared += 1;
            }
        }
        self.pending -= cleared;
        cleared
    }

    /// Lowest pending slice index.
    pub fn first_pending(&self) -> Option<u32> {
        self.words.iter().enumerate().find_map(|(w, &word)| {
            (word != 0).then(|| (w * 64) as u32 + word.trailing_zeros())
        })
    }

    /// Pending slices coalesced into maximal contiguous ranges, in order.
    pub fn pending_runs(&self) -> Vec<SliceRange> {
        let mut runs = Vec::new();
        let mut start: Option<u32> = None;
        for index in 0..self.len {
            match (self.is_pending(index), start) {
                (true, None) => start = Some(index),
                (false, Some(s)) => {
                    runs.push(SliceRange::new(s, index));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push(SliceRange::new(s, self.len));
        }
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_all_pending() {
        for len in [1u32, 3, 63, 64, 65, 200] {
            let bs = SliceBitset::new(len);
            assert_eq!(bs.pending(), len);
            assert!((0..len).all(|i| bs.is_pending(i)));
            assert!(!bs.is_pending(len));
        }
    }

    #[test]
    fn test_empty_bitset() {
        let bs = SliceBitset::new(0);
        assert!(bs.is_empty());
        assert_eq!(bs.first_pending(), None);
        assert!(bs.pending_runs().is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut bs = SliceBitset::new(10);
        assert_eq!(bs.clear_range(SliceRange::new(2, 5)), 3);
        assert_eq!(bs.clear_range(SliceRange::new(2, 5)), 0);
        assert_eq!(bs.pending(), 7);
        assert_eq!(bs.acknowledged(), 3);
    }

    #[test]
    fn test_clear_clamps_to_len() {
        let mut bs = SliceBitset::new(3);
        assert_eq!(bs.clear_range(SliceRange::new(1, 100)), 2);
        assert_eq!(bs.first_pending(), Some(0));
    }

    #[test]
    fn test_pending_runs_coalesce() {
        let mut bs = SliceBitset::new(130);
        bs.clear_range(SliceRange::new(0, 2));
        bs.clear_range(SliceRange::new(5, 64));
        bs.clear_range(SliceRange::new(66, 129));
        assert_eq!(
            bs.pending_runs(),
            vec![
                SliceRange::new(2, 5),
                SliceRange::new(64, 66),
                SliceRange::new(129, 130),
            ]
        );
        assert_eq!(bs.first_pending(), Some(2));
    }
}
