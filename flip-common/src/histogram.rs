//! # Streak Histogram
//!
//! Fixed-size counter vector indexed by streak length. Bucket `i` counts
//! streaks of length `i + 1`; anything longer than [`HISTOGRAM_BUCKETS`] is
//! folded into the last bucket.
//!
//! ## Design Principles
//!
//! 1. **Fixed Buckets**: A contiguous array keeps element-wise adds cheap.
//! 2. **Add-Only**: Counters grow by addition and shrink only by `clear`.
//! 3. **Sparse on the Wire**: Zero buckets are skipped when exporting.

use core::fmt;

use serde::{Serialize, Serializer};

/// Number of histogram buckets (maximum tracked streak length).
pub const HISTOGRAM_BUCKETS: usize = 128;

/// Streak-length counters.
#[derive(Clone, PartialEq, Eq)]
pub struct Histogram {
    buckets: [u64; HISTOGRAM_BUCKETS],
}

impl Histogram {
    /// Creates an all-zero histogram.
    pub const fn new() -> Self {
        Histogram {
            buckets: [0; HISTOGRAM_BUCKETS],
        }
    }

    /// Builds a histogram from `(index, count)` pairs.
    ///
    /// Indexes outside the bucket range are ignored; repeated indexes add up.
    pub fn from_sparse<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (usize, u64)>,
    {
        let mut histogram = Histogram::new();
        for (index, count) in entries {
            histogram.add_at(index, count);
        }
        histogram
    }

    /// Returns the count stored at `index`, or 0 when out of range.
    pub fn get(&self, index: usize) -> u64 {
        self.buckets.get(index).copied().unwrap_or(0)
    }

    /// Counts one completed run. `run_index` is the run length minus one.
    pub fn record(&mut self, run_index: usize) {
        let slot = run_index.min(HISTOGRAM_BUCKETS - 1);
        self.buckets[slot] = self.buckets[slot].saturating_add(1);
    }

    /// Adds `count` at `index`. Returns false when `index` is out of range.
    pub fn add_at(&mut self, index: usize, count: u64) -> bool {
        match self.buckets.get_mut(index) {
            Some(slot) => {
                *slot = slot.saturating_add(count);
                true
            }
            None => false,
        }
    }

    /// Adds `other` element-wise into `self`.
    pub fn add(&mut self, other: &Histogram) {
        for (slot, value) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            *slot = slot.saturating_add(*value);
        }
    }

    /// Resets every bucket to zero.
    pub fn clear(&mut self) {
        self.buckets = [0; HISTOGRAM_BUCKETS];
    }

    /// Returns true if every bucket is zero.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|&v| v == 0)
    }

    /// Returns the raw bucket slice.
    pub fn as_slice(&self) -> &[u64] {
        &self.buckets
    }

    /// Iterates over non-zero buckets as `(index, count)`.
    pub fn sparse(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(|(i, v)| (i, *v))
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Histogram::new()
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.sparse()).finish()
    }
}

impl Serialize for Histogram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.buckets.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_clamps_long_runs() {
        let mut histogram = Histogram::new();
        histogram.record(0);
        histogram.record(127);
        histogram.record(500);
        assert_eq!(histogram.get(0), 1);
        assert_eq!(histogram.get(127), 2);
    }

    #[test]
    fn add_is_element_wise() {
        let mut a = Histogram::from_sparse([(0, 5), (10, 1)]);
        let b = Histogram::from_sparse([(0, 2), (20, 3)]);
        a.add(&b);
        assert_eq!(a.get(0), 7);
        assert_eq!(a.get(10), 1);
        assert_eq!(a.get(20), 3);
    }

    #[test]
    fn sparse_skips_zero_buckets() {
        let histogram = Histogram::from_sparse([(3, 7), (40, 2)]);
        let entries: Vec<_> = histogram.sparse().collect();
        assert_eq!(entries, vec![(3, 7), (40, 2)]);
        assert_eq!(Histogram::from_sparse(entries), histogram);
    }

    #[test]
    fn from_sparse_ignores_out_of_range() {
        let histogram = Histogram::from_sparse([(128, 9), (1_000, 1)]);
        assert!(histogram.is_empty());
    }

    #[test]
    fn add_saturates() {
        let mut histogram = Histogram::from_sparse([(1, u64::MAX)]);
        histogram.add_at(1, 10);
        assert_eq!(histogram.get(1), u64::MAX);
    }

    #[test]
    fn serializes_all_buckets() {
        let histogram = Histogram::from_sparse([(2, 4)]);
        let json = serde_json::to_value(&histogram).unwrap();
        let values = json.as_array().unwrap();
        assert_eq!(values.len(), HISTOGRAM_BUCKETS);
        assert_eq!(values[2], 4);
    }
}
