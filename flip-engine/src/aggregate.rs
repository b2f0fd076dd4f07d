//! # Aggregate Store
//!
//! Mutex-protected running total of a [`Histogram`] and a flip count.
//!
//! The same type serves two roles:
//! - on a worker it is a drain-and-reset buffer filled by sampler threads;
//! - on the server it is a never-reset running total.
//!
//! Every operation takes the single lock for a bounded O(128) critical
//! section, so readers never observe a partially added delta.

use parking_lot::Mutex;

use flip_common::Histogram;

/// Point-in-time copy of an [`AggregateStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateState {
    /// Streak counts.
    pub histogram: Histogram,
    /// Bits scanned.
    pub total_flips: u64,
}

/// Thread-safe accumulator shared by samplers, senders and listeners.
#[derive(Debug, Default)]
pub struct AggregateStore {
    inner: Mutex<AggregateState>,
}

impl AggregateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        AggregateStore {
            inner: Mutex::new(AggregateState::default()),
        }
    }

    /// Adds `delta` and `flip_count` into the running total.
    pub fn push(&self, delta: &Histogram, flip_count: u64) {
        let mut state = self.inner.lock();
        state.histogram.add(delta);
        state.total_flips = state.total_flips.saturating_add(flip_count);
    }

    /// Returns a deep copy of the current state.
    pub fn snapshot(&self) -> AggregateState {
        self.inner.lock().clone()
    }

    /// Zeroes the histogram and the total.
    ///
    /// Pushes that land between an earlier `snapshot()` and this call are
    /// discarded with the rest; use [`AggregateStore::drain`] to avoid that.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.histogram.clear();
        state.total_flips = 0;
    }

    /// Takes the current state and leaves the store empty, under one lock hold.
    pub fn drain(&self) -> AggregateState {
        std::mem::take(&mut *self.inner.lock())
    }
}
