//! # Streak Sampler
//!
//! Turns a stream of 64-bit pseudorandom words into periodic histogram
//! deltas pushed into a local [`AggregateStore`].
//!
//! Bits are scanned most-significant first. A run is recorded when the bit
//! value changes. Runs that straddle a flush boundary, and the run that
//! precedes the first observed transition, are dropped instead of being
//! carried into the next delta; the resulting undercount is bounded by one
//! run per flush.

use rand::RngCore;

use flip_common::{Histogram, Shutdown};

use crate::aggregate::AggregateStore;

/// Words scanned between two pushes into the store.
pub const DEFAULT_FLUSH_WORDS: u64 = 65_536;

/// Bits per generator word.
pub const WORD_BITS: u64 = u64::BITS as u64;

/// Per-thread streak counter.
#[derive(Debug)]
pub struct StreakSampler<R> {
    rng: R,
    histogram: Histogram,
    previous_bit: bool,
    run_length: usize,
    // set while the current run started before the last flush
    partial_run: bool,
    words_scanned: u64,
    flush_words: u64,
}

impl<R: RngCore> StreakSampler<R> {
    /// Creates a sampler drawing words from `rng`.
    pub fn new(rng: R) -> Self {
        StreakSampler {
            rng,
            histogram: Histogram::new(),
            previous_bit: true,
            run_length: 0,
            partial_run: true,
            words_scanned: 0,
            flush_words: DEFAULT_FLUSH_WORDS,
        }
    }

    /// Overrides the flush period (minimum one word).
    pub fn with_flush_words(mut self, flush_words: u64) -> Self {
        self.flush_words = flush_words.max(1);
        self
    }

    /// Returns the delta accumulated since the last flush.
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Scans one word, most-significant bit first.
    pub fn scan_word(&mut self, word: u64) {
        for shift in (0..WORD_BITS).rev() {
            let bit = (word >> shift) & 1 == 1;
            if bit == self.previous_bit {
                self.run_length = self.run_length.saturating_add(1);
            } else {
                self.previous_bit = bit;
                if self.partial_run {
                    self.partial_run = false;
                } else {
                    self.histogram.record(self.run_length);
                }
                self.run_length = 0;
            }
        }
        self.words_scanned += 1;
    }

    /// Draws and scans one word; flushes into `store` when the period is reached.
    ///
    /// Returns true if a flush happened.
    pub fn step(&mut self, store: &AggregateStore) -> bool {
        let word = self.rng.next_u64();
        self.scan_word(word);
        if self.words_scanned >= self.flush_words {
            self.flush(store);
            true
        } else {
            false
        }
    }

    /// Pushes the pending delta into `store` and starts a new one.
    pub fn flush(&mut self, store: &AggregateStore) {
        if self.words_scanned == 0 {
            return;
        }
        store.push(&self.histogram, self.words_scanned * WORD_BITS);
        self.histogram.clear();
        self.words_scanned = 0;
        self.run_length = 0;
        self.partial_run = true;
    }

    /// Samples until `shutdown` fires, checked at every flush boundary.
    pub fn run(mut self, store: &AggregateStore, shutdown: &Shutdown) {
        while !shutdown.is_triggered() {
            while !self.step(store) {}
        }
    }
}
