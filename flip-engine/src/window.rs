//! # Activity Window
//!
//! Time-bounded record of worker pushes, used by the server to estimate how
//! fast each worker is flipping right now.
//!
//! ## Design Principles
//!
//! 1. **Bounded by Age**: Records older than the window are trimmed on every
//!    push and every query, so memory tracks arrival rate x window length.
//! 2. **Prefix Trim**: Records stay sorted by timestamp; expiry only pops
//!    from the front.
//! 3. **Snapshot Tally**: Queries return an owned [`Tally`] so the lock is not
//!    held while callers format replies.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

/// Default trailing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// One received batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityRecord {
    pub worker_id: u64,
    pub timestamp: Instant,
    pub count: u64,
}

/// Per-worker aggregate over the retained records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallyEntry {
    /// Timestamp of the oldest retained record.
    pub first_seen: Instant,
    /// Timestamp of the newest retained record.
    pub last_seen: Instant,
    /// Sum of the retained counts.
    pub total_count: u64,
}

impl TallyEntry {
    /// Flips per second across the entry's span.
    ///
    /// A single sample has no span and reports 0.
    pub fn speed(&self) -> f64 {
        let span = self.last_seen.saturating_duration_since(self.first_seen);
        if span.is_zero() {
            0.0
        } else {
            self.total_count as f64 / span.as_secs_f64()
        }
    }
}

/// Per-worker tally produced by [`ActivityWindow::tally`].
#[derive(Debug, Clone, Default)]
pub struct Tally {
    workers: HashMap<u64, TallyEntry, RandomState>,
}

impl Tally {
    fn observe(&mut self, record: &ActivityRecord) {
        let entry = self
            .workers
            .entry(record.worker_id)
            .or_insert_with(|| TallyEntry {
                first_seen: record.timestamp,
                last_seen: record.timestamp,
                total_count: 0,
            });
        entry.first_seen = entry.first_seen.min(record.timestamp);
        entry.last_seen = entry.last_seen.max(record.timestamp);
        entry.total_count = entry.total_count.saturating_add(record.count);
    }

    /// Returns the entry for `worker_id`.
    pub fn get(&self, worker_id: u64) -> Option<&TallyEntry> {
        self.workers.get(&worker_id)
    }

    /// Number of distinct workers in the window.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Iterates over `(worker_id, entry)` in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &TallyEntry)> + '_ {
        self.workers.iter().map(|(id, entry)| (*id, entry))
    }

    /// Sum of per-worker speeds.
    ///
    /// This is not `total / window`: each worker is measured over its own span.
    pub fn total_speed(&self) -> f64 {
        self.workers.values().map(TallyEntry::speed).sum()
    }

    /// Per-worker speeds ordered by worker id.
    pub fn rates(&self) -> Vec<(u64, f64)> {
        let mut rates: Vec<_> = self.iter().map(|(id, entry)| (id, entry.speed())).collect();
        rates.sort_unstable_by_key(|(id, _)| *id);
        rates
    }
}

/// Sliding window of [`ActivityRecord`]s.
#[derive(Debug)]
pub struct ActivityWindow {
    records: Mutex<VecDeque<ActivityRecord>>,
    window: Duration,
}

impl ActivityWindow {
    /// Creates a window retaining records for `window`.
    pub fn new(window: Duration) -> Self {
        ActivityWindow {
            records: Mutex::new(VecDeque::new()),
            window,
        }
    }

    /// Returns the configured window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a push observed now.
    pub fn push(&self, worker_id: u64, count: u64) {
        self.push_at(worker_id, Instant::now(), count);
    }

    /// Records a push observed at `timestamp` and trims expired records.
    ///
    /// A timestamp older than the newest record is inserted in order.
    pub fn push_at(&self, worker_id: u64, timestamp: Instant, count: u64) {
        let mut records = self.records.lock();
        let record = ActivityRecord {
            worker_id,
            timestamp,
            count,
        };
        match records.back() {
            Some(last) if last.timestamp > timestamp => {
                let at = records.partition_point(|r| r.timestamp <= timestamp);
                records.insert(at, record);
            }
            _ => records.push_back(record),
        }
        let now = records.back().map_or(timestamp, |r| r.timestamp);
        Self::cleanup(&mut records, now, self.window);
    }

    /// Tallies the records retained as of now.
    pub fn tally(&self) -> Tally {
        self.tally_at(Instant::now())
    }

    /// Tallies the records retained as of `now`.
    pub fn tally_at(&self, now: Instant) -> Tally {
        let mut records = self.records.lock();
        Self::cleanup(&mut records, now, self.window);

        let mut tally = Tally::default();
        for record in records.iter() {
            tally.observe(record);
        }
        tally
    }

    /// Number of retained records (without trimming).
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn cleanup(records: &mut VecDeque<ActivityRecord>, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while records.front().is_some_and(|r| r.timestamp < cutoff) {
            records.pop_front();
        }
    }
}

impl Default for ActivityWindow {
    fn default() -> Self {
        ActivityWindow::new(DEFAULT_WINDOW)
    }
}
