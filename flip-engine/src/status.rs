//! # Status Snapshot
//!
//! Point-in-time projection of an [`AggregateState`] and a [`Tally`]. It is
//! built on demand for every status reply and for every persisted snapshot;
//! nothing keeps one alive.

use serde::Serialize;

use flip_common::wire::{decode_flips, encode_flips, CoinStats, CoinStatus};
use flip_common::Histogram;

use crate::aggregate::AggregateState;
use crate::window::Tally;

/// Throughput of a single worker over the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorkerRate {
    pub worker_id: u64,
    pub flips_per_second: f64,
}

/// Global histogram plus per-worker throughput.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub total_flips: u64,
    pub flips_per_second: f64,
    pub histogram: Histogram,
    pub per_worker: Vec<WorkerRate>,
}

impl StatusSnapshot {
    /// Combines the running total with the current window tally.
    ///
    /// The two inputs are taken under separate locks and may be a few
    /// microseconds apart.
    pub fn from_parts(state: AggregateState, tally: &Tally) -> Self {
        let per_worker = tally
            .rates()
            .into_iter()
            .map(|(worker_id, flips_per_second)| WorkerRate {
                worker_id,
                flips_per_second,
            })
            .collect();

        StatusSnapshot {
            total_flips: state.total_flips,
            flips_per_second: tally.total_speed(),
            histogram: state.histogram,
            per_worker,
        }
    }

    /// Builds the persisted form: totals only, no rates.
    pub fn from_state(state: AggregateState) -> Self {
        StatusSnapshot {
            total_flips: state.total_flips,
            flips_per_second: 0.0,
            histogram: state.histogram,
            per_worker: Vec::new(),
        }
    }

    /// Returns the aggregate part of the snapshot.
    pub fn aggregate(&self) -> AggregateState {
        AggregateState {
            histogram: self.histogram.clone(),
            total_flips: self.total_flips,
        }
    }

    pub fn to_wire(&self) -> CoinStatus {
        CoinStatus {
            total_flips: self.total_flips,
            flips_per_second: self.flips_per_second,
            flips: encode_flips(&self.histogram),
            stats: self
                .per_worker
                .iter()
                .map(|w| CoinStats {
                    hash: w.worker_id,
                    flips_per_second: w.flips_per_second,
                })
                .collect(),
        }
    }

    pub fn from_wire(status: &CoinStatus) -> Self {
        StatusSnapshot {
            total_flips: status.total_flips,
            flips_per_second: status.flips_per_second,
            histogram: decode_flips(&status.flips),
            per_worker: status
                .stats
                .iter()
                .map(|s| WorkerRate {
                    worker_id: s.hash,
                    flips_per_second: s.flips_per_second,
                })
                .collect(),
        }
    }
}
