//! # Wire Messages
//!
//! Protobuf messages exchanged between workers, the server and status
//! clients. The same `CoinStatus` encoding is used for the on-disk snapshot.
//!
//! ```text
//! message Coinflip   { uint32 position = 1; uint64 flips = 2; }
//! message CoinBatch  { uint64 hash = 1; uint64 total_flips = 2; repeated Coinflip flips = 3; }
//! message CoinStats  { uint64 hash = 1; double flips_per_second = 2; }
//! message CoinStatus { uint64 total_flips = 1; double flips_per_second = 2;
//!                      repeated Coinflip flips = 3; repeated CoinStats stats = 4; }
//! ```
//!
//! New fields may be added with fresh tags; unknown fields are skipped by
//! older readers.

use crate::histogram::Histogram;

/// Default port of the worker ingest listener.
pub const DEFAULT_INGEST_PORT: u16 = 5555;

/// Default port of the status listener.
pub const DEFAULT_STATUS_PORT: u16 = 5556;

/// One non-zero histogram bucket.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Coinflip {
    /// Histogram index (streak length minus one).
    #[prost(uint32, tag = "1")]
    pub position: u32,
    /// Count stored at that index.
    #[prost(uint64, tag = "2")]
    pub flips: u64,
}

/// Worker -> server batch, sent one-way.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CoinBatch {
    /// Process-lifetime worker id.
    #[prost(uint64, tag = "1")]
    pub hash: u64,
    /// Bits scanned since the previous batch.
    #[prost(uint64, tag = "2")]
    pub total_flips: u64,
    /// Sparse histogram delta.
    #[prost(message, repeated, tag = "3")]
    pub flips: Vec<Coinflip>,
}

/// Per-worker throughput entry in a status reply.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CoinStats {
    #[prost(uint64, tag = "1")]
    pub hash: u64,
    #[prost(double, tag = "2")]
    pub flips_per_second: f64,
}

/// Server -> client status reply; also the persisted snapshot format.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CoinStatus {
    #[prost(uint64, tag = "1")]
    pub total_flips: u64,
    #[prost(double, tag = "2")]
    pub flips_per_second: f64,
    #[prost(message, repeated, tag = "3")]
    pub flips: Vec<Coinflip>,
    #[prost(message, repeated, tag = "4")]
    pub stats: Vec<CoinStats>,
}

/// Encodes a histogram as its sparse wire form.
pub fn encode_flips(histogram: &Histogram) -> Vec<Coinflip> {
    histogram
        .sparse()
        .map(|(index, flips)| Coinflip {
            position: index as u32,
            flips,
        })
        .collect()
}

/// Decodes a sparse wire histogram.
///
/// Positions beyond the histogram range are dropped.
pub fn decode_flips(flips: &[Coinflip]) -> Histogram {
    Histogram::from_sparse(flips.iter().map(|f| (f.position as usize, f.flips)))
}

impl CoinBatch {
    /// Builds a batch for `hash` from an accumulated histogram and flip count.
    pub fn new(hash: u64, total_flips: u64, histogram: &Histogram) -> Self {
        CoinBatch {
            hash,
            total_flips,
            flips: encode_flips(histogram),
        }
    }

    /// Returns the dense histogram carried by the batch.
    pub fn histogram(&self) -> Histogram {
        decode_flips(&self.flips)
    }
}

impl CoinStatus {
    /// Returns the dense histogram carried by the status.
    pub fn histogram(&self) -> Histogram {
        decode_flips(&self.flips)
    }
}
