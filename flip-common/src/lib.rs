// flip-common - Shared types and wire definitions for Coinflip
//
// This crate defines the histogram, the protobuf messages and the framing
// used between workers, the server and status clients.

pub mod error;
pub mod frame;
pub mod histogram;
pub mod shutdown;
pub mod wire;

// Re-export for convenience
pub use error::*;
pub use frame::{FrameDecoder, FrameError, FramedStream};
pub use histogram::{Histogram, HISTOGRAM_BUCKETS};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use wire::*;
