pub mod aggregate;
pub mod sampler;
pub mod status;
pub mod window;

pub use aggregate::{AggregateState, AggregateStore};
pub use sampler::StreakSampler;
pub use status::{StatusSnapshot, WorkerRate};
pub use window::{ActivityRecord, ActivityWindow, Tally, TallyEntry};
