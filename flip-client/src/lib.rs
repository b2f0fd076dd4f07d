//! # Coinflip Client
//!
//! Worker runtime (sampler threads + batch sender) and the status client.

pub mod config;
pub mod status;
pub mod worker;

pub use config::{StatusConfig, WorkerConfig};
pub use status::{fetch_status, render_report};
pub use worker::{BatchSender, Worker};
