//! # Coinflip Server
//!
//! Aggregator for streak histograms reported by flipping workers.

pub mod config;
pub mod listener;
pub mod metrics;
pub mod persistence;
pub mod server;
pub mod supervisor;

pub use config::ServerConfig;
pub use persistence::{FilesystemBackend, MemoryBackend, SnapshotBackend};
pub use server::{Server, ServerState};
