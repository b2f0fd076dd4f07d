//! # Coinflip Error Types
//!
//! ## Design Principles
//!
//! 1. **Taxonomy First**: Every failure maps onto one of a few categories
//!    (transport, decode, persistence, configuration, runtime).
//! 2. **Loop-Local Failure**: Errors end the loop that produced them; callers
//!    decide whether to restart, log, or swallow.
//! 3. **Recoverability Hints**: Transport failures are explicitly marked as
//!    retryable so supervisors can back off and try again.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::frame::FrameError;

/// Result type used across Coinflip components.
pub type FlipResult<T> = core::result::Result<T, FlipError>;

/// High-level category for grouping errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FlipErrorCategory {
    /// Bind, connect, send, receive failures and timeouts.
    Transport,
    /// Malformed frames or protobuf payloads.
    Decode,
    /// Snapshot read/write failures.
    Persistence,
    /// Invalid configuration values.
    Config,
    /// Process-level resource failures such as thread spawning.
    Runtime,
}

impl FlipErrorCategory {
    /// Returns true if the category is safe to retry.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transport)
    }
}

/// Errors surfaced by the sampler, server and client components.
#[derive(Debug, Error)]
pub enum FlipError {
    /// Socket level failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A blocking network operation exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The byte stream did not contain a valid frame.
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    /// The frame body was not a valid protobuf message.
    #[error("malformed message: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Snapshot storage failed.
    #[error("persistence error: {0}")]
    Persistence(#[source] io::Error),

    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A sampler thread could not be started.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),
}

impl FlipError {
    /// Returns the coarse category of the error.
    pub const fn category(&self) -> FlipErrorCategory {
        match self {
            Self::Transport(_) | Self::Timeout(_) => FlipErrorCategory::Transport,
            Self::Frame(_) | Self::Decode(_) => FlipErrorCategory::Decode,
            Self::Persistence(_) => FlipErrorCategory::Persistence,
            Self::Config(_) => FlipErrorCategory::Config,
            Self::Spawn(_) => FlipErrorCategory::Runtime,
        }
    }

    /// Returns true if callers should retry the operation.
    pub const fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}
