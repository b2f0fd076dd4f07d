//! Worker and status-client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use flip_common::{FlipError, FlipResult, DEFAULT_INGEST_PORT, DEFAULT_STATUS_PORT};
use flip_engine::sampler::DEFAULT_FLUSH_WORDS;

/// Settings for a flipping worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Ingest endpoint as `host:port`.
    pub server: String,
    /// Sampler threads; 0 means one per available core.
    pub threads: usize,
    /// Period between two batches.
    pub send_interval: Duration,
    /// Words each sampler scans between pushes into the local store.
    pub flush_words: u64,
    /// Deadline for opening the ingest connection.
    pub connect_timeout: Duration,
    /// Deadline for writing one batch; a stalled connection is dropped.
    pub send_timeout: Duration,
}

impl WorkerConfig {
    /// Builds a config for `server` (`host` or `host:port`).
    pub fn new(server: &str) -> Self {
        WorkerConfig {
            server: endpoint(server, DEFAULT_INGEST_PORT),
            threads: 0,
            send_interval: Duration::from_secs(1),
            flush_words: DEFAULT_FLUSH_WORDS,
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
        }
    }

    /// Resolves `threads == 0` to the hardware parallelism.
    pub fn thread_count(&self) -> usize {
        if self.threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.threads
        }
    }

    pub fn validate(&self) -> FlipResult<()> {
        if self.send_interval.is_zero() {
            return Err(FlipError::Config("send interval must be non-zero".into()));
        }
        if self.send_timeout.is_zero() {
            return Err(FlipError::Config("send timeout must be non-zero".into()));
        }
        if self.flush_words == 0 {
            return Err(FlipError::Config("flush words must be non-zero".into()));
        }
        Ok(())
    }
}

/// Settings for a one-shot status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Status endpoint as `host:port`.
    pub server: String,
    /// Deadline for the whole round trip.
    pub timeout: Duration,
}

impl StatusConfig {
    pub fn new(server: &str) -> Self {
        StatusConfig {
            server: endpoint(server, DEFAULT_STATUS_PORT),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Appends `default_port` unless `server` already names a port.
///
/// Bare IPv6 literals are bracketed.
pub fn endpoint(server: &str, default_port: u16) -> String {
    if server.starts_with('[') {
        if server.contains("]:") {
            return server.to_string();
        }
        return format!("{server}:{default_port}");
    }
    match server.matches(':').count() {
        0 => format!("{server}:{default_port}"),
        1 => server.to_string(),
        _ => format!("[{server}]:{default_port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_adds_default_port() {
        assert_eq!(endpoint("localhost", 5555), "localhost:5555");
        assert_eq!(endpoint("10.0.0.1:7000", 5555), "10.0.0.1:7000");
        assert_eq!(endpoint("::1", 5556), "[::1]:5556");
        assert_eq!(endpoint("[::1]", 5556), "[::1]:5556");
        assert_eq!(endpoint("[::1]:9000", 5556), "[::1]:9000");
    }

    #[test]
    fn roles_use_their_ports() {
        assert_eq!(WorkerConfig::new("host").server, "host:5555");
        assert_eq!(StatusConfig::new("host").server, "host:5556");
    }

    #[test]
    fn rejects_zero_interval() {
        let mut config = WorkerConfig::new("host");
        config.send_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        assert!(WorkerConfig::new("host").validate().is_ok());
    }
}
