//! Server configuration.
//!
//! Defaults carry the reference constants; `from_env` applies `COINFLIP_*`
//! overrides and the binary layers command-line flags on top.

use std::net::{Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use flip_common::{FlipError, FlipResult, DEFAULT_INGEST_PORT, DEFAULT_STATUS_PORT};
use flip_engine::window::DEFAULT_WINDOW;

use crate::supervisor::RestartPolicy;

/// Environment variable overriding the ingest bind address.
pub const ENV_INGEST_ADDR: &str = "COINFLIP_INGEST_ADDR";
/// Environment variable overriding the status bind address.
pub const ENV_STATUS_ADDR: &str = "COINFLIP_STATUS_ADDR";
/// Environment variable overriding the snapshot directory.
pub const ENV_STORAGE: &str = "COINFLIP_STORAGE";

/// Aggregator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address of the worker ingest listener.
    pub ingest_addr: SocketAddr,
    /// Bind address of the status listener.
    pub status_addr: SocketAddr,
    /// Directory holding `status.cf` and `history/`.
    pub storage_dir: PathBuf,
    /// Trailing window for per-worker throughput.
    pub window: Duration,
    /// Period between two persisted snapshots.
    pub snapshot_interval: Duration,
    /// Backoff applied when a listener loop fails.
    pub restart: RestartPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            ingest_addr: SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_INGEST_PORT)),
            status_addr: SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_STATUS_PORT)),
            storage_dir: PathBuf::from("."),
            window: DEFAULT_WINDOW,
            snapshot_interval: Duration::from_secs(300),
            restart: RestartPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `COINFLIP_*` environment variables.
    pub fn from_env() -> FlipResult<Self> {
        let mut config = ServerConfig::default();
        if let Ok(addr) = std::env::var(ENV_INGEST_ADDR) {
            config.ingest_addr = parse_addr(ENV_INGEST_ADDR, &addr)?;
        }
        if let Ok(addr) = std::env::var(ENV_STATUS_ADDR) {
            config.status_addr = parse_addr(ENV_STATUS_ADDR, &addr)?;
        }
        if let Ok(dir) = std::env::var(ENV_STORAGE) {
            config.storage_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    pub fn validate(&self) -> FlipResult<()> {
        if self.window.is_zero() {
            return Err(FlipError::Config("activity window must be non-zero".into()));
        }
        if self.snapshot_interval.is_zero() {
            return Err(FlipError::Config("snapshot interval must be non-zero".into()));
        }
        if self.restart.initial_backoff.is_zero()
            || self.restart.max_backoff < self.restart.initial_backoff
        {
            return Err(FlipError::Config(
                "restart backoff must be non-zero and bounded by max backoff".into(),
            ));
        }
        if self.ingest_addr.port() != 0 && self.ingest_addr == self.status_addr {
            return Err(FlipError::Config(
                "ingest and status listeners need distinct addresses".into(),
            ));
        }
        Ok(())
    }
}

fn parse_addr(name: &str, value: &str) -> FlipResult<SocketAddr> {
    value
        .parse()
        .map_err(|err| FlipError::Config(format!("{name}={value}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_ports() {
        let config = ServerConfig::default();
        assert_eq!(config.ingest_addr.port(), 5555);
        assert_eq!(config.status_addr.port(), 5556);
        assert_eq!(config.window, Duration::from_secs(10));
        assert_eq!(config.snapshot_interval, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut config = ServerConfig::default();
        config.window = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.status_addr = config.ingest_addr;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_addr_reports_variable() {
        let err = parse_addr(ENV_INGEST_ADDR, "nope").unwrap_err();
        assert!(err.to_string().contains(ENV_INGEST_ADDR));
    }
}
