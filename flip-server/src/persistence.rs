//! # Snapshot Persistence
//!
//! Durability of the server's running total across restarts.
//!
//! ## Layout
//!
//! ```text
//! <dir>/status.cf                         current snapshot, replaced atomically
//! <dir>/~status.cf                        temporary file for the rename
//! <dir>/history/status_<UTC stamp>.cf     one per interval, never overwritten
//! ```
//!
//! Every file holds one encoded `CoinStatus` with rates zeroed.
//!
//! ## Failure Policy
//! - A missing or undecodable snapshot on startup means "no prior state".
//! - Write failures are returned to the caller, which logs and carries on.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use prost::Message;
use tracing::{info, warn};

use flip_common::{CoinStatus, FlipError, FlipResult};
use flip_engine::{AggregateStore, StatusSnapshot};

/// Canonical snapshot file name.
pub const CURRENT_FILE: &str = "status.cf";
/// Temporary file renamed over [`CURRENT_FILE`].
pub const TEMP_FILE: &str = "~status.cf";
/// Directory of timestamped snapshots.
pub const HISTORY_DIR: &str = "history";

/// Storage for encoded snapshots.
pub trait SnapshotBackend: Send + Sync {
    /// Reads the current snapshot, `Ok(None)` if there is none.
    fn load(&self) -> FlipResult<Option<Vec<u8>>>;

    /// Replaces the current snapshot.
    fn save_current(&self, data: &[u8]) -> FlipResult<()>;

    /// Stores a history entry under `stamp`.
    fn save_history(&self, stamp: &str, data: &[u8]) -> FlipResult<()>;
}

/// Snapshots stored as files under one directory.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    dir: PathBuf,
}

impl FilesystemBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FilesystemBackend { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the history file for `stamp`.
    pub fn history_path(&self, stamp: &str) -> PathBuf {
        self.dir.join(HISTORY_DIR).join(format!("status_{stamp}.cf"))
    }
}

impl SnapshotBackend for FilesystemBackend {
    fn load(&self) -> FlipResult<Option<Vec<u8>>> {
        match fs::read(self.dir.join(CURRENT_FILE)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(FlipError::Persistence(err)),
        }
    }

    fn save_current(&self, data: &[u8]) -> FlipResult<()> {
        let tmp_path = self.dir.join(TEMP_FILE);
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp_path, self.dir.join(CURRENT_FILE))
        };
        write().map_err(FlipError::Persistence)
    }

    fn save_history(&self, stamp: &str, data: &[u8]) -> FlipResult<()> {
        let path = self.history_path(stamp);
        let write = || -> io::Result<()> {
            fs::create_dir_all(self.dir.join(HISTORY_DIR))?;
            let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
            file.write_all(data)
        };
        write().map_err(FlipError::Persistence)
    }
}

#[derive(Debug, Default)]
struct MemoryFiles {
    current: Option<Vec<u8>>,
    history: Vec<(String, Vec<u8>)>,
}

/// Snapshots kept in memory; used with `--no-persist` and in tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: Mutex<MemoryFiles>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    /// Creates a backend whose current snapshot is `data`.
    pub fn with_current(data: Vec<u8>) -> Self {
        let backend = MemoryBackend::new();
        backend.files.lock().current = Some(data);
        backend
    }

    pub fn current(&self) -> Option<Vec<u8>> {
        self.files.lock().current.clone()
    }

    /// History entries in write order.
    pub fn history(&self) -> Vec<(String, Vec<u8>)> {
        self.files.lock().history.clone()
    }
}

impl SnapshotBackend for MemoryBackend {
    fn load(&self) -> FlipResult<Option<Vec<u8>>> {
        Ok(self.current())
    }

    fn save_current(&self, data: &[u8]) -> FlipResult<()> {
        self.files.lock().current = Some(data.to_vec());
        Ok(())
    }

    fn save_history(&self, stamp: &str, data: &[u8]) -> FlipResult<()> {
        let mut files = self.files.lock();
        if files.history.iter().any(|(s, _)| s == stamp) {
            return Err(FlipError::Persistence(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("history entry {stamp} already exists"),
            )));
        }
        files.history.push((stamp.to_string(), data.to_vec()));
        Ok(())
    }
}

/// Formats a history stamp as `YYYY_MM_DD_HH_MM_SS` (UTC).
pub fn history_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y_%m_%d_%H_%M_%S").to_string()
}

/// Seeds `store` from the backend's current snapshot.
///
/// Returns the restored flip total, or `None` when there was nothing usable.
pub fn restore(backend: &dyn SnapshotBackend, store: &AggregateStore) -> Option<u64> {
    let data = match backend.load() {
        Ok(Some(data)) => data,
        Ok(None) => return None,
        Err(err) => {
            warn!(error = %err, "could not read snapshot; starting empty");
            return None;
        }
    };

    match CoinStatus::decode(&data[..]) {
        Ok(status) => {
            store.push(&status.histogram(), status.total_flips);
            info!(total_flips = status.total_flips, "loaded previous state");
            Some(status.total_flips)
        }
        Err(err) => {
            warn!(error = %err, "snapshot is corrupt; starting empty");
            None
        }
    }
}

/// Writes the store's current state as a history entry and as the current
/// snapshot.
///
/// Both writes are attempted; the first failure is returned.
pub fn persist(
    backend: &dyn SnapshotBackend,
    store: &AggregateStore,
    now: DateTime<Utc>,
) -> FlipResult<()> {
    let data = StatusSnapshot::from_state(store.snapshot())
        .to_wire()
        .encode_to_vec();

    let history = backend.save_history(&history_stamp(now), &data);
    let current = backend.save_current(&data);
    history.and(current)
}
