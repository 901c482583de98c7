//! Per-record write locks.
//!
//! Every mutation locks the records it rewrites. Keys are always taken in
//! [`RecordKey`] order (children before parents), so two writers touching
//! overlapping records cannot deadlock.
//!
//! Two modes:
//! - `process`: an in-memory lock table shared by every clone of the manager.
//! - `os`: the same table, plus an exclusive `fs2` lock on
//!   `<root>/.locks/<key>.lock` so separate processes serialize too.
//!
//! Uses the `fs2` crate for cross-platform file locking (MSRV 1.75 compatible).

use crate::model::RecordKey;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Name of the lock-file directory under the store root.
pub const LOCK_DIR: &str = ".locks";

const OS_LOCK_POLL: Duration = Duration::from_millis(20);

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Timed out after {waited_ms} ms waiting for {key}")]
    Timeout { key: String, waited_ms: u64 },

    #[error("Lock table poisoned by a panicked writer")]
    Poisoned,

    #[error("Failed to create lock file {}: {source}", .path.display())]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to acquire lock on {}: {source}", .path.display())]
    AcquireFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Serialize writers inside this process only
    #[default]
    Process,
    /// Also take OS-level file locks
    Os,
}

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashSet<RecordKey>>,
    released: Condvar,
}

/// Hands out record locks. Clones share one lock table.
#[derive(Debug, Clone)]
pub struct LockManager {
    table: Arc<LockTable>,
    mode: LockMode,
    lock_dir: PathBuf,
    timeout: Duration,
}

/// One held record lock, released on drop.
#[derive(Debug)]
pub struct RecordLock {
    key: RecordKey,
    table: Arc<LockTable>,
    file: Option<File>,
}

impl RecordLock {
    pub fn key(&self) -> &RecordKey {
        &self.key
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        // Closing the file releases the OS lock before in-process waiters wake.
        drop(self.file.take());
        if let Ok(mut held) = self.table.held.lock() {
            held.remove(&self.key);
        }
        self.table.released.notify_all();
        debug!(key = %self.key, "Released record lock");
    }
}

/// Every lock taken for one operation.
#[derive(Debug)]
pub struct LockSet {
    locks: Vec<RecordLock>,
}

impl LockSet {
    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.locks.iter().map(RecordLock::key)
    }

    pub fn holds(&self, key: &RecordKey) -> bool {
        self.keys().any(|k| k == key)
    }
}

impl LockManager {
    pub fn new(mode: LockMode, lock_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            table: Arc::new(LockTable::default()),
            mode,
            lock_dir: lock_dir.into(),
            timeout,
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn lock(&self, key: RecordKey) -> Result<LockSet, LockError> {
        self.lock_all([key])
    }

    /// Lock every key, in canonical order. Duplicates are taken once.
    ///
    /// On failure the locks already taken are released before returning.
    pub fn lock_all(
        &self,
        keys: impl IntoIterator<Item = RecordKey>,
    ) -> Result<LockSet, LockError> {
        let mut keys: Vec<RecordKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let deadline = Instant::now() + self.timeout;
        let mut locks = Vec::with_capacity(keys.len());
        for key in keys {
            locks.push(self.acquire(key, deadline)?);
        }
        Ok(LockSet { locks })
    }

    fn acquire(&self, key: RecordKey, deadline: Instant) -> Result<RecordLock, LockError> {
        {
            let mut held = self.table.held.lock().map_err(|_| LockError::Poisoned)?;
            while held.contains(&key) {
                let now = Instant::now();
                if now >= deadline {
                    return Err(self.timeout_error(&key));
                }
                let (guard, _) = self
                    .table
                    .released
                    .wait_timeout(held, deadline - now)
                    .map_err(|_| LockError::Poisoned)?;
                held = guard;
            }
            held.insert(key.clone());
        }

        let mut lock = RecordLock {
            key,
            table: Arc::clone(&self.table),
            file: None,
        };
        if self.mode == LockMode::Os {
            // On error `lock` drops and leaves the table.
            lock.file = Some(self.acquire_file(&lock.key, deadline)?);
        }
        debug!(key = %lock.key, "Acquired record lock");
        Ok(lock)
    }

    fn acquire_file(&self, key: &RecordKey, deadline: Instant) -> Result<File, LockError> {
        fs::create_dir_all(&self.lock_dir).map_err(|source| LockError::CreateFailed {
            path: self.lock_dir.clone(),
            source,
        })?;
        let path = self.lock_dir.join(key.lock_file_name());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::CreateFailed {
                path: path.clone(),
                source,
            })?;

        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(file),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(self.timeout_error(key));
                    }
                    std::thread::sleep(OS_LOCK_POLL);
                }
                Err(source) => return Err(LockError::AcquireFailed { path, source }),
            }
        }
    }

    fn timeout_error(&self, key: &RecordKey) -> LockError {
        LockError::Timeout {
            key: key.to_string(),
            waited_ms: self.timeout.as_millis() as u64,
        }
    }
}
