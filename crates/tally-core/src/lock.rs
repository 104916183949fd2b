//! Advisory locks coordinating consolidation and queries.
//!
//! A single lock file under `.tally/` carries both modes: consolidation takes
//! it exclusively for the whole batch, readers take it shared. Readers
//! therefore observe the store either before or after a consolidation, never
//! halfway through one.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::ErrorCode;

/// File name of the lock inside `.tally/`.
pub const LOCK_FILE: &str = "lock";

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Failure to take the project lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another tally process kept the lock for longer than the timeout.
    #[error("{} is held by another tally process (waited {waited:?})", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    /// The lock file could not be created, opened, or locked.
    #[error("cannot lock {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Open { .. } => ErrorCode::StoreWriteFailed,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// What the holder intends to do with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Ingest,
}

impl Access {
    fn try_lock(self, file: &File) -> io::Result<()> {
        match self {
            Self::Read => FileExt::try_lock_shared(file),
            Self::Ingest => FileExt::try_lock_exclusive(file),
        }
    }
}

/// An open lock file; unlocked when dropped.
#[derive(Debug)]
struct HeldLock {
    file: File,
}

impl HeldLock {
    fn acquire(path: &Path, timeout: Duration, access: Access) -> Result<Self, LockError> {
        let open_failed = |source| LockError::Open {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(open_failed)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(open_failed)?;

        let contended = fs2::lock_contended_error().kind();
        let start = Instant::now();
        loop {
            match access.try_lock(&file) {
                Ok(()) => {
                    debug!(
                        path = %path.display(),
                        ?access,
                        waited = ?start.elapsed(),
                        "lock acquired"
                    );
                    return Ok(Self { file });
                }
                Err(err) if err.kind() != contended => return Err(open_failed(err)),
                Err(_) => {}
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            thread::sleep(RETRY_INTERVAL);
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Exclusive lock held while a consolidation appends to the store.
#[derive(Debug)]
pub struct IngestLock {
    _held: HeldLock,
}

impl IngestLock {
    /// Wait up to `timeout` for every reader and any other consolidation to
    /// finish.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the lock is still held elsewhere
    /// after `timeout`, or [`LockError::Open`] if the lock file is unusable.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        HeldLock::acquire(path, timeout, Access::Ingest).map(|held| Self { _held: held })
    }
}

/// Shared lock held by `query`, `periods`, and `verify`.
#[derive(Debug)]
pub struct ReadLock {
    _held: HeldLock,
}

impl ReadLock {
    /// Wait up to `timeout` for an in-flight consolidation to finish.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if a consolidation still holds the lock
    /// after `timeout`, or [`LockError::Open`] if the lock file is unusable.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        HeldLock::acquire(path, timeout, Access::Read).map(|held| Self { _held: held })
    }
}
