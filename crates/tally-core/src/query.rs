//! Project handle: the single entry point for consolidation and queries.
//!
//! ```text
//! <root>/
//!   .tally/
//!     records.csv        canonical store
//!     records.manifest   store commit record
//!     pending/           raw exports awaiting consolidation
//!     config.toml
//!     lock               advisory lock (exclusive: consolidate, shared: reads)
//! ```
//!
//! Every read re-scans the store under a shared lock; nothing is cached
//! between calls.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::aggregate::{AggregateResult, YearPeriods, aggregate, available_periods};
use crate::config::{self, ProjectConfig, TALLY_DIR};
use crate::error::ErrorCode;
use crate::granularity::FilterState;
use crate::ingest::{self, ConsolidationReport, DirPool, IngestError};
use crate::lock::{IngestLock, LOCK_FILE, LockError, ReadLock};
use crate::store::{FileStore, RecordStore, STORE_FILE, StoreError, VerifyReport};

/// Errors surfaced by [`Tally`].
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    #[error("no tally project at {}", root.display())]
    NotInitialized { root: PathBuf },

    #[error("{} already exists", path.display())]
    AlreadyInitialized { path: PathBuf },

    #[error("config error: {0:#}")]
    Config(anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("{0}")]
    Lock(#[from] LockError),

    #[error("failed to initialize {}: {source}", path.display())]
    InitFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl TallyError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized { .. } => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Config(_) => ErrorCode::ConfigParseError,
            Self::Store(err) => err.code(),
            Self::Ingest(err) => err.code(),
            Self::Lock(err) => err.code(),
            Self::InitFailed { .. } => ErrorCode::StoreWriteFailed,
        }
    }
}

/// A tally project rooted at a directory.
#[derive(Debug, Clone)]
pub struct Tally {
    root: PathBuf,
    config: ProjectConfig,
}

impl Tally {
    /// Create the project skeleton under `root`.
    ///
    /// An existing store is never overwritten; `force` only rewrites the
    /// config file and recreates missing directories.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::AlreadyInitialized`] if `.tally/` exists and
    /// `force` is false, or an I/O-backed error if creation fails.
    pub fn init(root: impl Into<PathBuf>, force: bool) -> Result<Self, TallyError> {
        let root = root.into();
        let tally_dir = root.join(TALLY_DIR);
        if tally_dir.exists() && !force {
            return Err(TallyError::AlreadyInitialized { path: tally_dir });
        }

        let init_failed = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TallyError::InitFailed { path, source }
        };

        fs::create_dir_all(&tally_dir).map_err(init_failed(&tally_dir))?;
        FileStore::create(tally_dir.join(STORE_FILE))?;

        let config_path = config::config_path(&root);
        let rendered = config::default_config_toml().map_err(TallyError::Config)?;
        fs::write(&config_path, rendered).map_err(init_failed(&config_path))?;

        let tally = Self::open(&root)?;
        let pending = tally.pending_dir();
        fs::create_dir_all(&pending).map_err(init_failed(&pending))?;

        info!(root = %root.display(), "initialized tally project");
        Ok(tally)
    }

    /// Open an initialized project.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::NotInitialized`] if `.tally/` is absent or
    /// [`TallyError::Config`] if the config file is invalid.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, TallyError> {
        let root = root.into();
        if !root.join(TALLY_DIR).is_dir() {
            return Err(TallyError::NotInitialized { root });
        }
        let config = config::load_project_config(&root).map_err(TallyError::Config)?;
        Ok(Self { root, config })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn config(&self) -> &ProjectConfig {
        &self.config
    }

    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.root.join(TALLY_DIR).join(STORE_FILE)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(TALLY_DIR).join(LOCK_FILE)
    }

    #[must_use]
    pub fn pending_dir(&self) -> PathBuf {
        self.config.ingest.resolve_pending_dir(&self.root)
    }

    fn open_store(&self) -> Result<FileStore, TallyError> {
        Ok(FileStore::open(self.store_path())?.with_durable(self.config.store.durable))
    }

    /// Merge every pending raw export into the store.
    ///
    /// Holds the exclusive lock for the whole batch. A missing store halts
    /// the run before the pending pool is touched. Remains of an interrupted
    /// append are rolled back first.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Lock`] on contention, [`TallyError::Store`] if
    /// the store is missing or unwritable, or [`TallyError::Ingest`] for
    /// other run-aborting failures. Per-source rejections are in the report.
    pub fn consolidate(&self) -> Result<ConsolidationReport, TallyError> {
        let _lock = IngestLock::acquire(&self.lock_path(), self.config.store.lock_timeout())?;
        let mut store = self.open_store()?;
        store.recover_uncommitted()?;
        let mut pool = DirPool::new(self.pending_dir(), self.config.ingest.extension.clone());

        let report = ingest::consolidate(&mut store, &mut pool)?;
        info!(
            merged = report.sources_merged,
            appended = report.records_appended,
            skipped = report.sources_skipped,
            rejected = report.sources_rejected.len(),
            "consolidation finished"
        );
        Ok(report)
    }

    /// Aggregate the store under `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Lock`] if a consolidation holds the lock past the
    /// timeout, or [`TallyError::Store`] if the store cannot be read.
    pub fn query(&self, filter: &FilterState) -> Result<AggregateResult, TallyError> {
        let _lock = ReadLock::acquire(&self.lock_path(), self.config.store.lock_timeout())?;
        let records = self.open_store()?.scan()?;
        Ok(aggregate(records, filter))
    }

    /// Years and months present in the store.
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query).
    pub fn periods(&self) -> Result<Vec<YearPeriods>, TallyError> {
        let _lock = ReadLock::acquire(&self.lock_path(), self.config.store.lock_timeout())?;
        let records = self.open_store()?.scan()?;
        Ok(available_periods(records))
    }

    /// Check the store against its manifest and for malformed or duplicate
    /// rows.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Lock`] on contention or [`TallyError::Store`] if
    /// the store cannot be read.
    pub fn verify(&self) -> Result<VerifyReport, TallyError> {
        let _lock = ReadLock::acquire(&self.lock_path(), self.config.store.lock_timeout())?;
        Ok(self.open_store()?.verify()?)
    }
}
