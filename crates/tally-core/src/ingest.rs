//! Consolidation of pending raw exports into the record store.
//!
//! Each pending source is handled on its own, in pool order:
//!
//! 1. Parse every row. Header rows (first field `time`) and blank lines are
//!    skipped per source; the first invalid row rejects the whole source.
//! 2. Reject a source that repeats one of its own records.
//! 3. Compare against records already stored (including sources merged
//!    earlier in the same run). A source whose records are all present is a
//!    re-submission and is consumed without appending. A source that only
//!    partially overlaps is rejected.
//! 4. Append the source's records as one atomic batch.
//! 5. Remove the source from the pool.
//!
//! Rejected sources stay in the pool untouched for an operator to fix.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::record::{RecordKey, parse_source};
use crate::store::{RecordStore, StoreError};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures that abort a consolidation run.
///
/// Problems confined to one source are reported in
/// [`ConsolidationReport::sources_rejected`] instead.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("pending pool {} is unreadable: {source}", path.display())]
    PoolUnreadable { path: PathBuf, source: io::Error },

    /// The source was appended but could not be removed from the pool. The
    /// next run recognizes it as already merged.
    #[error("source {source_name} was merged but could not be removed: {source}")]
    ConsumeFailed { source_name: String, source: io::Error },
}

impl IngestError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(err) => err.code(),
            Self::PoolUnreadable { .. } | Self::ConsumeFailed { .. } => {
                ErrorCode::PendingPoolUnreadable
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pending pool
// ---------------------------------------------------------------------------

/// An unconsolidated batch of rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBatch {
    pub name: String,
    pub content: String,
}

impl RawBatch {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Collection of raw sources awaiting consolidation.
pub trait PendingPool {
    /// Names of pending sources in the order they should be merged.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::PoolUnreadable`] if the pool cannot be listed.
    fn list(&self) -> Result<Vec<String>, IngestError>;

    /// Read one source's content.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the source cannot be read; the source is then
    /// rejected for this run.
    fn read(&self, name: &str) -> io::Result<String>;

    /// Remove a merged source from the pool.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the source cannot be removed.
    fn mark_consumed(&mut self, name: &str) -> io::Result<()>;
}

/// A directory of raw export files, merged in file-name order.
#[derive(Debug, Clone)]
pub struct DirPool {
    dir: PathBuf,
    extension: String,
}

impl DirPool {
    /// Pool over files in `dir` ending in `.{extension}`.
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PendingPool for DirPool {
    fn list(&self) -> Result<Vec<String>, IngestError> {
        if !self.dir.exists() {
            debug!(dir = %self.dir.display(), "pending directory absent; pool is empty");
            return Ok(Vec::new());
        }

        let unreadable = |source| IngestError::PoolUnreadable {
            path: self.dir.clone(),
            source,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    fn read(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.dir.join(name))
    }

    fn mark_consumed(&mut self, name: &str) -> io::Result<()> {
        fs::remove_file(self.dir.join(name))
    }
}

/// In-memory pool, merged in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryPool {
    batches: Vec<RawBatch>,
}

impl MemoryPool {
    #[must_use]
    pub const fn new(batches: Vec<RawBatch>) -> Self {
        Self { batches }
    }

    pub fn push(&mut self, batch: RawBatch) {
        self.batches.push(batch);
    }

    /// Sources still pending.
    #[must_use]
    pub fn remaining(&self) -> &[RawBatch] {
        &self.batches
    }
}

impl PendingPool for MemoryPool {
    fn list(&self) -> Result<Vec<String>, IngestError> {
        Ok(self.batches.iter().map(|b| b.name.clone()).collect())
    }

    fn read(&self, name: &str) -> io::Result<String> {
        self.batches
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.content.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no batch {name}")))
    }

    fn mark_consumed(&mut self, name: &str) -> io::Result<()> {
        let before = self.batches.len();
        self.batches.retain(|b| b.name != name);
        if self.batches.len() == before {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no batch {name}"),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Why a source was left pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RejectReason {
    /// A row violates the record constraints.
    Malformed { row_index: usize, message: String },
    /// Some, but not all, of the source's records are already stored.
    DuplicateRecords { overlapping: usize, total: usize },
    /// The source lists the same record more than once.
    RepeatedRecords { repeated: usize, total: usize },
    /// The source could not be read.
    Unreadable { message: String },
}

impl RejectReason {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed { .. } => ErrorCode::MalformedRecord,
            Self::DuplicateRecords { .. } | Self::RepeatedRecords { .. } => {
                ErrorCode::DuplicateRecords
            }
            Self::Unreadable { .. } => ErrorCode::PendingPoolUnreadable,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { row_index, message } => write!(f, "row {row_index}: {message}"),
            Self::DuplicateRecords { overlapping, total } => write!(
                f,
                "{overlapping} of {total} records are already in the store"
            ),
            Self::RepeatedRecords { repeated, total } => write!(
                f,
                "{repeated} of {total} records repeat an earlier row of the same source"
            ),
            Self::Unreadable { message } => write!(f, "unreadable: {message}"),
        }
    }
}

/// A source left pending, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub source: String,
    pub error_code: &'static str,
    pub reason: RejectReason,
}

impl Rejection {
    fn new(source: &str, reason: RejectReason) -> Self {
        Self {
            source: source.to_string(),
            error_code: reason.code().code(),
            reason,
        }
    }
}

/// Outcome of a consolidation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    pub sources_merged: usize,
    pub records_appended: usize,
    /// Re-submitted sources whose records were all present already.
    pub sources_skipped: usize,
    pub sources_rejected: Vec<Rejection>,
}

impl ConsolidationReport {
    /// True when the pool had nothing to consolidate.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.sources_merged == 0 && self.sources_skipped == 0 && self.sources_rejected.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Fold every pending source of `pool` into `store`.
///
/// The caller must hold exclusive access to `store` for the whole call.
///
/// # Errors
///
/// Returns [`IngestError`] if the pool cannot be listed, the store cannot be
/// read or appended to, or a merged source cannot be removed from the pool.
/// Sources merged before the failure stay merged.
pub fn consolidate<S, P>(store: &mut S, pool: &mut P) -> Result<ConsolidationReport, IngestError>
where
    S: RecordStore + ?Sized,
    P: PendingPool + ?Sized,
{
    let mut report = ConsolidationReport::default();

    let names = pool.list()?;
    if names.is_empty() {
        info!("pending pool is empty; nothing to consolidate");
        return Ok(report);
    }

    let mut stored: HashSet<RecordKey> = store.scan()?.map(|r| r.key()).collect();

    for name in names {
        let content = match pool.read(&name) {
            Ok(content) => content,
            Err(err) => {
                warn!(source = %name, error = %err, "rejecting unreadable source");
                report.sources_rejected.push(Rejection::new(
                    &name,
                    RejectReason::Unreadable {
                        message: err.to_string(),
                    },
                ));
                continue;
            }
        };

        let records = match parse_source(&name, &content) {
            Ok(records) => records,
            Err(err) => {
                warn!(source = %name, row = err.row_index, reason = %err.reason, "rejecting malformed source");
                report.sources_rejected.push(Rejection::new(
                    &name,
                    RejectReason::Malformed {
                        row_index: err.row_index,
                        message: err.reason.to_string(),
                    },
                ));
                continue;
            }
        };

        let mut seen = HashSet::with_capacity(records.len());
        let repeated = records.iter().filter(|r| !seen.insert(r.key())).count();
        if repeated > 0 {
            warn!(source = %name, repeated, total = records.len(), "rejecting source with repeated rows");
            report.sources_rejected.push(Rejection::new(
                &name,
                RejectReason::RepeatedRecords {
                    repeated,
                    total: records.len(),
                },
            ));
            continue;
        }

        let overlapping = records.iter().filter(|r| stored.contains(&r.key())).count();
        if !records.is_empty() && overlapping == records.len() {
            pool.mark_consumed(&name)
                .map_err(|source| IngestError::ConsumeFailed {
                    source_name: name.clone(),
                    source,
                })?;
            info!(source = %name, records = records.len(), "source already merged; consumed");
            report.sources_skipped += 1;
            continue;
        }
        if overlapping > 0 {
            warn!(source = %name, overlapping, total = records.len(), "rejecting overlapping source");
            report.sources_rejected.push(Rejection::new(
                &name,
                RejectReason::DuplicateRecords {
                    overlapping,
                    total: records.len(),
                },
            ));
            continue;
        }

        let appended = store.append(&records)?;
        stored.extend(records.iter().map(|r| r.key()));

        pool.mark_consumed(&name)
            .map_err(|source| IngestError::ConsumeFailed {
                source_name: name.clone(),
                source,
            })?;

        info!(source = %name, records = appended, "consolidated source");
        report.sources_merged += 1;
        report.records_appended += appended;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::store::MemoryStore;
    use chrono::Datelike;
    use tempfile::TempDir;

    const JAN: &str = "time,strikes,length,value\n\
                       2024-01-01 03:00:00,0,360,12\n\
                       2024-01-01 06:10:00,1,340,13\n";

    const FEB: &str = "time,strikes,length,value\n\
                       2024-02-01 07:00:00,2,300,9\n";

    fn stored(store: &MemoryStore) -> Vec<Record> {
        store.scan().unwrap().collect()
    }

    #[test]
    fn empty_pool_is_noop() {
        let mut store = MemoryStore::new();
        let mut pool = MemoryPool::default();

        let report = consolidate(&mut store, &mut pool).unwrap();
        assert!(report.is_noop());
        assert_eq!(report, ConsolidationReport::default());
        assert!(store.is_empty());

        let again = consolidate(&mut store, &mut pool).unwrap();
        assert_eq!(again, report);
    }

    #[test]
    fn merges_sources_in_order_and_consumes_them() {
        let mut store = MemoryStore::new();
        let mut pool = MemoryPool::new(vec![RawBatch::new("a.csv", JAN), RawBatch::new("b.csv", FEB)]);

        let report = consolidate(&mut store, &mut pool).unwrap();
        assert_eq!(report.sources_merged, 2);
        assert_eq!(report.records_appended, 3);
        assert!(report.sources_rejected.is_empty());
        assert!(pool.remaining().is_empty());
        assert_eq!(stored(&store).len(), 3);
    }

    #[test]
    fn malformed_source_is_rejected_whole_and_stays_pending() {
        let bad = "time,strikes,length,value\n\
                   2024-03-01 07:00:00,2,300,9\n\
                   2024-03-02 07:00:00,2,0,9\n\
                   2024-03-03 07:00:00,2,300,9\n";
        let mut store = MemoryStore::new();
        let mut pool = MemoryPool::new(vec![
            RawBatch::new("a.csv", JAN),
            RawBatch::new("bad.csv", bad),
            RawBatch::new("b.csv", FEB),
        ]);

        let report = consolidate(&mut store, &mut pool).unwrap();
        assert_eq!(report.sources_merged, 2);
        assert_eq!(report.records_appended, 3);
        assert_eq!(report.sources_rejected.len(), 1);

        let rejection = &report.sources_rejected[0];
        assert_eq!(rejection.source, "bad.csv");
        assert_eq!(rejection.error_code, "E2001");
        assert!(matches!(
            rejection.reason,
            RejectReason::Malformed { row_index: 3, .. }
        ));

        assert_eq!(pool.remaining().len(), 1);
        assert_eq!(pool.remaining()[0].name, "bad.csv");
        assert!(stored(&store).iter().all(|r| r.timestamp().month() != 3));
    }

    #[test]
    fn resubmitted_source_is_consumed_without_duplication() {
        let mut store = MemoryStore::new();
        let mut pool = MemoryPool::new(vec![RawBatch::new("a.csv", JAN)]);
        consolidate(&mut store, &mut pool).unwrap();

        pool.push(RawBatch::new("a-again.csv", JAN));
        let report = consolidate(&mut store, &mut pool).unwrap();
        assert_eq!(report.sources_skipped, 1);
        assert_eq!(report.records_appended, 0);
        assert!(pool.remaining().is_empty());
        assert_eq!(stored(&store).len(), 2);
    }

    #[test]
    fn duplicate_within_one_run_is_caught() {
        let mut store = MemoryStore::new();
        let mut pool = MemoryPool::new(vec![RawBatch::new("a.csv", JAN), RawBatch::new("copy.csv", JAN)]);

        let report = consolidate(&mut store, &mut pool).unwrap();
        assert_eq!(report.sources_merged, 1);
        assert_eq!(report.sources_skipped, 1);
        assert_eq!(stored(&store).len(), 2);
    }

    #[test]
    fn partially_overlapping_source_is_rejected() {
        let overlap = "time,strikes,length,value\n\
                       2024-01-01 06:10:00,1,340,13\n\
                       2024-01-02 06:10:00,1,340,13\n";
        let mut store = MemoryStore::new();
        let mut pool = MemoryPool::new(vec![RawBatch::new("a.csv", JAN), RawBatch::new("overlap.csv", overlap)]);

        let report = consolidate(&mut store, &mut pool).unwrap();
        assert_eq!(report.sources_merged, 1);
        assert_eq!(
            report.sources_rejected[0].reason,
            RejectReason::DuplicateRecords {
                overlapping: 1,
                total: 2
            }
        );
        assert_eq!(pool.remaining().len(), 1);
        assert_eq!(stored(&store).len(), 2);
    }

    #[test]
    fn source_repeating_a_row_is_rejected() {
        let repeats = "time,strikes,length,value\n\
                       2024-01-03 08:00:00,1,200,4\n\
                       2024-01-03 09:00:00,1,200,4\n\
                       2024-01-03 08:00:00,1,200,4\n";
        let mut store = MemoryStore::new();
        let mut pool = MemoryPool::new(vec![RawBatch::new("repeats.csv", repeats)]);

        let report = consolidate(&mut store, &mut pool).unwrap();
        assert_eq!(report.sources_merged, 0);
        let rejection = &report.sources_rejected[0];
        assert_eq!(rejection.error_code, "E2002");
        assert_eq!(
            rejection.reason,
            RejectReason::RepeatedRecords {
                repeated: 1,
                total: 3
            }
        );
        assert_eq!(pool.remaining().len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn header_only_source_is_consumed() {
        let mut store = MemoryStore::new();
        let mut pool = MemoryPool::new(vec![RawBatch::new("empty.csv", "time,strikes,length,value\n\n")]);

        let report = consolidate(&mut store, &mut pool).unwrap();
        assert_eq!(report.sources_merged, 1);
        assert_eq!(report.records_appended, 0);
        assert!(pool.remaining().is_empty());
    }

    struct StickyPool(MemoryPool);

    impl PendingPool for StickyPool {
        fn list(&self) -> Result<Vec<String>, IngestError> {
            self.0.list()
        }

        fn read(&self, name: &str) -> io::Result<String> {
            self.0.read(name)
        }

        fn mark_consumed(&mut self, _name: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    #[test]
    fn consume_failure_aborts_and_next_run_skips_source() {
        let mut store = MemoryStore::new();
        let mut sticky = StickyPool(MemoryPool::new(vec![RawBatch::new("a.csv", JAN)]));

        let err = consolidate(&mut store, &mut sticky).unwrap_err();
        assert!(matches!(err, IngestError::ConsumeFailed { ref source_name, .. } if source_name == "a.csv"));
        assert_eq!(stored(&store).len(), 2);

        let mut pool = sticky.0;
        let report = consolidate(&mut store, &mut pool).unwrap();
        assert_eq!(report.sources_skipped, 1);
        assert_eq!(stored(&store).len(), 2);
    }

    #[test]
    fn dir_pool_lists_matching_files_in_name_order() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.csv"), FEB).unwrap();
        fs::write(tmp.path().join("a.csv"), JAN).unwrap();
        fs::write(tmp.path().join("notes.txt"), "ignore me").unwrap();
        fs::create_dir(tmp.path().join("sub.csv")).unwrap();

        let mut pool = DirPool::new(tmp.path(), "csv");
        assert_eq!(pool.list().unwrap(), vec!["a.csv", "b.csv"]);
        assert_eq!(pool.read("a.csv").unwrap(), JAN);

        pool.mark_consumed("a.csv").unwrap();
        assert!(!tmp.path().join("a.csv").exists());
        assert_eq!(pool.list().unwrap(), vec!["b.csv"]);
    }

    #[test]
    fn missing_pending_dir_is_empty_pool() {
        let tmp = TempDir::new().unwrap();
        let pool = DirPool::new(tmp.path().join("absent"), "csv");
        assert!(pool.list().unwrap().is_empty());
    }
}
