//! Append-only record storage.
//!
//! The canonical store is a single CSV artifact under `.tally/`:
//!
//! ```text
//! .tally/
//!   records.csv        # header line, then one block of rows per appended batch
//!   records.manifest   # commit record: count, byte length, blake3 hash
//! ```
//!
//! # Invariants
//!
//! - Existing bytes are never rewritten; appends only extend the file.
//! - A batch is written with one `O_APPEND` + `write_all` + `flush` and is
//!   followed by a blank separator line.
//! - The manifest is rewritten after every successful append and acts as the
//!   commit point: bytes past `byte_len` that do not end in a complete batch
//!   are an interrupted append and are truncated before the next one.
//! - A failed write truncates the file back to its pre-append length.
//! - `scan` reads only committed bytes, so a batch interrupted by a crash is
//!   never visible, even before the next append repairs the file.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::record::{HEADER, MalformedRecordError, ParsedRow, Record, parse_row};

/// File name of the canonical store inside `.tally/`.
pub const STORE_FILE: &str = "records.csv";

/// File name of the store manifest inside `.tally/`.
pub const MANIFEST_FILE: &str = "records.manifest";

const BATCH_TERMINATOR: &[u8] = b"\n\n";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A stored or appended row violates the record constraints.
    #[error("malformed record: {0}")]
    Malformed(#[from] MalformedRecordError),

    /// The canonical store artifact does not exist.
    #[error("record store not found at {}", path.display())]
    Missing { path: PathBuf },

    /// I/O error during store operations.
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) => ErrorCode::MalformedRecord,
            Self::Missing { .. } => ErrorCode::MissingStore,
            Self::Io(_) => ErrorCode::StoreWriteFailed,
        }
    }
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Durable, ordered, append-only collection of [`Record`]s.
pub trait RecordStore {
    /// Append `records` in order. Either every record becomes visible to
    /// [`scan`](Self::scan) or none does.
    ///
    /// Returns the number of records appended.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the batch could not be written; the store is
    /// left as it was before the call.
    fn append(&mut self, records: &[Record]) -> Result<usize, StoreError>;

    /// Read every record, ordered by timestamp. Records sharing a timestamp
    /// keep their ingestion order. Calling `scan` has no side effects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing data cannot be read or parsed.
    fn scan(&self) -> Result<RecordScan, StoreError>;
}

/// Timestamp-ordered sequence of records produced by [`RecordStore::scan`].
#[derive(Debug)]
pub struct RecordScan {
    inner: std::vec::IntoIter<Record>,
}

impl RecordScan {
    /// Order records by timestamp, preserving ingestion order for ties.
    #[must_use]
    pub fn from_ingestion_order(mut records: Vec<Record>) -> Self {
        // sort_by_key is stable
        records.sort_by_key(Record::timestamp);
        Self {
            inner: records.into_iter(),
        }
    }
}

impl Iterator for RecordScan {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RecordScan {}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store, used by embedders and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Vec<Record>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn append(&mut self, records: &[Record]) -> Result<usize, StoreError> {
        self.records.extend_from_slice(records);
        Ok(records.len())
    }

    fn scan(&self) -> Result<RecordScan, StoreError> {
        Ok(RecordScan::from_ingestion_order(self.records.clone()))
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Integrity summary written after every successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreManifest {
    /// Number of record rows (excluding header and blank lines).
    pub record_count: u64,
    /// Total byte length of the store file.
    pub byte_len: u64,
    /// BLAKE3 hash of the entire store file contents.
    pub file_hash: String,
}

impl StoreManifest {
    fn for_content(content: &[u8]) -> Self {
        let record_count = String::from_utf8_lossy(content)
            .lines()
            .filter(|line| matches!(parse_row(line), Ok(ParsedRow::Record(_))))
            .count() as u64;

        Self {
            record_count,
            byte_len: content.len() as u64,
            file_hash: hash_bytes(content),
        }
    }

    /// Serialize manifest to a human-readable format.
    #[must_use]
    pub fn to_string_repr(&self) -> String {
        format!(
            "record_count: {}\nbyte_len: {}\nfile_hash: {}\n",
            self.record_count, self.byte_len, self.file_hash
        )
    }

    /// Parse a manifest from its string representation.
    ///
    /// Returns `None` if required fields are missing or unparseable.
    #[must_use]
    pub fn from_string_repr(s: &str) -> Option<Self> {
        let mut record_count = None;
        let mut byte_len = None;
        let mut file_hash = None;

        for line in s.lines() {
            if let Some(val) = line.strip_prefix("record_count: ") {
                record_count = val.parse().ok();
            } else if let Some(val) = line.strip_prefix("byte_len: ") {
                byte_len = val.parse().ok();
            } else if let Some(val) = line.strip_prefix("file_hash: ") {
                file_hash = Some(val.to_string());
            }
        }

        Some(Self {
            record_count: record_count?,
            byte_len: byte_len?,
            file_hash: file_hash?,
        })
    }
}

fn hash_bytes(content: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(content).to_hex())
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Outcome of comparing the store against its manifest.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ManifestStatus {
    Match,
    Missing,
    Mismatch {
        expected: String,
        actual: String,
    },
}

/// Result of [`FileStore::verify`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyReport {
    pub record_count: u64,
    pub byte_len: u64,
    pub manifest: ManifestStatus,
    /// Rows that fail to parse, as `line N: reason`.
    pub malformed_rows: Vec<String>,
    /// 1-based line numbers of rows identical to an earlier row.
    pub duplicate_rows: Vec<usize>,
    /// Whether the file ends in a partial line.
    pub torn_tail: bool,
}

impl VerifyReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.manifest == ManifestStatus::Match
            && self.malformed_rows.is_empty()
            && self.duplicate_rows.is_empty()
            && !self.torn_tail
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// State of the bytes past the last commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,
    /// A whole batch written after the last manifest update.
    UncommittedBatch,
    /// An append that never finished; committed data ends at `keep`.
    Interrupted { keep: usize },
}

/// The canonical CSV record store.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    durable: bool,
}

impl FileStore {
    /// Open an existing store artifact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] if `path` does not exist. Nothing is
    /// created or modified in that case.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.is_file() {
            return Err(StoreError::Missing { path });
        }
        Ok(Self {
            path,
            durable: true,
        })
    }

    /// Create the store artifact with its header line and manifest.
    ///
    /// Does nothing to an existing artifact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file or its parent directory cannot
    /// be written.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let store = Self {
            path,
            durable: true,
        };
        if store.path.exists() {
            return Ok(store);
        }

        if let Some(parent) = store.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let header = format!("{HEADER}\n");
        fs::write(&store.path, &header)?;
        store.write_manifest(header.as_bytes())?;
        Ok(store)
    }

    /// Whether appends call `sync_data` before returning.
    #[must_use]
    pub const fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path to the manifest written alongside the store.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.with_file_name(MANIFEST_FILE)
    }

    fn ensure_exists(&self) -> Result<(), StoreError> {
        if self.path.is_file() {
            Ok(())
        } else {
            Err(StoreError::Missing {
                path: self.path.clone(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Manifest
    // -----------------------------------------------------------------------

    fn write_manifest(&self, content: &[u8]) -> Result<StoreManifest, StoreError> {
        let manifest = StoreManifest::for_content(content);
        fs::write(self.manifest_path(), manifest.to_string_repr())?;
        Ok(manifest)
    }

    /// Read the manifest if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the manifest exists but cannot be read.
    pub fn read_manifest(&self) -> Result<Option<StoreManifest>, StoreError> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(StoreManifest::from_string_repr(&content))
    }

    // -----------------------------------------------------------------------
    // Interrupted-append recovery
    // -----------------------------------------------------------------------

    /// Decide how much of `content` is committed.
    ///
    /// With a manifest whose hash matches the file prefix, bytes past
    /// `byte_len` are either a complete batch whose manifest update was lost
    /// or a partial batch. Without a usable manifest, only a trailing partial
    /// line is uncommitted.
    fn classify_tail(&self, content: &[u8]) -> Result<Tail, StoreError> {
        if let Some(manifest) = self.read_manifest()?
            && let Ok(committed) = usize::try_from(manifest.byte_len)
            && content.len() > committed
            && hash_bytes(&content[..committed]) == manifest.file_hash
        {
            return Ok(if content.ends_with(BATCH_TERMINATOR) {
                Tail::UncommittedBatch
            } else {
                Tail::Interrupted { keep: committed }
            });
        }

        let keep = content
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        Ok(if keep < content.len() {
            Tail::Interrupted { keep }
        } else {
            Tail::Clean
        })
    }

    /// Remove the remains of an append that never committed.
    ///
    /// A complete uncommitted batch is kept and the manifest refreshed; a
    /// partial batch or torn line is truncated.
    ///
    /// Returns the number of bytes truncated, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store cannot be read or truncated.
    pub fn recover_uncommitted(&self) -> Result<Option<u64>, StoreError> {
        self.ensure_exists()?;
        let content = fs::read(&self.path)?;

        match self.classify_tail(&content)? {
            Tail::Clean => Ok(None),
            Tail::UncommittedBatch => {
                warn!(
                    path = %self.path.display(),
                    "store has a complete uncommitted batch; refreshing manifest"
                );
                self.write_manifest(&content)?;
                Ok(None)
            }
            Tail::Interrupted { keep } => {
                let truncated = (content.len() - keep) as u64;
                warn!(
                    path = %self.path.display(),
                    truncated,
                    "rolling back interrupted append"
                );
                let file = OpenOptions::new().write(true).open(&self.path)?;
                file.set_len(keep as u64)?;
                Ok(Some(truncated))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    /// Re-parse the whole store and compare it against its manifest.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] or [`StoreError::Io`] if the store
    /// cannot be read. Integrity problems are reported, not returned as
    /// errors.
    pub fn verify(&self) -> Result<VerifyReport, StoreError> {
        self.ensure_exists()?;
        let bytes = fs::read(&self.path)?;
        let content = String::from_utf8_lossy(&bytes);

        let mut record_count = 0_u64;
        let mut malformed_rows = Vec::new();
        let mut duplicate_rows = Vec::new();
        let mut seen = HashMap::new();

        for (idx, line) in content.lines().enumerate() {
            match parse_row(line) {
                Ok(ParsedRow::Record(record)) => {
                    record_count += 1;
                    if seen.insert(record.key(), idx + 1).is_some() {
                        duplicate_rows.push(idx + 1);
                    }
                }
                Ok(ParsedRow::Header | ParsedRow::Blank) => {}
                Err(reason) => malformed_rows.push(format!("line {}: {reason}", idx + 1)),
            }
        }

        let actual = StoreManifest::for_content(&bytes);
        let manifest = match self.read_manifest()? {
            None => ManifestStatus::Missing,
            Some(expected) if expected == actual => ManifestStatus::Match,
            Some(expected) => ManifestStatus::Mismatch {
                expected: expected.to_string_repr(),
                actual: actual.to_string_repr(),
            },
        };

        Ok(VerifyReport {
            record_count,
            byte_len: bytes.len() as u64,
            manifest,
            malformed_rows,
            duplicate_rows,
            torn_tail: !bytes.is_empty() && !bytes.ends_with(b"\n"),
        })
    }
}

impl RecordStore for FileStore {
    fn append(&mut self, records: &[Record]) -> Result<usize, StoreError> {
        self.ensure_exists()?;
        if records.is_empty() {
            return Ok(0);
        }

        self.recover_uncommitted()?;

        let mut batch = String::new();
        for record in records {
            batch.push_str(&record.to_row());
            batch.push('\n');
        }
        batch.push('\n');

        let before = fs::metadata(&self.path)?.len();
        let mut file = OpenOptions::new().append(true).open(&self.path)?;

        let written = file
            .write_all(batch.as_bytes())
            .and_then(|()| file.flush())
            .and_then(|()| if self.durable { file.sync_data() } else { Ok(()) });

        if let Err(err) = written {
            warn!(path = %self.path.display(), error = %err, "append failed; rolling back");
            file.set_len(before)?;
            return Err(StoreError::Io(err));
        }

        let content = fs::read(&self.path)?;
        self.write_manifest(&content)?;
        debug!(path = %self.path.display(), records = records.len(), "appended batch");
        Ok(records.len())
    }

    fn scan(&self) -> Result<RecordScan, StoreError> {
        self.ensure_exists()?;
        let bytes = fs::read(&self.path)?;
        let visible = match self.classify_tail(&bytes)? {
            Tail::Clean | Tail::UncommittedBatch => &bytes[..],
            Tail::Interrupted { keep } => {
                debug!(
                    path = %self.path.display(),
                    hidden = bytes.len() - keep,
                    "scan skipping uncommitted tail"
                );
                &bytes[..keep]
            }
        };
        let content = std::str::from_utf8(visible)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let source_name = self
            .path
            .file_name()
            .map_or_else(|| STORE_FILE.to_string(), |n| n.to_string_lossy().into_owned());

        let records = crate::record::parse_source(&source_name, content)?;
        Ok(RecordScan::from_ingestion_order(records))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
