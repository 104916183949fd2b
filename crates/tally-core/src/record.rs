//! Practice-session records and their CSV row form.
//!
//! # Row format
//!
//! ```text
//! time,strikes,length,value
//! 2024-01-01 03:00:00,0,360,12
//! ```
//!
//! - A line whose first field is the literal `time` is a header and is
//!   skipped wherever it appears; every raw export carries its own.
//! - Blank/whitespace-only lines are separators and are skipped.
//! - Data lines have exactly four comma-separated fields. Whitespace around a
//!   field is ignored and a trailing `\r` is tolerated.

use std::fmt;

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;

/// Header line written at the top of the canonical store.
pub const HEADER: &str = "time,strikes,length,value";

/// Column-name token that marks a header row.
pub const HEADER_TOKEN: &str = "time";

/// Timestamp layout used in rows.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const FIELD_COUNT: usize = 4;

/// One timestamped practice session.
///
/// Fields are private so every `Record` in circulation has passed
/// [`Record::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Record {
    timestamp: NaiveDateTime,
    strike_count: u32,
    duration_seconds: u32,
    value: f64,
}

/// Identity of a record for duplicate detection (`value` compared bitwise).
pub type RecordKey = (NaiveDateTime, u32, u32, u64);

impl Record {
    /// Build a validated record.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] if the timestamp carries sub-second precision,
    /// the duration is zero, or the value is negative or not finite.
    pub fn new(
        timestamp: NaiveDateTime,
        strike_count: u32,
        duration_seconds: u32,
        value: f64,
    ) -> Result<Self, RowError> {
        if timestamp.nanosecond() != 0 {
            return Err(RowError::SubSecondTimestamp(timestamp.to_string()));
        }
        if duration_seconds == 0 {
            return Err(RowError::NonPositiveDuration(0));
        }
        if !value.is_finite() || value < 0.0 {
            return Err(RowError::InvalidValue(value.to_string()));
        }
        Ok(Self {
            timestamp,
            strike_count,
            duration_seconds,
            // -0.0 + 0.0 == +0.0, so equal values share one key
            value: value + 0.0,
        })
    }

    #[must_use]
    pub const fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    #[must_use]
    pub const fn strike_count(&self) -> u32 {
        self.strike_count
    }

    #[must_use]
    pub const fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Hour of day in `0..24`.
    #[must_use]
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    #[must_use]
    pub fn key(&self) -> RecordKey {
        (
            self.timestamp,
            self.strike_count,
            self.duration_seconds,
            self.value.to_bits(),
        )
    }

    /// Render as a CSV row without the trailing newline.
    #[must_use]
    pub fn to_row(&self) -> String {
        format!(
            "{},{},{},{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.strike_count,
            self.duration_seconds,
            self.value
        )
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a single row failed to become a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("expected 4 comma-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid timestamp '{0}' (expected YYYY-MM-DD HH:MM:SS)")]
    InvalidTimestamp(String),

    #[error("timestamp '{0}' has sub-second precision")]
    SubSecondTimestamp(String),

    #[error("invalid strike count '{0}' (expected integer >= 0)")]
    InvalidStrikeCount(String),

    #[error("invalid duration '{0}' (expected integer > 0)")]
    InvalidDuration(String),

    #[error("duration must be positive, got {0}")]
    NonPositiveDuration(i64),

    #[error("invalid value '{0}' (expected finite number >= 0)")]
    InvalidValue(String),
}

/// A row in a named source that violates the record constraints.
///
/// `row_index` is the 1-based line number within the source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{source_name}: row {row_index}: {reason}")]
pub struct MalformedRecordError {
    pub source_name: String,
    pub row_index: usize,
    pub reason: RowError,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Classification of one input line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRow {
    Header,
    Blank,
    Record(Record),
}

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Parse a single line.
///
/// # Errors
///
/// Returns [`RowError`] for data lines that are not a valid record.
pub fn parse_row(line: &str) -> Result<ParsedRow, RowError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Ok(ParsedRow::Blank);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields[0] == HEADER_TOKEN {
        return Ok(ParsedRow::Header);
    }
    if fields.len() != FIELD_COUNT {
        return Err(RowError::FieldCount(fields.len()));
    }

    let timestamp = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
        .map_err(|_| RowError::InvalidTimestamp(fields[0].to_string()))?;
    let strike_count = fields[1]
        .parse::<u32>()
        .map_err(|_| RowError::InvalidStrikeCount(fields[1].to_string()))?;
    let duration_seconds = parse_duration(fields[2])?;
    let value = fields[3]
        .parse::<f64>()
        .map_err(|_| RowError::InvalidValue(fields[3].to_string()))?;

    Record::new(timestamp, strike_count, duration_seconds, value).map(ParsedRow::Record)
}

fn parse_duration(raw: &str) -> Result<u32, RowError> {
    let parsed = raw
        .parse::<i64>()
        .map_err(|_| RowError::InvalidDuration(raw.to_string()))?;
    if parsed <= 0 {
        return Err(RowError::NonPositiveDuration(parsed));
    }
    u32::try_from(parsed).map_err(|_| RowError::InvalidDuration(raw.to_string()))
}

/// Parse a whole source, stopping at the first malformed row.
///
/// # Errors
///
/// Returns [`MalformedRecordError`] naming `source_name` and the 1-based line
/// of the first invalid row. No partial result is returned.
pub fn parse_source(source_name: &str, content: &str) -> Result<Vec<Record>, MalformedRecordError> {
    // Spreadsheet exporters often prepend a byte order mark.
    let content = content.strip_prefix(BYTE_ORDER_MARK).unwrap_or(content);
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        match parse_row(line) {
            Ok(ParsedRow::Record(record)) => records.push(record),
            Ok(ParsedRow::Header | ParsedRow::Blank) => {}
            Err(reason) => {
                return Err(MalformedRecordError {
                    source_name: source_name.to_string(),
                    row_index: idx + 1,
                    reason,
                });
            }
        }
    }
    Ok(records)
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_row())
    }
}
