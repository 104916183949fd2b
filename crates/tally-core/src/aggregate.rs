//! Rollup of records into day, week, and hour buckets.
//!
//! # Week numbering
//!
//! Weeks are 7-day spans counted from January 1st: days 1-7 of the year are
//! week 1, days 8-14 week 2, and so on. The last week of a year holds one day
//! (two in leap years) and is never merged with the first week of the next
//! year. This is deliberately not ISO-8601 week numbering.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::granularity::{FilterState, Granularity, select_granularity};
use crate::record::Record;

/// Number of slots in the hourly profile.
pub const HOURS_PER_DAY: usize = 24;

/// Identifier of a day or week bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketKey {
    /// Rendered `YYYY-MM-DD`.
    Day(NaiveDate),
    /// Rendered `YYYY-Www`.
    Week { year: i32, week: u32 },
}

impl BucketKey {
    /// Day key for the calendar date of `timestamp`.
    #[must_use]
    pub fn day(timestamp: NaiveDateTime) -> Self {
        Self::Day(timestamp.date())
    }

    /// Week key for `timestamp`, counting 7-day spans from January 1st.
    #[must_use]
    pub fn week(timestamp: NaiveDateTime) -> Self {
        let date = timestamp.date();
        Self::Week {
            year: date.year(),
            week: date.ordinal0() / 7 + 1,
        }
    }

    fn for_granularity(timestamp: NaiveDateTime, granularity: Granularity) -> Self {
        match granularity {
            Granularity::Week => Self::week(timestamp),
            Granularity::Day | Granularity::Hour => Self::day(timestamp),
        }
    }

    #[must_use]
    pub fn year(&self) -> i32 {
        match self {
            Self::Day(date) => date.year(),
            Self::Week { year, .. } => *year,
        }
    }

    /// Calendar month, only meaningful for day keys.
    #[must_use]
    pub fn month(&self) -> Option<u32> {
        match self {
            Self::Day(date) => Some(date.month()),
            Self::Week { .. } => None,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::Week { year, week } => write!(f, "{year:04}-W{week:02}"),
        }
    }
}

impl Serialize for BucketKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Count and value total for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub key: BucketKey,
    pub year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    pub count: u64,
    pub total_value: f64,
}

impl Bucket {
    fn empty(key: BucketKey) -> Self {
        Self {
            key,
            year: key.year(),
            month: key.month(),
            count: 0,
            total_value: 0.0,
        }
    }
}

/// The predicate a query resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Window {
    /// Records at or after `since` (latest record minus the trailing months).
    Range { since: NaiveDateTime, months: u32 },
    /// Records of `year`, optionally restricted to `month`.
    Discrete { year: i32, month: Option<u32> },
}

impl Window {
    /// Resolve `filter` against the (timestamp-ordered) records.
    ///
    /// Returns `None` when there are no records to anchor a default year or a
    /// trailing range on.
    fn resolve(records: &[Record], filter: &FilterState) -> Option<Self> {
        let latest = records.last()?.timestamp();

        if let Some(months) = filter.trailing_range_months {
            let since = latest
                .checked_sub_months(Months::new(months))
                .unwrap_or(NaiveDateTime::MIN);
            return Some(Self::Range { since, months });
        }

        Some(Self::Discrete {
            year: filter.year.unwrap_or_else(|| latest.year()),
            month: filter.month,
        })
    }

    fn matches(&self, timestamp: NaiveDateTime) -> bool {
        match *self {
            Self::Range { since, .. } => timestamp >= since,
            Self::Discrete { year, month } => {
                timestamp.year() == year && month.is_none_or(|m| timestamp.month() == m)
            }
        }
    }

    /// The hourly profile honors the year or range but not the month.
    fn matches_hourly(&self, timestamp: NaiveDateTime) -> bool {
        match *self {
            Self::Range { since, .. } => timestamp >= since,
            Self::Discrete { year, .. } => timestamp.year() == year,
        }
    }
}

/// Everything the presentation layer needs for one filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub granularity: Granularity,
    /// `None` when the store is empty.
    pub window: Option<Window>,
    pub buckets: Vec<Bucket>,
    pub hourly_profile: [u64; HOURS_PER_DAY],
}

impl AggregateResult {
    fn empty(granularity: Granularity) -> Self {
        Self {
            granularity,
            window: None,
            buckets: Vec::new(),
            hourly_profile: [0; HOURS_PER_DAY],
        }
    }

    /// Records counted across all buckets.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    #[must_use]
    pub fn total_value(&self) -> f64 {
        self.buckets.iter().map(|b| b.total_value).sum()
    }
}

/// Roll `records` up under `filter`.
///
/// Records are summed in ascending timestamp order (ties in input order), so
/// floating-point totals are reproducible regardless of how the input was
/// ordered. Filters matching nothing produce empty buckets and an all-zero
/// hourly profile.
#[must_use]
pub fn aggregate<I>(records: I, filter: &FilterState) -> AggregateResult
where
    I: IntoIterator<Item = Record>,
{
    let granularity = select_granularity(filter);

    let mut records: Vec<Record> = records.into_iter().collect();
    records.sort_by_key(Record::timestamp);

    let Some(window) = Window::resolve(&records, filter) else {
        return AggregateResult::empty(granularity);
    };

    let mut buckets: BTreeMap<BucketKey, Bucket> = BTreeMap::new();
    let mut hourly_profile = [0_u64; HOURS_PER_DAY];

    for record in &records {
        let timestamp = record.timestamp();

        if window.matches_hourly(timestamp) {
            hourly_profile[record.hour() as usize] += 1;
        }
        if !window.matches(timestamp) {
            continue;
        }

        let key = BucketKey::for_granularity(timestamp, granularity);
        let bucket = buckets.entry(key).or_insert_with(|| Bucket::empty(key));
        bucket.count += 1;
        bucket.total_value += record.value();
    }

    debug!(
        %granularity,
        records = records.len(),
        buckets = buckets.len(),
        "aggregated records"
    );

    AggregateResult {
        granularity,
        window: Some(window),
        buckets: buckets.into_values().collect(),
        hourly_profile,
    }
}

/// A year present in the data and the months it has records for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearPeriods {
    pub year: i32,
    pub months: Vec<u32>,
    pub record_count: u64,
}

/// Years and months present in `records`, ascending.
#[must_use]
pub fn available_periods<I>(records: I) -> Vec<YearPeriods>
where
    I: IntoIterator<Item = Record>,
{
    let mut years: BTreeMap<i32, (BTreeSet<u32>, u64)> = BTreeMap::new();
    for record in records {
        let timestamp = record.timestamp();
        let (months, count) = years.entry(timestamp.year()).or_default();
        months.insert(timestamp.month());
        *count += 1;
    }

    years
        .into_iter()
        .map(|(year, (months, record_count))| YearPeriods {
            year,
            months: months.into_iter().collect(),
            record_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ParsedRow, parse_row};

    fn row(line: &str) -> Record {
        match parse_row(line) {
            Ok(ParsedRow::Record(record)) => record,
            other => panic!("expected record from {line:?}, got {other:?}"),
        }
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").expect("valid datetime")
    }

    fn keys(result: &AggregateResult) -> Vec<String> {
        result.buckets.iter().map(|b| b.key.to_string()).collect()
    }

    #[test]
    fn single_month_scenario() {
        let records = vec![
            row("2024-01-01 03:00:00,0,360,12"),
            row("2024-01-01 06:10:00,1,340,13"),
        ];
        let result = aggregate(records, &FilterState::month(2024, 1));

        assert_eq!(result.granularity, Granularity::Day);
        assert_eq!(result.buckets.len(), 1);
        let bucket = &result.buckets[0];
        assert_eq!(bucket.key.to_string(), "2024-01-01");
        assert_eq!(bucket.year, 2024);
        assert_eq!(bucket.month, Some(1));
        assert_eq!(bucket.count, 2);
        assert!((bucket.total_value - 25.0).abs() < f64::EPSILON);

        let mut expected = [0_u64; HOURS_PER_DAY];
        expected[3] = 1;
        expected[6] = 1;
        assert_eq!(result.hourly_profile, expected);
    }

    #[test]
    fn empty_input_yields_empty_result() {
        for filter in [
            FilterState::default(),
            FilterState::year(2024),
            FilterState::month(2024, 2),
            FilterState::trailing(3),
        ] {
            let result = aggregate(Vec::new(), &filter);
            assert!(result.buckets.is_empty());
            assert_eq!(result.hourly_profile, [0; HOURS_PER_DAY]);
            assert_eq!(result.window, None);
        }
    }

    #[test]
    fn filter_matching_nothing_is_not_an_error() {
        let records = vec![row("2024-01-01 03:00:00,0,360,12")];
        let result = aggregate(records, &FilterState::year(1999));
        assert!(result.buckets.is_empty());
        assert_eq!(result.hourly_profile, [0; HOURS_PER_DAY]);
        assert_eq!(
            result.window,
            Some(Window::Discrete {
                year: 1999,
                month: None
            })
        );
    }

    #[test]
    fn year_defaults_to_latest_present() {
        let records = vec![
            row("2023-05-01 10:00:00,0,60,1"),
            row("2024-02-01 10:00:00,0,60,2"),
        ];
        let result = aggregate(records, &FilterState::default());
        assert_eq!(result.granularity, Granularity::Week);
        assert_eq!(keys(&result), vec!["2024-W05"]);
    }

    #[test]
    fn week_keys_count_from_january_first() {
        assert_eq!(BucketKey::week(dt("2024-01-01 00:00:00")).to_string(), "2024-W01");
        assert_eq!(BucketKey::week(dt("2024-01-07 23:59:59")).to_string(), "2024-W01");
        assert_eq!(BucketKey::week(dt("2024-01-08 00:00:00")).to_string(), "2024-W02");
        // 2024 is a leap year: days 365 and 366 form week 53.
        assert_eq!(BucketKey::week(dt("2024-12-30 00:00:00")).to_string(), "2024-W53");
        assert_eq!(BucketKey::week(dt("2024-12-31 00:00:00")).to_string(), "2024-W53");
        assert_eq!(BucketKey::week(dt("2023-12-31 00:00:00")).to_string(), "2023-W53");
        assert_eq!(BucketKey::week(dt("2023-12-30 00:00:00")).to_string(), "2023-W52");
    }

    #[test]
    fn year_boundary_weeks_are_not_merged() {
        let records = vec![
            row("2023-12-31 10:00:00,0,60,1"),
            row("2024-01-01 10:00:00,0,60,2"),
        ];
        let result = aggregate(records.clone(), &FilterState::year(2023));
        assert_eq!(keys(&result), vec!["2023-W53"]);
        let result = aggregate(records, &FilterState::year(2024));
        assert_eq!(keys(&result), vec!["2024-W01"]);
    }

    #[test]
    fn weekly_buckets_are_sorted_and_gap_free() {
        let records = vec![
            row("2024-03-01 10:00:00,0,60,1"),
            row("2024-01-02 10:00:00,0,60,2"),
            row("2024-01-03 11:00:00,0,60,3"),
        ];
        let result = aggregate(records, &FilterState::year(2024));
        assert_eq!(keys(&result), vec!["2024-W01", "2024-W09"]);
        assert_eq!(result.buckets[0].count, 2);
        assert_eq!(result.buckets[0].month, None);
        assert!((result.buckets[0].total_value - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hourly_profile_ignores_month_but_respects_year() {
        let records = vec![
            row("2024-01-01 03:00:00,0,60,1"),
            row("2024-02-01 03:00:00,0,60,1"),
            row("2023-02-01 03:00:00,0,60,1"),
        ];
        let result = aggregate(records, &FilterState::month(2024, 1));
        assert_eq!(result.total_count(), 1);
        assert_eq!(result.hourly_profile[3], 2);
    }

    #[test]
    fn trailing_range_anchors_on_latest_record() {
        let records = vec![
            row("2023-12-31 23:59:59,0,60,1"),
            row("2024-01-15 08:00:00,0,60,2"),
            row("2024-03-15 08:00:00,0,60,3"),
            row("2024-04-15 09:00:00,0,60,4"),
        ];
        // Range overrides the discrete year.
        let filter = FilterState {
            year: Some(2023),
            month: Some(12),
            trailing_range_months: Some(3),
        };
        let result = aggregate(records, &filter);

        assert_eq!(result.granularity, Granularity::Day);
        assert_eq!(
            result.window,
            Some(Window::Range {
                since: dt("2024-01-15 09:00:00"),
                months: 3
            })
        );
        assert_eq!(keys(&result), vec!["2024-03-15", "2024-04-15"]);
        assert_eq!(result.hourly_profile[8], 1);
        assert_eq!(result.hourly_profile[9], 1);
    }

    #[test]
    fn trailing_range_boundary_is_inclusive() {
        let records = vec![
            row("2024-01-15 09:00:00,0,60,2"),
            row("2024-04-15 09:00:00,0,60,4"),
        ];
        let result = aggregate(records, &FilterState::trailing(3));
        assert_eq!(keys(&result), vec!["2024-01-15", "2024-04-15"]);
    }

    #[test]
    fn trailing_range_clamps_to_month_end() {
        let records = vec![
            row("2024-02-29 12:00:00,0,60,1"),
            row("2024-03-31 12:00:00,0,60,1"),
        ];
        // 2024-03-31 minus one month clamps to 2024-02-29.
        let result = aggregate(records, &FilterState::trailing(1));
        assert_eq!(result.total_count(), 2);
    }

    #[test]
    fn summation_follows_timestamp_order() {
        let forward = vec![
            row("2024-01-01 01:00:00,0,60,0.1"),
            row("2024-01-01 02:00:00,0,60,0.2"),
            row("2024-01-01 03:00:00,0,60,0.3"),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = aggregate(forward, &FilterState::month(2024, 1));
        let b = aggregate(reversed, &FilterState::month(2024, 1));
        assert_eq!(a.buckets[0].total_value.to_bits(), b.buckets[0].total_value.to_bits());
    }

    #[test]
    fn bucket_key_serializes_as_string() {
        let key = BucketKey::Week { year: 2024, week: 3 };
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"2024-W03\"");
    }

    #[test]
    fn periods_list_years_and_months() {
        let records = vec![
            row("2024-03-01 10:00:00,0,60,1"),
            row("2023-11-02 10:00:00,0,60,2"),
            row("2024-01-03 11:00:00,0,60,3"),
            row("2024-03-05 11:00:00,0,60,3"),
        ];
        let periods = available_periods(records);
        assert_eq!(
            periods,
            vec![
                YearPeriods {
                    year: 2023,
                    months: vec![11],
                    record_count: 1
                },
                YearPeriods {
                    year: 2024,
                    months: vec![1, 3],
                    record_count: 3
                },
            ]
        );
    }
}
