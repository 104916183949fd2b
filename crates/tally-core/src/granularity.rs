//! Filter state and the bucket-width policy derived from it.

use serde::{Deserialize, Serialize};

/// Width of an aggregation bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hour,
    Day,
    Week,
}

impl Granularity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The slice of data a caller wants aggregated.
///
/// `trailing_range_months` switches to range mode, in which `year` and
/// `month` are ignored. A `year` of `None` means the latest year present in
/// the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub trailing_range_months: Option<u32>,
}

impl FilterState {
    /// A full calendar year.
    #[must_use]
    pub const fn year(year: i32) -> Self {
        Self {
            year: Some(year),
            month: None,
            trailing_range_months: None,
        }
    }

    /// One month of one year.
    #[must_use]
    pub const fn month(year: i32, month: u32) -> Self {
        Self {
            year: Some(year),
            month: Some(month),
            trailing_range_months: None,
        }
    }

    /// The trailing `months` ending at the latest record.
    #[must_use]
    pub const fn trailing(months: u32) -> Self {
        Self {
            year: None,
            month: None,
            trailing_range_months: Some(months),
        }
    }

    #[must_use]
    pub const fn is_range(&self) -> bool {
        self.trailing_range_months.is_some()
    }
}

/// Pick the bucket width for the primary series.
///
/// Range views and single months roll up by day; a whole year rolls up by
/// week. [`Granularity::Hour`] is never the primary width: the hourly profile
/// is always computed alongside.
#[must_use]
pub const fn select_granularity(filter: &FilterState) -> Granularity {
    if filter.trailing_range_months.is_some() || filter.month.is_some() {
        Granularity::Day
    } else {
        Granularity::Week
    }
}
