//! `tally query`: rollups for a year, a month, or a trailing range.

use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use clap::Args;
use tally_core::aggregate::Window;
use tally_core::{AggregateResult, FilterState};

use super::open_project;
use crate::output::{OutputMode, fail, pretty_kv, pretty_rule, pretty_section, render_mode};

/// Widest bar drawn in the pretty hourly profile.
const BAR_WIDTH: u64 = 40;

/// Arguments for `tally query`.
#[derive(Args, Debug, Default)]
pub struct QueryArgs {
    /// Calendar year. Defaults to the latest year with records.
    #[arg(long)]
    pub year: Option<i32>,

    /// Month of the year (1-12). Switches the series to daily buckets.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month: Option<u32>,

    /// Trailing number of months ending at the latest record.
    #[arg(
        long,
        value_name = "MONTHS",
        conflicts_with_all = ["year", "month"],
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub range: Option<u32>,
}

impl QueryArgs {
    pub const fn filter(&self) -> FilterState {
        FilterState {
            year: self.year,
            month: self.month,
            trailing_range_months: self.range,
        }
    }
}

/// Execute `tally query`.
///
/// # Errors
///
/// Returns an error if the project is not initialized, the store is missing
/// or unreadable, or a consolidation holds the lock past the timeout.
pub fn run_query(args: &QueryArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let tally = open_project(output, project_root)?;
    let result = tally
        .query(&args.filter())
        .map_err(|err| fail(output, err))?;
    render_mode(output, &result, render_text, render_pretty)
}

fn describe_window(window: Option<&Window>) -> String {
    match window {
        None => "no records".to_string(),
        Some(Window::Range { since, months }) => {
            format!("last {months} month(s), since {}", since.format("%Y-%m-%d %H:%M:%S"))
        }
        Some(Window::Discrete { year, month: None }) => year.to_string(),
        Some(Window::Discrete {
            year,
            month: Some(month),
        }) => format!("{year}-{month:02}"),
    }
}

fn render_text(result: &AggregateResult, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}\t{}", result.granularity, describe_window(result.window.as_ref()))?;
    for bucket in &result.buckets {
        writeln!(w, "{}\t{}\t{}", bucket.key, bucket.count, bucket.total_value)?;
    }
    for (hour, count) in result.hourly_profile.iter().enumerate() {
        writeln!(w, "h{hour:02}\t{count}")?;
    }
    Ok(())
}

fn render_pretty(result: &AggregateResult, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Practice by {}", result.granularity))?;
    pretty_kv(w, "window", describe_window(result.window.as_ref()))?;
    pretty_kv(w, "records", result.total_count().to_string())?;
    pretty_kv(w, "total", format!("{:.2}", result.total_value()))?;

    if result.buckets.is_empty() {
        writeln!(w)?;
        writeln!(w, "No records match this filter.")?;
        return Ok(());
    }

    writeln!(w)?;
    writeln!(w, "{:<12} {:>8} {:>12}", "PERIOD", "COUNT", "VALUE")?;
    for bucket in &result.buckets {
        writeln!(
            w,
            "{:<12} {:>8} {:>12.2}",
            bucket.key.to_string(),
            bucket.count,
            bucket.total_value
        )?;
    }

    writeln!(w)?;
    pretty_section(w, "Hour of day")?;
    let peak = result.hourly_profile.iter().copied().max().unwrap_or(0).max(1);
    for (hour, &count) in result.hourly_profile.iter().enumerate() {
        let width = usize::try_from(count * BAR_WIDTH / peak).unwrap_or(0);
        writeln!(w, "{hour:02}:00 {count:>6} {}", "#".repeat(width))?;
    }
    pretty_rule(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::aggregate;
    use tally_core::record::{ParsedRow, parse_row};

    fn result(filter: &FilterState) -> AggregateResult {
        let records = [
            "2024-01-01 03:00:00,0,360,12",
            "2024-01-01 06:10:00,1,340,13",
        ]
        .iter()
        .map(|line| match parse_row(line) {
            Ok(ParsedRow::Record(record)) => record,
            other => panic!("unexpected {other:?}"),
        })
        .collect::<Vec<_>>();
        aggregate(records, filter)
    }

    #[test]
    fn args_map_to_filter() {
        let args = QueryArgs {
            year: Some(2024),
            month: Some(3),
            range: None,
        };
        assert_eq!(args.filter(), FilterState::month(2024, 3));
        let args = QueryArgs {
            range: Some(6),
            ..QueryArgs::default()
        };
        assert_eq!(args.filter(), FilterState::trailing(6));
    }

    #[test]
    fn text_has_buckets_and_all_hours() {
        let mut buf = Vec::new();
        render_text(&result(&FilterState::month(2024, 1)), &mut buf).unwrap();
        let s = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines[0], "day\t2024-01");
        assert_eq!(lines[1], "2024-01-01\t2\t25");
        assert_eq!(lines.len(), 2 + 24);
        assert_eq!(lines[2 + 3], "h03\t1");
    }

    #[test]
    fn pretty_reports_empty_filter() {
        let mut buf = Vec::new();
        render_pretty(&result(&FilterState::year(1999)), &mut buf).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("Practice by week"));
        assert!(s.contains("No records match this filter."));
    }

    #[test]
    fn pretty_draws_hour_bars() {
        let mut buf = Vec::new();
        render_pretty(&result(&FilterState::month(2024, 1)), &mut buf).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("2024-01-01"));
        assert!(s.contains(&format!("03:00      1 {}", "#".repeat(40))));
    }

    #[test]
    fn window_descriptions() {
        assert_eq!(describe_window(None), "no records");
        assert_eq!(
            describe_window(Some(&Window::Discrete {
                year: 2024,
                month: Some(2)
            })),
            "2024-02"
        );
    }
}
