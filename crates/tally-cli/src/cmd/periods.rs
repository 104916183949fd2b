use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use clap::Args;
use tally_core::aggregate::YearPeriods;

use super::open_project;
use crate::output::{OutputMode, fail, pretty_section, render_mode};

/// Arguments for `tally periods`.
#[derive(Args, Debug, Default)]
pub struct PeriodsArgs {}

/// Execute `tally periods`: list the years and months that have records.
///
/// # Errors
///
/// Returns an error if the project is not initialized or the store cannot be
/// read.
pub fn run_periods(_args: &PeriodsArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let tally = open_project(output, project_root)?;
    let periods = tally.periods().map_err(|err| fail(output, err))?;
    render_mode(output, periods.as_slice(), render_text, render_pretty)
}

fn join_months(months: &[u32], sep: &str) -> String {
    months
        .iter()
        .map(|m| format!("{m:02}"))
        .collect::<Vec<_>>()
        .join(sep)
}

fn render_text(periods: &[YearPeriods], w: &mut dyn Write) -> io::Result<()> {
    for period in periods {
        writeln!(
            w,
            "{}\t{}\t{}",
            period.year,
            join_months(&period.months, ","),
            period.record_count
        )?;
    }
    Ok(())
}

fn render_pretty(periods: &[YearPeriods], w: &mut dyn Write) -> io::Result<()> {
    if periods.is_empty() {
        return writeln!(w, "No records yet. Run `tally consolidate` first.");
    }
    pretty_section(w, "Available periods")?;
    for period in periods {
        writeln!(
            w,
            "{}  {:>7} records  months: {}",
            period.year,
            period.record_count,
            join_months(&period.months, " ")
        )?;
    }
    Ok(())
}
