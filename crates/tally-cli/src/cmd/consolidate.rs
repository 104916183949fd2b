//! `tally consolidate`: fold pending raw exports into the store.

use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use clap::Args;
use tally_core::ConsolidationReport;

use super::open_project;
use crate::output::{OutputMode, fail, pretty_kv, pretty_section, render_mode};

/// Arguments for `tally consolidate`.
#[derive(Args, Debug, Default)]
pub struct ConsolidateArgs {}

/// Execute `tally consolidate`.
///
/// Rejected sources are reported, not treated as failures: they stay in the
/// pending directory and the command still exits successfully.
///
/// # Errors
///
/// Returns an error if the project is not initialized, the store is missing,
/// the lock cannot be acquired, or the store cannot be written.
pub fn run_consolidate(
    _args: &ConsolidateArgs,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let tally = open_project(output, project_root)?;
    let report = tally.consolidate().map_err(|err| fail(output, err))?;
    render_mode(output, &report, render_text, render_pretty)
}

fn render_text(report: &ConsolidationReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "merged={} appended={} skipped={} rejected={}",
        report.sources_merged,
        report.records_appended,
        report.sources_skipped,
        report.sources_rejected.len()
    )?;
    for rejection in &report.sources_rejected {
        writeln!(
            w,
            "rejected {} {} {}",
            rejection.source, rejection.error_code, rejection.reason
        )?;
    }
    Ok(())
}

fn render_pretty(report: &ConsolidationReport, w: &mut dyn Write) -> io::Result<()> {
    if report.is_noop() {
        return writeln!(w, "Nothing to consolidate.");
    }

    pretty_section(w, "Consolidation")?;
    pretty_kv(w, "merged", report.sources_merged.to_string())?;
    pretty_kv(w, "appended", report.records_appended.to_string())?;
    pretty_kv(w, "skipped", report.sources_skipped.to_string())?;
    pretty_kv(w, "rejected", report.sources_rejected.len().to_string())?;

    if !report.sources_rejected.is_empty() {
        writeln!(w)?;
        writeln!(w, "Left pending:")?;
        for rejection in &report.sources_rejected {
            writeln!(
                w,
                "  {} [{}] {}",
                rejection.source, rejection.error_code, rejection.reason
            )?;
        }
    }
    Ok(())
}
