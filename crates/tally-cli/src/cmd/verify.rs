use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use clap::Args;
use tally_core::error::ErrorCode;
use tally_core::store::{ManifestStatus, VerifyReport};

use super::open_project;
use crate::output::{CliError, OutputMode, fail, render_error, render_mode};

/// Arguments for `tally verify`.
#[derive(Args, Debug, Default)]
pub struct VerifyArgs {}

/// Check the record store against its manifest and for malformed, duplicate,
/// or torn rows.
///
/// # Errors
///
/// Returns an error when any check fails, or when the store cannot be read.
pub fn run_verify(_args: &VerifyArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let tally = open_project(output, project_root)?;
    let report = tally.verify().map_err(|err| fail(output, err))?;
    render_mode(output, &report, render_lines, render_lines)?;

    if report.is_ok() {
        return Ok(());
    }

    let code = ErrorCode::ManifestMismatch;
    render_error(
        output,
        &CliError::with_details(
            format!("{} failed verification", tally.store_path().display()),
            code.hint().unwrap_or_default(),
            code.code(),
        ),
    )?;
    anyhow::bail!("verify: failed");
}

fn render_lines(report: &VerifyReport, w: &mut dyn Write) -> io::Result<()> {
    match &report.manifest {
        ManifestStatus::Match => writeln!(w, "OK   manifest")?,
        ManifestStatus::Missing => writeln!(w, "FAIL manifest (missing)")?,
        ManifestStatus::Mismatch { expected, actual } => {
            writeln!(w, "FAIL manifest (mismatch)")?;
            for line in expected.lines() {
                writeln!(w, "     expected {line}")?;
            }
            for line in actual.lines() {
                writeln!(w, "     actual   {line}")?;
            }
        }
    }

    if report.malformed_rows.is_empty() {
        writeln!(w, "OK   rows parse")?;
    } else {
        for row in &report.malformed_rows {
            writeln!(w, "FAIL {row}")?;
        }
    }

    if report.duplicate_rows.is_empty() {
        writeln!(w, "OK   no duplicate records")?;
    } else {
        for line in &report.duplicate_rows {
            writeln!(w, "FAIL line {line}: duplicate record")?;
        }
    }

    if report.torn_tail {
        writeln!(w, "FAIL torn trailing line")?;
    } else {
        writeln!(w, "OK   complete trailing line")?;
    }

    writeln!(
        w,
        "verify: {} ({} records, {} bytes)",
        if report.is_ok() { "success" } else { "failed" },
        report.record_count,
        report.byte_len
    )
}
