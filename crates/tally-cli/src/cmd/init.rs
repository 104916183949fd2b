use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tally_core::Tally;

use crate::output::{OutputMode, fail, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite the config and recreate missing directories when `.tally/`
    /// already exists. Stored records are kept.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct InitReport {
    store: PathBuf,
    pending_dir: PathBuf,
    config: PathBuf,
}

/// Execute `tally init`. Creates the project skeleton:
///
/// ```text
/// .tally/
///   records.csv        (header only)
///   records.manifest
///   pending/
///   config.toml        (defaults)
/// ```
///
/// # Errors
///
/// Returns an error if `.tally/` already exists and `--force` is not set,
/// or if any filesystem operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, quiet: bool, project_root: &Path) -> Result<()> {
    let tally = Tally::init(project_root, args.force).map_err(|err| fail(output, err))?;

    let report = InitReport {
        store: tally.store_path(),
        pending_dir: tally.pending_dir(),
        config: tally_core::config::config_path(tally.root()),
    };

    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "initialized {}", r.store.display()),
        |r, w| {
            pretty_section(w, "Initialized .tally/")?;
            pretty_kv(w, "store", r.store.display().to_string())?;
            pretty_kv(w, "pending", r.pending_dir.display().to_string())?;
            pretty_kv(w, "config", r.config.display().to_string())?;
            if !quiet {
                writeln!(w)?;
                writeln!(w, "Next steps:")?;
                writeln!(w, "  Drop raw exports into the pending directory, then run:")?;
                writeln!(w, "    tally consolidate")?;
                writeln!(w, "    tally query --month 1")?;
            }
            Ok(())
        },
    )
}
