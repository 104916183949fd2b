#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{OutputMode, resolve_output_mode};
use std::env;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tally: append-only practice log with daily, weekly, and hourly rollups",
    long_about = None
)]
struct Cli {
    /// Enable debug logging for tally.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format. Defaults to pretty on a terminal and text when piped.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Emit JSON output (alias for `--format json`).
    #[arg(long, global = true, hide = true)]
    json: bool,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a tally project",
        long_about = "Create .tally/ with an empty record store, a pending directory, and a default config.",
        after_help = "EXAMPLES:\n    # Initialize a project in the current directory\n    tally init\n\n    # Rewrite the config without touching stored records\n    tally init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Ingest",
        about = "Merge pending exports into the store",
        long_about = "Validate every pending raw export, append each valid source as one batch, and remove it from the pending directory. Invalid or overlapping sources are reported and left in place.",
        after_help = "EXAMPLES:\n    # Merge everything in .tally/pending\n    tally consolidate\n\n    # Emit machine-readable output\n    tally consolidate --format json"
    )]
    Consolidate(cmd::consolidate::ConsolidateArgs),

    #[command(
        next_help_heading = "Read",
        about = "Roll up records by week, day, and hour",
        long_about = "Aggregate stored records. A whole year rolls up by week; a single month or a trailing range rolls up by day. An hour-of-day profile is always included.",
        after_help = "EXAMPLES:\n    # Weekly rollup of the latest year\n    tally query\n\n    # Daily rollup of March 2024\n    tally query --year 2024 --month 3\n\n    # Daily rollup of the last six months\n    tally query --range 6 --format json"
    )]
    Query(cmd::query::QueryArgs),

    #[command(
        next_help_heading = "Read",
        about = "List years and months with records",
        after_help = "EXAMPLES:\n    tally periods\n    tally periods --format text"
    )]
    Periods(cmd::periods::PeriodsArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Check store integrity",
        long_about = "Compare the record store against its manifest and report malformed, duplicate, or torn rows. Exits non-zero when any check fails.",
        after_help = "EXAMPLES:\n    tally verify"
    )]
    Verify(cmd::verify::VerifyArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    # Bash\n    tally completions bash > ~/.local/share/bash-completion/completions/tally"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "tally=debug,info"
        } else {
            "tally=info,warn"
        })
    });

    let format = env::var("TALLY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_root = env::current_dir()?;
    let output = cli.output_mode();
    debug!(root = %project_root.display(), ?output, "starting");

    match cli.command {
        Commands::Init(ref args) => cmd::init::run_init(args, output, cli.quiet, &project_root),
        Commands::Consolidate(ref args) => {
            cmd::consolidate::run_consolidate(args, output, &project_root)
        }
        Commands::Query(ref args) => cmd::query::run_query(args, output, &project_root),
        Commands::Periods(ref args) => cmd::periods::run_periods(args, output, &project_root),
        Commands::Verify(ref args) => cmd::verify::run_verify(args, output, &project_root),
        Commands::Completions(ref args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
    }
}
