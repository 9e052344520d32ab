// sfill - solar facility record linkage and attribute backfill

mod exit_codes;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use exit_codes::{EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "sfill")]
#[command(about = "Link external solar datasets to canonical facilities and backfill missing attributes")]
#[command(version)]
#[command(long_version = long_version())]
struct Cli {
    /// Only log warnings and errors
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match every configured dataset against the target snapshot and apply patches
    #[command(after_help = "\
Exit codes: 0 ok, 3 invalid config, 4 unreadable input, 5 patch failures,
6 LOW-tier or unmatched sources (--strict only).

Examples:
  sfill run backfill.toml --dry-run --json
  sfill run backfill.toml --output result.json
  sfill run backfill.toml --patches patches.jsonl
  sfill run backfill.toml --workers 8 --strict")]
    Run {
        /// Path to the linkage TOML config
        config: PathBuf,

        /// Compute matches and patches without applying them
        #[arg(long)]
        dry_run: bool,

        /// Print the JSON result to stdout
        #[arg(long)]
        json: bool,

        /// Write the JSON result to a file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write patches as JSON lines instead of sending them to apply.endpoint
        #[arg(long)]
        patches: Option<PathBuf>,

        /// Parallel patch writers (overrides apply.workers)
        #[arg(long)]
        workers: Option<usize>,

        /// Exit non-zero when any match is LOW tier or any source is unmatched
        #[arg(long)]
        strict: bool,
    },

    /// Validate a linkage config without loading data
    #[command(after_help = "\
Examples:
  sfill validate backfill.toml")]
    Validate {
        /// Path to the linkage TOML config
        config: PathBuf,
    },
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("SFILL_COMMIT"), ")",
        "\nengine:  solarfill-linkage ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("SFILL_TARGET"),
    )
}

fn init_tracing(quiet: bool) {
    let level = if quiet { "warn" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        for target in ["solarfill", "sfill"] {
            if let Ok(directive) = format!("{target}={level}").parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let result = match cli.command {
        Commands::Run {
            config,
            dry_run,
            json,
            output,
            patches,
            workers,
            strict,
        } => run::cmd_run(run::RunOptions {
            config,
            dry_run,
            json,
            output,
            patches,
            workers,
            strict,
        }),
        Commands::Validate { config } => run::cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}
