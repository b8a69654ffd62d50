// mend - run idempotent batch reconciliation jobs against a SQLite store

mod exit_codes;
mod import;
mod reconcile;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

use exit_codes::{recon_exit_code, EXIT_ERROR, EXIT_STORE_UNAVAILABLE, EXIT_SUCCESS, EXIT_USAGE};
use reconcile::{DriveArgs, RunArgs};

#[derive(Parser)]
#[command(name = "mend")]
#[command(about = "Idempotent batch reconciliation: repair attributes, collapse duplicates, resume anywhere")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a job file without touching any data
    #[command(after_help = "\
Examples:
  mend validate ownership.job.toml")]
    Validate {
        /// Path to the .job.toml file
        job: PathBuf,
    },

    /// Reconcile one batch and write the changes
    #[command(after_help = "\
Examples:
  mend run ownership.job.toml --db site.db
  mend run ownership.job.toml --db site.db --after 500 --batch-size 50
  mend run ownership.job.toml --db site.db --json --output batch.json")]
    Run(RunArgs),

    /// Report what one batch would change, without writing
    #[command(after_help = "\
Examples:
  mend preview url-cleanup.job.toml --db site.db --json")]
    Preview(RunArgs),

    /// Run batches until the job completes, remembering progress in the store
    #[command(after_help = "\
Examples:
  mend drive ownership.job.toml --db site.db
  mend drive ownership.job.toml --db site.db --max-batches 10
  mend drive ownership.job.toml --db site.db --reset")]
    Drive(DriveArgs),

    /// Load a CSV file into a dataset (insert or replace by id)
    #[command(after_help = "\
Examples:
  mend import profiles.csv --db site.db --dataset artist_profiles
  mend import clicks.csv --db site.db --dataset click_stats --id-column row_id")]
    Import {
        /// CSV file with a header row
        csv: PathBuf,

        /// SQLite database (created if missing)
        #[arg(long, env = "MEND_DB")]
        db: PathBuf,

        /// Dataset to load the rows into
        #[arg(long)]
        dataset: String,

        /// Column holding the record id
        #[arg(long, default_value = "id")]
        id_column: String,

        /// Field delimiter
        #[arg(long, default_value = ",")]
        delimiter: char,
    },

    /// List datasets and migration progress
    #[command(after_help = "\
Examples:
  mend status --db site.db
  mend status --db site.db --json")]
    Status {
        /// SQLite database
        #[arg(long, env = "MEND_DB")]
        db: PathBuf,

        /// Output JSON to stdout instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  mendkit-recon ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

/// Logs go to stderr so `--json` output on stdout stays clean. Level comes
/// from `MEND_LOG` (e.g. `MEND_LOG=debug`, `MEND_LOG=mendkit_recon=trace`).
fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("MEND_LOG")
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Validate { job } => reconcile::cmd_validate(job),
        Commands::Run(args) => reconcile::cmd_run(args, mendkit_recon::RunMode::Execute),
        Commands::Preview(args) => reconcile::cmd_run(args, mendkit_recon::RunMode::Preview),
        Commands::Drive(args) => reconcile::cmd_drive(args),
        Commands::Import {
            csv,
            db,
            dataset,
            id_column,
            delimiter,
        } => import::cmd_import(csv, db, dataset, id_column, delimiter),
        Commands::Status { db, json } => import::cmd_status(db, json),
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

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    pub fn store(err: mendkit_store::SqliteStoreError) -> Self {
        Self::new(EXIT_STORE_UNAVAILABLE, err.to_string())
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<mendkit_recon::ReconError> for CliError {
    fn from(err: mendkit_recon::ReconError) -> Self {
        let hint = match &err {
            mendkit_recon::ReconError::MissingCapability { .. } => {
                Some("the SQLite store supports every capability; check the store wiring".to_string())
            }
            mendkit_recon::ReconError::InvariantViolation(_) => {
                Some("nothing was written for the offending record; inspect it before re-running".to_string())
            }
            _ => None,
        };
        Self { code: recon_exit_code(&err), message: err.to_string(), hint }
    }
}
