//! `mend validate`, `mend run`, `mend preview`, `mend drive`.

use std::path::{Path, PathBuf};

use clap::Args;

use mendkit_recon::config::JobConfig;
use mendkit_recon::driver::run_to_completion;
use mendkit_recon::{BatchOffset, BatchReport, BatchSummary, Job, ReconError, Reconciler, RunMode};
use mendkit_store::{SqliteAuditLog, SqliteStore};

use crate::exit_codes::{EXIT_ALREADY_COMPLETED, EXIT_CANDIDATE_ERRORS};
use crate::CliError;

#[derive(Args)]
pub struct RunArgs {
    /// Path to the .job.toml file
    pub job: PathBuf,

    /// SQLite database holding the dataset
    #[arg(long, env = "MEND_DB")]
    pub db: PathBuf,

    /// Start after this record id (default: from the first record)
    #[arg(long)]
    pub after: Option<u64>,

    /// Override the job's batch_size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Output the batch report as JSON to stdout instead of a human summary
    #[arg(long)]
    pub json: bool,

    /// Write the JSON batch report to a file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct DriveArgs {
    /// Path to the .job.toml file
    pub job: PathBuf,

    /// SQLite database holding the dataset and the migration state
    #[arg(long, env = "MEND_DB")]
    pub db: PathBuf,

    /// Override the job's batch_size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Stop after this many batches; progress is kept for the next call
    #[arg(long)]
    pub max_batches: Option<usize>,

    /// Forget stored progress and start from the first record
    #[arg(long)]
    pub reset: bool,

    /// Exit 6 instead of 0 when the migration already completed
    #[arg(long)]
    pub fail_if_completed: bool,

    /// Output the drive summary as JSON to stdout
    #[arg(long)]
    pub json: bool,
}

struct LoadedJob {
    job: Job,
    batch_size: usize,
}

fn load_job(path: &Path) -> Result<LoadedJob, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::usage(format!("cannot read {}: {e}", path.display())))?;
    let config = JobConfig::from_toml(&text)?;
    Ok(LoadedJob {
        batch_size: config.batch_size,
        job: Job::from_config(&config)?,
    })
}

fn batch_size(arg: Option<usize>, default: usize) -> Result<usize, CliError> {
    match arg {
        Some(0) => Err(CliError::usage("--batch-size must be at least 1")),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}

fn open_store(db: &Path) -> Result<(SqliteStore, SqliteAuditLog), CliError> {
    tracing::debug!(db = %db.display(), "opening store");
    let hint = || format!("check that {} is a writable SQLite file", db.display());
    let store = SqliteStore::open(db).map_err(|e| CliError::store(e).with_hint(hint()))?;
    let audit = SqliteAuditLog::open(db).map_err(|e| CliError::store(e).with_hint(hint()))?;
    Ok((store, audit))
}

// ============================================================================
// validate
// ============================================================================

pub fn cmd_validate(path: PathBuf) -> Result<(), CliError> {
    let LoadedJob { job, batch_size } = load_job(&path)?;

    eprintln!(
        "ok: job '{}' sets '{}' on dataset '{}' (batch size {})",
        job.name, job.target, job.dataset, batch_size
    );
    eprintln!("strategies: {}", job.chain.names().join(" -> "));
    if let Some(merge) = &job.merge {
        eprintln!("merge: key [{}], sum [{}]", merge.key.join(", "), merge.sum.join(", "));
    }
    Ok(())
}

// ============================================================================
// run / preview
// ============================================================================

pub fn cmd_run(args: RunArgs, mode: RunMode) -> Result<(), CliError> {
    let LoadedJob { job, batch_size: default_batch } = load_job(&args.job)?;
    let batch_size = batch_size(args.batch_size, default_batch)?;
    let (store, audit) = open_store(&args.db)?;

    let mut rec = Reconciler::new(store, job, audit)?;
    let offset = args.after.map_or(BatchOffset::start(), BatchOffset::after);
    let report = match mode {
        RunMode::Execute => rec.run_batch(offset, batch_size)?,
        RunMode::Preview => rec.preview_batch(offset, batch_size)?,
    };

    let json_str = serde_json::to_string_pretty(&report)
        .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
    if let Some(ref path) = args.output {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::io(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }
    if args.json {
        println!("{json_str}");
    }

    print_summary(&format!("{mode} {}", report.meta.job), &report.summary);
    print_samples(&report);
    audit_failures(rec.audit());

    if !report.done {
        if let Some(after) = report.next_offset.after {
            let command = if mode.writes() { "run" } else { "preview" };
            eprintln!(
                "next:  mend {command} {} --db {} --after {after}",
                args.job.display(),
                args.db.display()
            );
        }
    }

    candidate_errors(&report.summary)
}

fn print_samples(report: &BatchReport) {
    for sample in &report.samples {
        match &sample.reason {
            Some(reason) => eprintln!("  {} {}: {}", sample.category, sample.id, reason),
            None => eprintln!("  {} {}", sample.category, sample.id),
        }
    }
}

// ============================================================================
// drive
// ============================================================================

pub fn cmd_drive(args: DriveArgs) -> Result<(), CliError> {
    let LoadedJob { job, batch_size: default_batch } = load_job(&args.job)?;
    let batch_size = batch_size(args.batch_size, default_batch)?;
    let (store, audit) = open_store(&args.db)?;

    // Progress is saved on a second connection while the reconciler owns the first.
    let state_db = SqliteStore::open(&args.db).map_err(CliError::store)?;
    let name = job.name.clone();

    if args.reset && state_db.reset_state(&name).map_err(CliError::store)? {
        eprintln!("reset: stored progress for '{name}' cleared");
    }

    let state = state_db.load_state(&name).map_err(CliError::store)?;
    if state.is_completed() {
        if args.fail_if_completed {
            return Err(CliError::new(
                EXIT_ALREADY_COMPLETED,
                format!("migration '{name}' already completed"),
            )
            .with_hint("pass --reset to run it again"));
        }
        eprintln!("migration '{name}' already completed; nothing to do");
        if args.json {
            println!("{}", drive_json(&name, &state, 0, false, &BatchSummary::default()));
        }
        return Ok(());
    }

    let mut rec = Reconciler::new(store, job, audit)?;
    let summary = run_to_completion(&mut rec, state, batch_size, args.max_batches, |report, next| {
        eprintln!(
            "batch {} -> {}: {} candidates, {} repaired, {} merged, {} errors",
            report.offset,
            report.next_offset,
            report.summary.total,
            report.summary.repaired_total(),
            report.summary.merged,
            report.summary.errors,
        );
        state_db
            .save_state(&name, next)
            .map_err(|e| ReconError::Interrupted(format!("cannot save progress: {e}")))
    })?;

    if args.json {
        println!(
            "{}",
            drive_json(&name, &summary.state, summary.batches, summary.cancelled, &summary.totals)
        );
    }

    print_summary(&format!("drive {name} ({} batches)", summary.batches), &summary.totals);
    audit_failures(rec.audit());
    if summary.state.is_completed() {
        eprintln!("migration '{name}' completed");
    } else if let Some(offset) = summary.state.next_offset() {
        eprintln!("stopped {offset}; run `mend drive` again to continue");
    }

    candidate_errors(&summary.totals)
}

fn drive_json(
    job: &str,
    state: &mendkit_recon::MigrationState,
    batches: usize,
    cancelled: bool,
    totals: &BatchSummary,
) -> serde_json::Value {
    serde_json::json!({
        "job": job,
        "state": state,
        "batches": batches,
        "cancelled": cancelled,
        "summary": totals,
    })
}

// ============================================================================
// shared output
// ============================================================================

fn print_summary(label: &str, s: &BatchSummary) {
    eprintln!(
        "{label}: {} candidates: {} already correct, {} repaired, {} merged, {} unmatched, {} errors",
        s.total,
        s.already_correct,
        s.repaired_total(),
        s.merged,
        s.unmatched,
        s.errors,
    );
    for (category, count) in &s.repaired {
        eprintln!("  {category}: {count}");
    }
}

fn audit_failures(audit: &SqliteAuditLog) {
    let lost = audit.failures();
    if lost > 0 {
        eprintln!("warning: {lost} audit event(s) could not be written to the audit log");
    }
}

fn candidate_errors(s: &BatchSummary) -> Result<(), CliError> {
    if s.errors > 0 {
        return Err(CliError::new(
            EXIT_CANDIDATE_ERRORS,
            format!("{} candidate(s) failed", s.errors),
        )
        .with_hint("see the samples in the report; re-running retries them"));
    }
    Ok(())
}
