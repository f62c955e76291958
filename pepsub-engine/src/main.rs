//! pepsub - offline utilities for batch prediction jobs
//!
//! Works on the files around a submission job: merging partial result tables,
//! checking a result table against its input FASTA, cutting job windows, and
//! joining predictions onto a processed dataset.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pepsub_common::config::{load_config, TomlConfig};
use pepsub_engine::io::{
    coverage, join_predictions, merge_result_tables, read_dataset, read_fasta, read_results,
    write_fasta_file, write_joined_file, write_results_file,
};
use pepsub_engine::job_window::JobWindow;
use pepsub_engine::Record;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for pepsub
#[derive(Parser, Debug)]
#[command(name = "pepsub")]
#[command(about = "Batch submission utilities for sequence prediction backends")]
#[command(version)]
struct Args {
    /// Configuration file (overrides PEPSUB_CONFIG and the default location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge every result table in a directory into one
    Merge {
        /// Directory of `.csv` result tables
        #[arg(long)]
        dir: PathBuf,

        /// Merged result table to write
        #[arg(long)]
        out: PathBuf,
    },

    /// Check a result table against its input records
    Validate {
        /// Input FASTA
        #[arg(long)]
        input: PathBuf,

        /// Result table to check
        #[arg(long)]
        results: PathBuf,

        /// Write records needing resubmission to this FASTA file
        #[arg(long)]
        missing: Option<PathBuf>,

        /// Print the coverage report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cut a job window out of a FASTA file
    Window {
        /// Input FASTA
        #[arg(long)]
        input: PathBuf,

        /// First record id of the window
        #[arg(long)]
        start_id: Option<String>,

        /// Maximum number of records in the window
        #[arg(long)]
        job_size: Option<usize>,

        /// Output FASTA for the window
        #[arg(long)]
        out: PathBuf,
    },

    /// Join a result table onto a processed `PepID,AMPLabel,PepSeq,PepType` dataset
    Join {
        /// Processed dataset CSV
        #[arg(long)]
        dataset: PathBuf,

        /// Result table with a prediction for every dataset id
        #[arg(long)]
        results: PathBuf,

        /// Joined CSV to write
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config);

    match args.command {
        Command::Merge { dir, out } => merge(&dir, &out),
        Command::Validate {
            input,
            results,
            missing,
            json,
        } => validate(&input, &results, missing.as_deref(), json),
        Command::Window {
            input,
            start_id,
            job_size,
            out,
        } => window(&input, JobWindow::new(start_id, job_size), &out),
        Command::Join {
            dataset,
            results,
            out,
        } => join(&dataset, &results, &out),
    }
}

fn init_tracing(config: &TomlConfig) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn merge(dir: &Path, out: &Path) -> Result<()> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    if files.is_empty() {
        bail!("No .csv result tables in {}", dir.display());
    }
    files.sort();

    let mut tables = Vec::with_capacity(files.len());
    for path in &files {
        let table = read_results(path)
            .with_context(|| format!("Failed to read result table {}", path.display()))?;
        info!(file = %path.display(), rows = table.len(), "Loaded result table");
        tables.push(table);
    }

    let merged = merge_result_tables(tables);
    write_results_file(out, &merged)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    let unresolved = merged.iter().filter(|o| !o.is_resolved()).count();
    info!(
        files = files.len(),
        rows = merged.len(),
        unresolved,
        out = %out.display(),
        "Merge complete"
    );
    println!("MERGED {} RECORDS ({} unresolved)", merged.len(), unresolved);
    Ok(())
}

fn validate(input: &Path, results: &Path, missing: Option<&Path>, json: bool) -> Result<()> {
    let records = read_fasta(input)
        .with_context(|| format!("Failed to read FASTA {}", input.display()))?;
    let outcomes = read_results(results)
        .with_context(|| format!("Failed to read result table {}", results.display()))?;

    let report = coverage(&records, &outcomes);
    if !report.unexpected.is_empty() {
        warn!(count = report.unexpected.len(), "Result table has ids not in the input");
    }
    if !report.duplicates.is_empty() {
        warn!(count = report.duplicates.len(), "Result table has duplicate ids");
    }

    if let Some(path) = missing {
        let pending: Vec<Record> = report.resubmit(&records).into_iter().cloned().collect();
        if !pending.is_empty() {
            write_fasta_file(path, &pending)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(records = pending.len(), out = %path.display(), "Wrote resubmission FASTA");
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "MISSING: {} / {} RECORDS",
            report.missing.len(),
            report.total
        );
        println!(
            "UNRESOLVED: {} / {} RECORDS",
            report.unresolved.len(),
            report.total
        );
    }
    Ok(())
}

fn window(input: &Path, window: JobWindow, out: &Path) -> Result<()> {
    let records = read_fasta(input)
        .with_context(|| format!("Failed to read FASTA {}", input.display()))?;
    let slice = window.select(&records)?;

    write_fasta_file(out, slice.records)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!(
        start = slice.start,
        end = slice.end,
        out = %out.display(),
        "Wrote job window"
    );
    println!("{} {}", slice.start, slice.end);
    Ok(())
}

fn join(dataset: &Path, results: &Path, out: &Path) -> Result<()> {
    let entries = read_dataset(dataset)
        .with_context(|| format!("Failed to read dataset {}", dataset.display()))?;
    let predictions = read_results(results)
        .with_context(|| format!("Failed to read result table {}", results.display()))?;

    let joined = join_predictions(&entries, &predictions).context("INVALID FILE")?;
    write_joined_file(out, &joined)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    let unresolved = joined.iter().filter(|r| !r.prediction.is_resolved()).count();
    info!(rows = joined.len(), unresolved, out = %out.display(), "Join complete");
    println!("JOINED {} RECORDS ({} unresolved)", joined.len(), unresolved);
    Ok(())
}
