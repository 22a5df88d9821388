//! CSV run logs: one per-seed file per run, one cumulative summary file.
//!
//! Every run writes `logs/run-<stamp>.csv` with a header and one row per
//! seed, then appends a single summary row to `logs/runs.csv`. The per-seed
//! file is the operator's worklist: each row says how far that seed's
//! package got and, if it was quarantined, why. Downstream reporting jobs
//! consume these files; nothing in this tool reads them back.
//!
//! Appends are serialized under a mutex and flushed row by row, so a
//! crashed run still leaves every finished seed on disk.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::catalog::Seed;
use crate::package::{ReasonCode, SeedOutcome, StageStatus};

/// Column order of the per-seed run file.
const SEED_HEADER: [&str; 15] = [
    "identifier",
    "seed_id",
    "collection",
    "crawl_jobs",
    "warc_count",
    "warc_filenames",
    "total_bytes",
    "metadata_fetch",
    "redaction",
    "warc_fetch",
    "fixity",
    "normalize",
    "completed",
    "failure_reason",
    "failure_detail",
];

/// Column order of the cumulative `runs.csv`.
const SUMMARY_HEADER: [&str; 11] = [
    "run_id",
    "started_at",
    "finished_at",
    "window_start",
    "window_end",
    "seeds_total",
    "completed",
    "quarantined",
    "escalated",
    "total_bytes",
    "watermark_advanced",
];

/// Separator for multi-value cells (crawl ids, filenames).
const LIST_SEPARATOR: &str = ";";

/// Error from run-log operations.
#[derive(Debug, Error)]
pub enum RunLogError {
    /// Filesystem failure.
    #[error("run log I/O failure at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV serialization failure.
    #[error("run log write failed: {source}")]
    Csv {
        #[from]
        source: csv::Error,
    },
}

impl RunLogError {
    /// Creates an `Io` error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Aggregate figures for one finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub seeds_total: usize,
    pub completed: usize,
    pub quarantined: usize,
    /// Failures that also needed operator attention (quarantine collisions
    /// and failed quarantine moves).
    pub escalated: usize,
    pub total_bytes: u64,
    pub watermark_advanced: bool,
}

/// Writer for one run's logs.
#[derive(Debug)]
pub struct RunLog {
    run_path: PathBuf,
    runs_path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl RunLog {
    /// Creates `logs/run-<run_id>.csv` and writes its header.
    ///
    /// Refuses to overwrite an existing file: run ids are second-granular
    /// and runs are serialized by the run lock, so a collision means
    /// something is wrong.
    ///
    /// # Errors
    ///
    /// Returns [`RunLogError`] if the directory or file cannot be created.
    pub fn create(logs_dir: &Path, run_id: &str) -> Result<Self, RunLogError> {
        fs::create_dir_all(logs_dir).map_err(|e| RunLogError::io(logs_dir, e))?;

        let run_path = logs_dir.join(format!("run-{run_id}.csv"));
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&run_path)
            .map_err(|e| RunLogError::io(&run_path, e))?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(SEED_HEADER)?;
        writer.flush().map_err(|e| RunLogError::io(&run_path, e))?;

        Ok(Self {
            run_path,
            runs_path: logs_dir.join("runs.csv"),
            writer: Mutex::new(writer),
        })
    }

    /// Returns the per-seed file's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.run_path
    }

    /// Appends one seed row. Safe to call from several workers; appends are
    /// serialized and each row is flushed before the call returns.
    ///
    /// # Errors
    ///
    /// Returns [`RunLogError`] if the row cannot be written.
    pub fn append_seed(&self, outcome: &SeedOutcome) -> Result<(), RunLogError> {
        let row = seed_row(outcome);
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_record(&row)?;
        writer.flush().map_err(|e| RunLogError::io(&self.run_path, e))
    }

    /// Appends a row for a seed that failed before any package directory
    /// existed, such as one whose identifier could not be assigned. The
    /// identifier cell stays empty and every stage reads `skipped`.
    ///
    /// # Errors
    ///
    /// Returns [`RunLogError`] if the row cannot be written.
    pub fn append_unbuilt(
        &self,
        seed: &Seed,
        warc_count: usize,
        reason: ReasonCode,
        detail: &str,
    ) -> Result<(), RunLogError> {
        let row = unbuilt_row(seed, warc_count, reason, detail);
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_record(&row)?;
        writer.flush().map_err(|e| RunLogError::io(&self.run_path, e))
    }

    /// Appends the run's summary row to the cumulative `runs.csv`,
    /// writing the header first if the file is new.
    ///
    /// # Errors
    ///
    /// Returns [`RunLogError`] if the row cannot be written.
    pub fn append_summary(&self, summary: &RunSummary) -> Result<(), RunLogError> {
        let is_new = !self.runs_path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.runs_path)
            .map_err(|e| RunLogError::io(&self.runs_path, e))?;

        let mut writer = csv::Writer::from_writer(file);
        if is_new {
            writer.write_record(SUMMARY_HEADER)?;
        }
        writer.write_record(summary_row(summary))?;
        writer
            .flush()
            .map_err(|e| RunLogError::io(&self.runs_path, e))
    }
}

/// Formats a run id from the wall clock, e.g. `20260823T140502Z`.
#[must_use]
pub fn run_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn seed_row(outcome: &SeedOutcome) -> Vec<String> {
    let crawl_jobs = outcome
        .crawl_jobs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR);
    let (failure_reason, failure_detail) = match &outcome.failure {
        Some(note) => (note.reason.as_str().to_string(), note.detail.clone()),
        None => (String::new(), String::new()),
    };

    vec![
        outcome.identifier.to_string(),
        outcome.seed_id.to_string(),
        outcome.collection.to_string(),
        crawl_jobs,
        outcome.warc_filenames.len().to_string(),
        outcome.warc_filenames.join(LIST_SEPARATOR),
        outcome.total_bytes.to_string(),
        outcome.stages.metadata_fetch.as_str().to_string(),
        outcome.stages.redaction.as_str().to_string(),
        outcome.stages.warc_fetch.as_str().to_string(),
        outcome.stages.fixity.as_str().to_string(),
        outcome.stages.normalize.as_str().to_string(),
        outcome.is_complete().to_string(),
        failure_reason,
        failure_detail,
    ]
}

fn unbuilt_row(seed: &Seed, warc_count: usize, reason: ReasonCode, detail: &str) -> Vec<String> {
    let skipped = StageStatus::Skipped.as_str().to_string();
    vec![
        String::new(),
        seed.id.to_string(),
        seed.collection.to_string(),
        String::new(),
        warc_count.to_string(),
        String::new(),
        "0".to_string(),
        skipped.clone(),
        skipped.clone(),
        skipped.clone(),
        skipped.clone(),
        skipped,
        "false".to_string(),
        reason.as_str().to_string(),
        detail.to_string(),
    ]
}

fn summary_row(summary: &RunSummary) -> Vec<String> {
    let stamp = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
    vec![
        summary.run_id.clone(),
        stamp(summary.started_at),
        stamp(summary.finished_at),
        stamp(summary.window_start),
        stamp(summary.window_end),
        summary.seeds_total.to_string(),
        summary.completed.to_string(),
        summary.quarantined.to_string(),
        summary.escalated.to_string(),
        summary.total_bytes.to_string(),
        summary.watermark_advanced.to_string(),
    ]
}
