//! Run orchestration: enumerate candidates, dispatch packages, summarize.
//!
//! One run is two phases with very different failure rules:
//!
//! 1. **Enumeration** - list the WARCs stored inside the run window and
//!    fetch each distinct seed's metadata, all under one hard timeout. Any
//!    failure here aborts the run before a single package directory is
//!    touched: with no candidate list there is nothing sensible to retry
//!    per seed, and the watermark must not move.
//! 2. **Packaging** - dispatch one [`PackageBuilder`] build per seed to a
//!    bounded worker pool. Per-seed failures are quarantined and counted;
//!    they never abort the run, so one bad crawl cannot hold back the rest
//!    of the batch.
//!
//! The watermark advances to the window's end bound only when enumeration
//! succeeded and the window itself came from the watermark. Runs with
//! explicit dates are replays and leave the schedule alone.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{
    CatalogClient, CatalogError, RetryPolicy, Seed, SeedFilter, TimeRange, WarcRecord,
};
use crate::config::Config;
use crate::ident::{IdentifierAssigner, PackageIdentifier, parse_relation};
use crate::package::{PackageBuilder, ReasonCode, SeedOutcome};
use crate::quarantine::Quarantine;
use crate::runlog::{RunLog, RunLogError, RunSummary, run_stamp};
use crate::watermark::{Watermark, WatermarkError};

/// Minimum allowed worker pool size.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed worker pool size. The counterpart is a shared
/// institutional API, not a CDN; more workers would only move the
/// bottleneck onto the catalog.
pub const MAX_CONCURRENCY: usize = 16;

/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default hard timeout for the enumeration phase.
pub const DEFAULT_ENUMERATION_TIMEOUT_SECS: u64 = 300;

/// Error that aborts a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Worker pool size outside the allowed range.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency { value: usize },

    /// Catalog client could not be configured.
    #[error("catalog client setup failed: {source}")]
    Client {
        #[source]
        source: CatalogError,
    },

    /// Candidate enumeration failed; no package was touched.
    #[error("catalog enumeration failed: {source}")]
    Enumeration {
        #[source]
        source: CatalogError,
    },

    /// Candidate enumeration exceeded its hard timeout.
    #[error("catalog enumeration timed out after {seconds}s")]
    EnumerationTimeout { seconds: u64 },

    /// Scheduled run with no stored watermark to start from.
    #[error(
        "no watermark at {}; the first run needs an explicit --start-date",
        .path.display()
    )]
    MissingWatermark { path: PathBuf },

    /// Watermark could not be read or advanced.
    #[error(transparent)]
    Watermark(#[from] WatermarkError),

    /// Run log could not be created or written.
    #[error(transparent)]
    RunLog(#[from] RunLogError),

    /// Output tree could not be prepared.
    #[error("output tree setup failed at {}: {source}", .path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Worker pool semaphore closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Fixed directory layout under the output root.
#[derive(Debug, Clone)]
pub struct OutputTree {
    root: PathBuf,
}

impl OutputTree {
    /// Creates the layout helper for an output root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the finished-packages directory.
    #[must_use]
    pub fn completed_dir(&self) -> PathBuf {
        self.root.join("completed")
    }

    /// Returns the quarantine root.
    #[must_use]
    pub fn errors_dir(&self) -> PathBuf {
        self.root.join("errors")
    }

    /// Returns the transient assembly directory.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Returns the run-log directory.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Returns the persistent-state directory.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// Returns the path of the cross-process run lock file.
    #[must_use]
    pub fn run_lock_path(&self) -> PathBuf {
        self.state_dir().join("run.lock")
    }

    /// Creates the permanent directories.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Setup`] if a directory cannot be created.
    pub fn ensure(&self) -> Result<(), RunError> {
        for dir in [
            self.completed_dir(),
            self.errors_dir(),
            self.staging_dir(),
            self.logs_dir(),
            self.state_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| RunError::Setup {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Aggregate counters for one run, updated from concurrent workers.
#[derive(Debug, Default)]
pub struct RunStats {
    completed: AtomicUsize,
    quarantined: AtomicUsize,
    escalated: AtomicUsize,
    total_bytes: AtomicU64,
}

impl RunStats {
    /// Returns the number of packages that reached `completed/`.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of quarantined packages.
    #[must_use]
    pub fn quarantined(&self) -> usize {
        self.quarantined.load(Ordering::SeqCst)
    }

    /// Returns the number of failures that also need operator attention.
    #[must_use]
    pub fn escalated(&self) -> usize {
        self.escalated.load(Ordering::SeqCst)
    }

    /// Returns the total payload bytes downloaded.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    /// Returns the number of seeds that reached a terminal state.
    #[must_use]
    pub fn seeds_total(&self) -> usize {
        self.completed() + self.quarantined()
    }

    fn record(&self, outcome: &SeedOutcome) {
        if outcome.is_complete() {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.quarantined.fetch_add(1, Ordering::SeqCst);
        }
        if outcome.failure.as_ref().is_some_and(|f| f.escalated) {
            self.escalated.fetch_add(1, Ordering::SeqCst);
        }
        self.total_bytes
            .fetch_add(outcome.total_bytes, Ordering::SeqCst);
    }

    fn record_unbuilt(&self, escalated: bool) {
        self.quarantined.fetch_add(1, Ordering::SeqCst);
        if escalated {
            self.escalated.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// One package a dry run would build.
#[derive(Debug, Clone)]
pub struct PlannedPackage {
    /// Assigned identifier, or `None` when the seed's relation is malformed.
    pub identifier: Option<PackageIdentifier>,
    pub seed_id: u64,
    pub title: String,
    pub warc_count: usize,
    /// Declared payload bytes, before download.
    pub declared_bytes: u64,
    /// What would quarantine this seed, when already knowable.
    pub problem: Option<String>,
}

/// What a finished run did, for the caller to report and exit on.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub window: TimeRange,
    pub seeds_total: usize,
    pub completed: usize,
    pub quarantined: usize,
    pub escalated: usize,
    pub total_bytes: u64,
    pub watermark_advanced: bool,
    /// Per-seed log file; `None` on dry runs.
    pub run_log_path: Option<PathBuf>,
    /// Planned work; filled on dry runs only.
    pub planned: Vec<PlannedPackage>,
}

/// One seed's share of the run: its metadata and its WARCs.
struct SeedGroup {
    seed: Seed,
    warcs: Vec<WarcRecord>,
}

/// Coordinates one packaging run end to end.
#[derive(Debug)]
pub struct BatchCoordinator {
    client: Arc<CatalogClient>,
    semaphore: Arc<Semaphore>,
    retry_policy: RetryPolicy,
    output: OutputTree,
    collections: Vec<u64>,
    enumeration_timeout: Duration,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    dry_run: bool,
}

impl BatchCoordinator {
    /// Creates a coordinator from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::InvalidConcurrency`] if the worker pool size is
    /// out of range.
    pub fn new(client: Arc<CatalogClient>, config: &Config) -> Result<Self, RunError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(RunError::InvalidConcurrency {
                value: config.concurrency,
            });
        }

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            retry_policy: RetryPolicy::with_max_attempts(config.max_retries),
            output: OutputTree::new(&config.output_dir),
            collections: config.collections.clone(),
            enumeration_timeout: Duration::from_secs(config.enumeration_timeout_secs),
            start_date: config.start_date,
            end_date: config.end_date,
            dry_run: config.dry_run,
        })
    }

    /// Runs one packaging pass.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] only for run-level aborts: bad window, failed or
    /// timed-out enumeration, unusable output tree, unwritable run log or
    /// watermark. Per-seed failures are quarantined and reported in the
    /// returned [`RunReport`], not here.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let started_at = Utc::now();
        let run_id = run_stamp(started_at);
        let watermark = Watermark::new(self.output.state_dir());

        let (window, from_watermark) = resolve_window(
            self.start_date,
            self.end_date,
            watermark.load()?,
            started_at,
            watermark.path(),
        )?;
        info!(run_id = %run_id, window = %window, from_watermark, "starting packaging run");

        let groups = self.enumerate(&window).await?;
        info!(seeds = groups.len(), "enumeration complete");

        let assigner = IdentifierAssigner::new(window.end.date_naive());

        if self.dry_run {
            return Ok(plan_only(&run_id, window, &groups, &assigner));
        }

        self.output.ensure()?;
        self.clean_stale_staging()?;

        let run_log = Arc::new(RunLog::create(&self.output.logs_dir(), &run_id)?);
        let quarantine = Arc::new(Quarantine::new(self.output.errors_dir()));
        let builder = Arc::new(PackageBuilder::new(
            Arc::clone(&self.client),
            Arc::clone(&quarantine),
            self.retry_policy.clone(),
            self.output.staging_dir(),
            self.output.completed_dir(),
        ));

        let stats = Arc::new(RunStats::default());
        let mut handles = Vec::new();

        for group in groups {
            // Scope comes from the seed's free-text relation; a malformed
            // relation is a schema failure recorded before any directory
            // exists, never a silently defaulted scope.
            let scope = match parse_relation(group.seed.relation.as_deref()) {
                Ok(scope) => scope,
                Err(e) => {
                    record_unassignable(&run_log, &quarantine, &stats, &group, &e.to_string());
                    continue;
                }
            };
            let identifier = assigner.assign(&group.seed.collector, scope);

            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| RunError::SemaphoreClosed)?;
            let builder = Arc::clone(&builder);
            let run_log = Arc::clone(&run_log);
            let stats = Arc::clone(&stats);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = builder.build(identifier, &group.seed, &group.warcs).await;
                stats.record(&outcome);
                if let Err(e) = run_log.append_seed(&outcome) {
                    warn!(seed_id = outcome.seed_id, error = %e, "could not log seed outcome");
                }
            }));
        }

        debug!(task_count = handles.len(), "waiting for packages");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "package task panicked");
            }
        }

        // Enumeration succeeded or we would not be here; quarantines do not
        // hold the schedule back.
        let watermark_advanced = from_watermark;
        if watermark_advanced {
            watermark.advance(window.end)?;
        }

        let finished_at = Utc::now();
        let summary = RunSummary {
            run_id: run_id.clone(),
            started_at,
            finished_at,
            window_start: window.start,
            window_end: window.end,
            seeds_total: stats.seeds_total(),
            completed: stats.completed(),
            quarantined: stats.quarantined(),
            escalated: stats.escalated(),
            total_bytes: stats.total_bytes(),
            watermark_advanced,
        };
        run_log.append_summary(&summary)?;

        info!(
            completed = summary.completed,
            quarantined = summary.quarantined,
            escalated = summary.escalated,
            total_bytes = summary.total_bytes,
            watermark_advanced,
            "run complete"
        );

        Ok(RunReport {
            run_id,
            window,
            seeds_total: summary.seeds_total,
            completed: summary.completed,
            quarantined: summary.quarantined,
            escalated: summary.escalated,
            total_bytes: summary.total_bytes,
            watermark_advanced,
            run_log_path: Some(run_log.path().to_path_buf()),
            planned: Vec::new(),
        })
    }

    /// Enumerates the run's candidates under the hard timeout.
    async fn enumerate(&self, window: &TimeRange) -> Result<Vec<SeedGroup>, RunError> {
        let listing = async {
            let records = self.client.list_warcs(window, &self.collections).await?;
            let grouped = group_records(records);

            // One batched listing primes the metadata memo; stragglers the
            // catalog left out of the batch are fetched individually.
            let seed_ids: Vec<u64> = grouped.keys().copied().collect();
            if !seed_ids.is_empty() {
                self.client
                    .list_seeds(&SeedFilter::for_ids(seed_ids))
                    .await?;
            }

            let mut groups = Vec::with_capacity(grouped.len());
            for (seed_id, warcs) in grouped {
                let seed = self.client.seed_metadata(seed_id).await?;
                groups.push(SeedGroup { seed, warcs });
            }
            Ok::<_, CatalogError>(groups)
        };

        match tokio::time::timeout(self.enumeration_timeout, listing).await {
            Ok(Ok(groups)) => Ok(groups),
            Ok(Err(source)) => Err(RunError::Enumeration { source }),
            Err(_) => Err(RunError::EnumerationTimeout {
                seconds: self.enumeration_timeout.as_secs(),
            }),
        }
    }

    /// Removes leftovers a crashed run abandoned in `staging/`.
    ///
    /// Runs are serialized by the run lock, so anything found here is dead.
    fn clean_stale_staging(&self) -> Result<(), RunError> {
        let staging = self.output.staging_dir();
        let entries = std::fs::read_dir(&staging).map_err(|e| RunError::Setup {
            path: staging.clone(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| RunError::Setup {
                path: staging.clone(),
                source: e,
            })?;
            warn!(entry = %entry.path().display(), "removing stale staging entry");
            let result = if entry.path().is_dir() {
                std::fs::remove_dir_all(entry.path())
            } else {
                std::fs::remove_file(entry.path())
            };
            result.map_err(|e| RunError::Setup {
                path: entry.path(),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Builds the dry-run report: everything assigned, nothing touched.
fn plan_only(
    run_id: &str,
    window: TimeRange,
    groups: &[SeedGroup],
    assigner: &IdentifierAssigner,
) -> RunReport {
    let planned: Vec<PlannedPackage> = groups
        .iter()
        .map(|group| {
            let declared_bytes = group.warcs.iter().map(|w| w.size).sum();
            match parse_relation(group.seed.relation.as_deref()) {
                Ok(scope) => PlannedPackage {
                    identifier: Some(assigner.assign(&group.seed.collector, scope)),
                    seed_id: group.seed.id,
                    title: group.seed.title.clone(),
                    warc_count: group.warcs.len(),
                    declared_bytes,
                    problem: None,
                },
                Err(e) => PlannedPackage {
                    identifier: None,
                    seed_id: group.seed.id,
                    title: group.seed.title.clone(),
                    warc_count: group.warcs.len(),
                    declared_bytes,
                    problem: Some(e.to_string()),
                },
            }
        })
        .collect();

    info!(planned = planned.len(), "dry run, nothing written");
    RunReport {
        run_id: run_id.to_string(),
        window,
        seeds_total: planned.len(),
        completed: 0,
        quarantined: 0,
        escalated: 0,
        total_bytes: 0,
        watermark_advanced: false,
        run_log_path: None,
        planned,
    }
}

/// Quarantines and logs a seed whose identifier could not be assigned.
fn record_unassignable(
    run_log: &RunLog,
    quarantine: &Quarantine,
    stats: &RunStats,
    group: &SeedGroup,
    detail: &str,
) {
    warn!(seed_id = group.seed.id, detail, "seed unassignable, recording schema failure");
    let label = format!("seed-{}", group.seed.id);
    let escalated = match quarantine.isolate_unbuilt(ReasonCode::Schema, &label, detail) {
        Ok(_) => false,
        Err(e) => {
            warn!(seed_id = group.seed.id, error = %e, "could not record schema failure");
            true
        }
    };
    stats.record_unbuilt(escalated);
    if let Err(e) =
        run_log.append_unbuilt(&group.seed, group.warcs.len(), ReasonCode::Schema, detail)
    {
        warn!(seed_id = group.seed.id, error = %e, "could not log schema failure");
    }
}

/// Groups WARC records by seed, ordered by seed id, each group ordered by
/// store time then filename.
///
/// The ordering makes identifier assignment deterministic for a given
/// candidate set, whatever order the catalog returned pages in.
fn group_records(records: Vec<WarcRecord>) -> BTreeMap<u64, Vec<WarcRecord>> {
    let mut grouped: BTreeMap<u64, Vec<WarcRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.seed).or_default().push(record);
    }
    for warcs in grouped.values_mut() {
        warcs.sort_by(|a, b| {
            a.store_time
                .cmp(&b.store_time)
                .then_with(|| a.filename.cmp(&b.filename))
        });
    }
    grouped
}

/// Resolves the run window and whether the watermark may advance after it.
///
/// Explicit dates are UTC midnights; an end date is exclusive. Any explicit
/// date makes the run a replay that leaves the watermark alone. A scheduled
/// run (no dates) requires a stored watermark; the very first run must be
/// given its start explicitly.
fn resolve_window(
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    stored: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    watermark_path: &Path,
) -> Result<(TimeRange, bool), RunError> {
    let start = match (start_date, stored) {
        (Some(date), _) => midnight_utc(date),
        (None, Some(watermark)) => watermark,
        (None, None) => {
            return Err(RunError::MissingWatermark {
                path: watermark_path.to_path_buf(),
            });
        }
    };
    let end = end_date.map_or(now, midnight_utc);

    let from_watermark = start_date.is_none() && end_date.is_none();
    Ok((TimeRange::new(start, end), from_watermark))
}

/// Midnight UTC at the start of a date.
fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
