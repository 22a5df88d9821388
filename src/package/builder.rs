//! Drives one package from assignment to a terminal state.
//!
//! The builder owns the whole lifecycle of a single package: fetch the
//! descriptive reports, scrub credentials, download the WARC payloads,
//! verify fixity, decompress, and move the finished package into
//! `completed/`. A failure at any stage diverts the package to quarantine
//! instead; [`PackageBuilder::build`] itself never returns an error, because
//! one seed's failure is an outcome to record, not a reason to stop the run.
//!
//! Two details are deliberate:
//!
//! - The seed report is held in memory until redaction has run, so raw
//!   credentials never touch the package directory, not even transiently.
//! - Transient catalog failures are retried here, per call, under the
//!   builder's [`RetryPolicy`]; the catalog client stays retry-free.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::error::StageError;
use super::layout::PackageLayout;
use super::normalize::normalize_objects;
use super::redact::redact_credentials;
use super::state::{PackageState, ReasonCode};
use crate::catalog::{
    CatalogClient, CatalogError, ReportKind, ReportPayload, RetryDecision, RetryPolicy, Seed,
    WarcRecord, classify_catalog_error, retry_after_delay,
};
use crate::fixity::{FixityOutcome, compare_digests, verify_file_md5};
use crate::ident::PackageIdentifier;
use crate::quarantine::Quarantine;

/// Per-stage result recorded in the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageStatus {
    /// Stage finished.
    Ok,
    /// Stage failed; the package was quarantined.
    Failed,
    /// Stage never ran because an earlier stage failed.
    #[default]
    Skipped,
}

impl StageStatus {
    /// Returns the run-log cell value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Status of each stage of one package build.
#[derive(Debug, Clone, Default)]
pub struct StageStatuses {
    pub metadata_fetch: StageStatus,
    pub redaction: StageStatus,
    pub warc_fetch: StageStatus,
    pub fixity: StageStatus,
    pub normalize: StageStatus,
}

/// Reason and detail for a quarantined package.
#[derive(Debug, Clone)]
pub struct FailureNote {
    pub reason: ReasonCode,
    pub detail: String,
    /// True when the quarantine move itself failed and an operator has to
    /// look at the package by hand.
    pub escalated: bool,
}

/// How one package build ended, with everything the run log needs.
#[derive(Debug, Clone)]
pub struct SeedOutcome {
    pub identifier: PackageIdentifier,
    pub seed_id: u64,
    pub collection: u64,
    /// Distinct crawl job ids behind this package's WARCs.
    pub crawl_jobs: Vec<u64>,
    pub warc_filenames: Vec<String>,
    /// Payload bytes actually downloaded.
    pub total_bytes: u64,
    pub stages: StageStatuses,
    pub final_state: PackageState,
    pub failure: Option<FailureNote>,
    /// Where the package ended up: under `completed/` or under `errors/`.
    /// `None` only when the quarantine move itself failed.
    pub final_path: Option<PathBuf>,
}

impl SeedOutcome {
    /// Returns true when the package reached `completed/`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.final_state == PackageState::Complete
    }
}

/// One downloaded payload, with its transfer digest.
struct FetchedWarc {
    path: PathBuf,
    transfer_md5: String,
    bytes: u64,
}

/// Builds packages, one seed at a time.
#[derive(Debug)]
pub struct PackageBuilder {
    client: Arc<CatalogClient>,
    quarantine: Arc<Quarantine>,
    retry_policy: RetryPolicy,
    staging_root: PathBuf,
    completed_root: PathBuf,
}

impl PackageBuilder {
    /// Creates a builder writing under the given staging and completed roots.
    pub fn new(
        client: Arc<CatalogClient>,
        quarantine: Arc<Quarantine>,
        retry_policy: RetryPolicy,
        staging_root: impl Into<PathBuf>,
        completed_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            quarantine,
            retry_policy,
            staging_root: staging_root.into(),
            completed_root: completed_root.into(),
        }
    }

    /// Builds one package end to end.
    ///
    /// Every stage failure is converted into a quarantine action and
    /// recorded in the returned outcome; the call itself always succeeds.
    #[instrument(
        skip(self, identifier, seed, warcs),
        fields(identifier = %identifier, seed_id = seed.id, warc_count = warcs.len())
    )]
    pub async fn build(
        &self,
        identifier: PackageIdentifier,
        seed: &Seed,
        warcs: &[WarcRecord],
    ) -> SeedOutcome {
        let layout = PackageLayout::new(&self.staging_root, &identifier, &seed.title);
        let mut stages = StageStatuses::default();
        let mut state = PackageState::Started;
        let mut fetched: Vec<FetchedWarc> = Vec::new();

        let mut crawl_jobs: Vec<u64> = warcs.iter().map(|w| w.crawl).collect();
        crawl_jobs.sort_unstable();
        crawl_jobs.dedup();
        let warc_filenames: Vec<String> = warcs.iter().map(|w| w.filename.clone()).collect();

        let result = self
            .run_stages(&layout, seed, warcs, &mut stages, &mut state, &mut fetched)
            .await;
        let total_bytes = fetched.iter().map(|w| w.bytes).sum();

        let (final_state, failure, final_path) = match result {
            Ok(final_path) => {
                info!(
                    identifier = %identifier,
                    path = %final_path.display(),
                    total_bytes,
                    "package complete"
                );
                (state, None, Some(final_path))
            }
            Err(stage_error) => {
                let reason = stage_error.reason();
                let detail = stage_error.to_string();
                warn!(identifier = %identifier, %reason, %detail, "stage failed, quarantining");

                // The stage walk only errors from non-terminal states, so
                // the fallback arm never runs.
                let state = state
                    .quarantine(reason)
                    .unwrap_or(PackageState::Quarantined { reason });
                let (path, note) = self.quarantine_package(&layout, reason, detail);
                (state, Some(note), path)
            }
        };

        SeedOutcome {
            identifier,
            seed_id: seed.id,
            collection: seed.collection,
            crawl_jobs,
            warc_filenames,
            total_bytes,
            stages,
            final_state,
            failure,
            final_path,
        }
    }

    /// Runs the stage sequence, advancing the state after each stage.
    async fn run_stages(
        &self,
        layout: &PackageLayout,
        seed: &Seed,
        warcs: &[WarcRecord],
        stages: &mut StageStatuses,
        state: &mut PackageState,
        fetched: &mut Vec<FetchedWarc>,
    ) -> Result<PathBuf, StageError> {
        layout.create_staging()?;

        let seed_report = match self.fetch_metadata(layout, seed).await {
            Ok(report) => {
                stages.metadata_fetch = StageStatus::Ok;
                report
            }
            Err(e) => {
                stages.metadata_fetch = StageStatus::Failed;
                return Err(e);
            }
        };
        *state = advanced(*state);

        match self.redact_and_store(layout, seed, seed_report).await {
            Ok(()) => stages.redaction = StageStatus::Ok,
            Err(e) => {
                stages.redaction = StageStatus::Failed;
                return Err(e);
            }
        }
        *state = advanced(*state);

        match self.fetch_warcs(layout, warcs, fetched).await {
            Ok(()) => stages.warc_fetch = StageStatus::Ok,
            Err(e) => {
                stages.warc_fetch = StageStatus::Failed;
                return Err(e);
            }
        }
        *state = advanced(*state);

        match self.verify_fixity(warcs, fetched).await {
            Ok(()) => stages.fixity = StageStatus::Ok,
            Err(e) => {
                stages.fixity = StageStatus::Failed;
                return Err(e);
            }
        }
        *state = advanced(*state);

        match normalize_objects(&layout.objects_dir()).await {
            Ok(_) => stages.normalize = StageStatus::Ok,
            Err(e) => {
                stages.normalize = StageStatus::Failed;
                return Err(e);
            }
        }
        *state = advanced(*state);

        let final_path = layout.finalize(&self.completed_root)?;
        *state = advanced(*state);
        Ok(final_path)
    }

    /// Fetches the three descriptive reports.
    ///
    /// Collection and crawl reports go straight into `metadata/`. The seed
    /// report is returned instead of written: it holds credentials until
    /// redaction has run.
    async fn fetch_metadata(
        &self,
        layout: &PackageLayout,
        seed: &Seed,
    ) -> Result<Option<Vec<u8>>, StageError> {
        for (kind, scope_id) in [
            (ReportKind::Collection, seed.collection),
            (ReportKind::Crawl, seed.crawl_definition),
        ] {
            let name = kind.filename(scope_id);
            let payload = self
                .with_retry(|| self.client.fetch_report(kind, scope_id))
                .await
                .map_err(|e| StageError::metadata_fetch(&name, e))?;
            match payload {
                ReportPayload::Present(bytes) => {
                    let path = layout.metadata_dir().join(&name);
                    tokio::fs::write(&path, &bytes)
                        .await
                        .map_err(|e| StageError::layout(path, e))?;
                }
                ReportPayload::Absent => {
                    debug!(report = %name, "report absent, nothing kept");
                }
            }
        }

        let name = ReportKind::Seed.filename(seed.id);
        let payload = self
            .with_retry(|| self.client.fetch_report(ReportKind::Seed, seed.id))
            .await
            .map_err(|e| StageError::metadata_fetch(&name, e))?;
        Ok(match payload {
            ReportPayload::Present(bytes) => Some(bytes),
            ReportPayload::Absent => None,
        })
    }

    /// Scrubs credentials from the seed report and writes the clean copy.
    async fn redact_and_store(
        &self,
        layout: &PackageLayout,
        seed: &Seed,
        raw: Option<Vec<u8>>,
    ) -> Result<(), StageError> {
        let Some(raw) = raw else {
            debug!("no seed report, nothing to redact");
            return Ok(());
        };

        let name = ReportKind::Seed.filename(seed.id);
        let clean = redact_credentials(&name, &raw)?;
        let path = layout.metadata_dir().join(&name);
        tokio::fs::write(&path, &clean)
            .await
            .map_err(|e| StageError::layout(path, e))?;
        Ok(())
    }

    /// Downloads every WARC payload into `objects/`. All or nothing.
    async fn fetch_warcs(
        &self,
        layout: &PackageLayout,
        warcs: &[WarcRecord],
        fetched: &mut Vec<FetchedWarc>,
    ) -> Result<(), StageError> {
        let objects_dir = layout.objects_dir();
        for record in warcs {
            let download = self
                .with_retry(|| self.client.download_warc(record, &objects_dir))
                .await
                .map_err(|e| StageError::warc_fetch(&record.filename, e))?;
            fetched.push(FetchedWarc {
                path: download.path,
                transfer_md5: download.transfer_md5,
                bytes: download.bytes_downloaded,
            });
        }
        Ok(())
    }

    /// Checks each payload's transfer and at-rest digests against the
    /// catalog's declared MD5. Stops at the first failure.
    async fn verify_fixity(
        &self,
        warcs: &[WarcRecord],
        fetched: &[FetchedWarc],
    ) -> Result<(), StageError> {
        for (record, warc) in warcs.iter().zip(fetched) {
            let declared = record
                .md5()
                .ok_or_else(|| StageError::missing_checksum(&record.filename))?;

            if let FixityOutcome::Mismatch { expected, actual } =
                compare_digests(&warc.transfer_md5, declared)
            {
                return Err(StageError::fixity(
                    &record.filename,
                    "transfer",
                    expected,
                    actual,
                ));
            }

            match verify_file_md5(&warc.path, declared).await {
                Ok(FixityOutcome::Match { .. }) => {}
                Ok(FixityOutcome::Mismatch { expected, actual }) => {
                    return Err(StageError::fixity(
                        &record.filename,
                        "at-rest",
                        expected,
                        actual,
                    ));
                }
                Err(e) => return Err(StageError::fixity_read(&record.filename, e)),
            }
        }
        Ok(())
    }

    /// Runs a catalog call under the retry policy.
    ///
    /// Only failures classified transient or rate-limited are retried; a
    /// server-mandated Retry-After overrides the backoff delay.
    async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, CatalogError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let failure = classify_catalog_error(&error);
                    match self.retry_policy.should_retry(failure, attempt) {
                        RetryDecision::Retry {
                            delay,
                            attempt: next,
                        } => {
                            let delay = retry_after_delay(&error).unwrap_or(delay);
                            warn!(
                                %error,
                                attempt,
                                delay_ms = delay.as_millis(),
                                "catalog call failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt = next;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(%error, reason, "not retrying");
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    /// Moves a failed package to quarantine, escalating if even that fails.
    fn quarantine_package(
        &self,
        layout: &PackageLayout,
        reason: ReasonCode,
        detail: String,
    ) -> (Option<PathBuf>, FailureNote) {
        let moved = if layout.staging_dir().exists() {
            self.quarantine
                .isolate(reason, layout.staging_dir(), &detail)
        } else {
            self.quarantine
                .isolate_unbuilt(reason, layout.dir_name(), &detail)
        };

        match moved {
            Ok(dest) => (
                Some(dest),
                FailureNote {
                    reason,
                    detail,
                    escalated: false,
                },
            ),
            Err(e) => {
                error!(
                    package = layout.dir_name(),
                    error = %e,
                    "quarantine failed; package needs operator attention"
                );
                let detail = format!("{detail}; quarantine failed: {e}");
                (
                    None,
                    FailureNote {
                        reason,
                        detail,
                        escalated: true,
                    },
                )
            }
        }
    }
}

/// Steps the state machine along the success path.
///
/// The stage walk is linear from `Started`, so `advance` never sees a
/// terminal state here and the fallback arm never runs.
fn advanced(state: PackageState) -> PackageState {
    state.advance().unwrap_or(state)
}
