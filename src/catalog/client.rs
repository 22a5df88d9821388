//! HTTP client for the remote archiving catalog.
//!
//! [`CatalogClient`] wraps every call the pipeline makes against the catalog:
//! seed listings, WARC listings, report fetches, and WARC payload downloads.
//! One client is created per run and shared across workers, reusing pooled
//! connections.
//!
//! Two rules hold for every method here:
//!
//! - **No retries.** Each call reports its outcome exactly once. Retry policy
//!   belongs to callers ([`retry`](super::retry) carries the policy the
//!   package builder applies).
//! - **Explicit timeouts.** A wedged catalog response fails the call; it
//!   cannot wedge a worker forever.
//!
//! Seed metadata is memoized for the lifetime of the client, which is the
//! lifetime of one run: several WARC files usually share a seed, and the
//! catalog's answer for a seed does not change mid-run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use super::error::CatalogError;
use super::types::{
    ReportKind, ReportPayload, Seed, SeedFilter, TimeRange, WarcListing, WarcRecord,
};
use crate::fixity::StreamingDigest;

/// Default connect timeout (30 seconds).
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout (10 minutes; WARC payloads run to gigabytes).
const READ_TIMEOUT_SECS: u64 = 600;

/// Client for the catalog's read-only API.
///
/// # Example
///
/// ```no_run
/// use warcpack_core::catalog::{CatalogClient, ReportKind};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = CatalogClient::new("https://catalog.example", None)?;
/// let report = client.fetch_report(ReportKind::Seed, 911).await?;
/// println!("seed report present: {}", report.is_present());
/// # Ok(())
/// # }
/// ```
pub struct CatalogClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    /// Run-scoped seed metadata memo, keyed by seed id.
    seeds: DashMap<u64, Seed>,
}

/// Result of one WARC payload download.
#[derive(Debug, Clone)]
pub struct WarcDownload {
    /// Where the payload was written.
    pub path: PathBuf,
    /// Bytes received, already checked against the declared size.
    pub bytes_downloaded: u64,
    /// MD5 of the bytes as they streamed in, lowercase hex.
    ///
    /// This is the transfer-side digest; the fixity stage re-reads the file
    /// for the at-rest digest.
    pub transfer_md5: String,
}

impl CatalogClient {
    /// Creates a client with default timeouts.
    ///
    /// `auth_token`, when present, is sent as a bearer token on every call.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidUrl`] if `base_url` is not an absolute
    /// http(s) URL.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    /// This should never happen in practice.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, CatalogError> {
        Self::new_with_timeouts(base_url, auth_token, CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidUrl`] if `base_url` is not an absolute
    /// http(s) URL.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the supplied timeout
    /// configuration.
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(
        base_url: &str,
        auth_token: Option<String>,
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, CatalogError> {
        let parsed = Url::parse(base_url).map_err(|_| CatalogError::invalid_url(base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CatalogError::invalid_url(base_url));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(concat!("warcpack/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client with static configuration");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            seeds: DashMap::new(),
        })
    }

    /// Returns the configured base URL, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lists seeds matching a filter.
    ///
    /// Returned seeds also prime the per-run metadata memo, so a following
    /// [`seed_metadata`](Self::seed_metadata) call for any of them is free.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] on transport failure, error status, or a
    /// malformed response body.
    #[instrument(skip(self, filter))]
    pub async fn list_seeds(&self, filter: &SeedFilter) -> Result<Vec<Seed>, CatalogError> {
        let endpoint = append_query(
            format!("{}/api/seeds", self.base_url),
            &filter.query_pairs(),
        );
        let seeds: Vec<Seed> = self.get_json(&endpoint).await?;
        for seed in &seeds {
            self.seeds.insert(seed.id, seed.clone());
        }
        debug!(count = seeds.len(), "listed seeds");
        Ok(seeds)
    }

    /// Fetches metadata for one seed, memoized per run.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] on transport failure, error status, or a
    /// malformed response body. A cached seed never fails.
    #[instrument(skip(self))]
    pub async fn seed_metadata(&self, seed_id: u64) -> Result<Seed, CatalogError> {
        if let Some(hit) = self.seeds.get(&seed_id) {
            debug!(seed_id, "seed metadata memo hit");
            return Ok(hit.clone());
        }

        let endpoint = format!("{}/api/seeds/{seed_id}", self.base_url);
        let seed: Seed = self.get_json(&endpoint).await?;
        self.seeds.insert(seed.id, seed.clone());
        Ok(seed)
    }

    /// Lists WARC files stored inside a time window, following pagination.
    ///
    /// `collections` narrows the listing to those collection ids; empty means
    /// all collections. Pages are fetched sequentially until the catalog
    /// stops returning a `next` link; the caller's enumeration timeout bounds
    /// the whole walk.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if any page fails; a partial listing is never
    /// returned.
    #[instrument(skip(self), fields(range = %range))]
    pub async fn list_warcs(
        &self,
        range: &TimeRange,
        collections: &[u64],
    ) -> Result<Vec<WarcRecord>, CatalogError> {
        let mut endpoint = self.warcs_endpoint(range, collections);
        let mut records = Vec::new();
        let mut pages = 0u32;

        loop {
            let listing: WarcListing = self.get_json(&endpoint).await?;
            pages += 1;
            records.extend(listing.files);
            match listing.next {
                Some(next) => endpoint = next,
                None => break,
            }
        }

        info!(count = records.len(), pages, "listed WARC records");
        Ok(records)
    }

    /// Fetches one report, distinguishing "absent" from "failed".
    ///
    /// A 404 response or an empty body means the catalog never generated the
    /// report; that is [`ReportPayload::Absent`], a valid outcome. Every
    /// other non-success status is an error.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] on transport failure or a non-404 error
    /// status.
    #[instrument(skip(self))]
    pub async fn fetch_report(
        &self,
        kind: ReportKind,
        scope_id: u64,
    ) -> Result<ReportPayload, CatalogError> {
        let endpoint = format!("{}/api/reports/{kind}/{scope_id}", self.base_url);
        let response = self.get_response(&endpoint).await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(%endpoint, "report not generated");
            return Ok(ReportPayload::Absent);
        }

        let response = check_status(&endpoint, response)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;

        if bytes.is_empty() {
            debug!(%endpoint, "report body empty, treating as absent");
            return Ok(ReportPayload::Absent);
        }

        Ok(ReportPayload::Present(bytes.to_vec()))
    }

    /// Downloads one WARC payload into `dest_dir`, streaming and hashing.
    ///
    /// The payload is written under its catalog filename. Bytes are hashed
    /// while they stream so the transfer-side MD5 comes for free, and the
    /// byte count is checked against the record's declared size. On any
    /// failure the partial file is removed; a truncated or oversized payload
    /// is removed too and reported as [`CatalogError::Truncated`].
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the record has no usable location, the
    /// transfer fails, the write fails, or the size check fails.
    #[instrument(skip(self, record), fields(filename = %record.filename))]
    pub async fn download_warc(
        &self,
        record: &WarcRecord,
        dest_dir: &Path,
    ) -> Result<WarcDownload, CatalogError> {
        let url = record.download_url().ok_or_else(|| {
            CatalogError::invalid_url(format!("record {} has no location", record.filename))
        })?;
        Url::parse(url).map_err(|_| CatalogError::invalid_url(url))?;

        let file_path = dest_dir.join(&record.filename);
        let response = self.get_response(url).await?;
        let response = check_status(url, response)?;

        let mut file = File::create(&file_path)
            .await
            .map_err(|e| CatalogError::io(file_path.clone(), e))?;

        let stream_result = stream_to_file(&mut file, response, url, &file_path).await;

        if stream_result.is_err() {
            debug!(path = %file_path.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(&file_path).await;
        }

        let (bytes_downloaded, transfer_md5) = stream_result?;

        if bytes_downloaded != record.size {
            let _ = tokio::fs::remove_file(&file_path).await;
            return Err(CatalogError::truncated(
                file_path,
                record.size,
                bytes_downloaded,
            ));
        }

        info!(
            path = %file_path.display(),
            bytes = bytes_downloaded,
            "WARC download complete"
        );

        Ok(WarcDownload {
            path: file_path,
            bytes_downloaded,
            transfer_md5,
        })
    }

    fn warcs_endpoint(&self, range: &TimeRange, collections: &[u64]) -> String {
        let mut pairs = vec![
            ("store-time-after", rfc3339_utc(range.start)),
            ("store-time-before", rfc3339_utc(range.end)),
        ];
        for collection in collections {
            pairs.push(("collection", collection.to_string()));
        }
        append_query(format!("{}/api/warcs", self.base_url), &pairs)
    }

    async fn get_response(&self, endpoint: &str) -> Result<reqwest::Response, CatalogError> {
        let mut request = self.client.get(endpoint);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .await
            .map_err(|e| transport_error(endpoint, e))
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, CatalogError> {
        let response = self.get_response(endpoint).await?;
        let response = check_status(endpoint, response)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(endpoint, e))?;
        serde_json::from_slice(&bytes).map_err(|e| CatalogError::decode(endpoint, e))
    }
}

// The bearer token must never reach logs; Debug prints everything else.
impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.auth_token.is_some())
            .field("memoized_seeds", &self.seeds.len())
            .finish_non_exhaustive()
    }
}

/// Maps a reqwest transport error onto the catalog error taxonomy.
fn transport_error(endpoint: &str, error: reqwest::Error) -> CatalogError {
    if error.is_timeout() {
        CatalogError::timeout(endpoint)
    } else {
        CatalogError::network(endpoint, error)
    }
}

/// Turns a non-success response into an error, keeping Retry-After.
fn check_status(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, CatalogError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(std::string::ToString::to_string);
    Err(CatalogError::http_status_with_retry_after(
        endpoint,
        status,
        retry_after,
    ))
}

/// Streams a response body to a file, hashing as it goes.
///
/// Returns bytes written and the transfer MD5. Extracted so the caller can
/// clean up the partial file on error.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<(u64, String), CatalogError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut digest = StreamingDigest::new();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| transport_error(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| CatalogError::io(file_path.to_path_buf(), e))?;

        digest.update(&chunk);
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| CatalogError::io(file_path.to_path_buf(), e))?;

    Ok((bytes_written, digest.finalize_hex()))
}

/// Formats a timestamp as RFC 3339 with a `Z` suffix for query strings.
fn rfc3339_utc(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Appends percent-encoded query pairs to an endpoint.
fn append_query(mut endpoint: String, pairs: &[(&str, String)]) -> String {
    for (i, (key, value)) in pairs.iter().enumerate() {
        endpoint.push(if i == 0 { '?' } else { '&' });
        endpoint.push_str(key);
        endpoint.push('=');
        endpoint.push_str(&urlencoding::encode(value));
    }
    endpoint
}
