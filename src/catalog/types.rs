//! Data shapes consumed from the remote catalog API.
//!
//! These types mirror the JSON the catalog returns. They are read-only
//! snapshots: nothing here is authoritative locally, and every run fetches
//! fresh copies. Parsing is tolerant (unknown fields ignored, optional fields
//! defaulted) so a catalog-side schema addition does not break enumeration;
//! fields the pipeline cannot proceed without are checked explicitly at the
//! point of use.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One archived seed (website) as described by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Seed {
    /// Remote numeric id.
    pub id: u64,
    /// Display title, used in the package directory name.
    #[serde(default)]
    pub title: String,
    /// Owning department, source of the identifier's department code.
    #[serde(default)]
    pub collector: String,
    /// Free-text relation; carries the scope number when present.
    #[serde(default)]
    pub relation: Option<String>,
    /// Owning collection id.
    pub collection: u64,
    /// Crawl definition id the seed is crawled under.
    pub crawl_definition: u64,
}

/// One stored WARC file as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WarcRecord {
    /// Stored filename, e.g. `ARCHIVE-7312-2026...-00001.warc.gz`.
    pub filename: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Digests by algorithm name; the pipeline requires the `md5` entry.
    #[serde(default)]
    pub checksums: HashMap<String, String>,
    /// Owning seed id.
    pub seed: u64,
    /// Crawl job that produced the file.
    pub crawl: u64,
    /// Owning collection id.
    pub collection: u64,
    /// Download URLs; the first entry is used.
    #[serde(default)]
    pub locations: Vec<String>,
    /// When the catalog stored the file.
    pub store_time: DateTime<Utc>,
}

impl WarcRecord {
    /// Returns the declared MD5 digest, if the catalog published one.
    #[must_use]
    pub fn md5(&self) -> Option<&str> {
        self.checksums.get("md5").map(String::as_str)
    }

    /// Returns the download URL, if the catalog published one.
    #[must_use]
    pub fn download_url(&self) -> Option<&str> {
        self.locations.first().map(String::as_str)
    }
}

/// One page of a WARC listing response.
///
/// Listings are paginated; `next` holds the absolute URL of the following
/// page until the listing is exhausted.
#[derive(Debug, Clone, Deserialize)]
pub struct WarcListing {
    /// Total number of files matching the query.
    pub count: u64,
    /// Absolute URL of the next page, when more results remain.
    #[serde(default)]
    pub next: Option<String>,
    /// Records on this page.
    #[serde(default)]
    pub files: Vec<WarcRecord>,
}

/// The report types fetched into a package's `metadata/` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// Per-seed descriptive report; carries credential columns to redact.
    Seed,
    /// Collection-level report.
    Collection,
    /// Crawl-definition report.
    Crawl,
}

impl ReportKind {
    /// All report kinds a complete package carries, in fetch order.
    pub const ALL: [Self; 3] = [Self::Seed, Self::Collection, Self::Crawl];

    /// Returns the string form used in URLs and filenames.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Collection => "collection",
            Self::Crawl => "crawl",
        }
    }

    /// Returns the filename the report is saved under inside `metadata/`.
    #[must_use]
    pub fn filename(self, scope_id: u64) -> String {
        format!("{}-{}.csv", self.as_str(), scope_id)
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of fetching one report.
///
/// A report the catalog has never generated is a normal condition, not a
/// failure: the catalog answers 404 (or an empty body), and the package
/// simply does not carry that file. Transport failures surface as
/// [`CatalogError`](super::CatalogError) instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportPayload {
    /// The report exists; raw CSV bytes as served.
    Present(Vec<u8>),
    /// The catalog has no such report.
    Absent,
}

impl ReportPayload {
    /// Returns `true` when the catalog served report content.
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Filter for seed listing queries.
#[derive(Debug, Clone, Default)]
pub struct SeedFilter {
    /// Restrict to these seed ids; empty means no id restriction.
    pub ids: Vec<u64>,
    /// Restrict to these collections; empty means all collections.
    pub collections: Vec<u64>,
}

impl SeedFilter {
    /// Filter matching exactly the given seed ids.
    #[must_use]
    pub fn for_ids(ids: Vec<u64>) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    /// Returns the filter as query pairs, in a stable order.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        for id in &self.ids {
            pairs.push(("id", id.to_string()));
        }
        for collection in &self.collections {
            pairs.push(("collection", collection.to_string()));
        }
        pairs
    }
}

/// Half-open time window `[start, end)` a run enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound (the previous watermark).
    pub start: DateTime<Utc>,
    /// Exclusive upper bound (the next watermark candidate).
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a range, keeping `start <= end` by swapping when needed.
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}
