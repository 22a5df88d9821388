//! Error types for package building.

use std::path::PathBuf;

use thiserror::Error;

use super::state::ReasonCode;
use crate::catalog::CatalogError;
use crate::fixity::FixityError;

/// A stage failure during one package build.
///
/// Every variant maps onto exactly one [`ReasonCode`], which decides the
/// quarantine subdirectory the package lands in. The mapping follows the
/// stage that failed, not the underlying cause: an I/O error while taking
/// an at-rest digest is still a fixity failure.
#[derive(Debug, Error)]
pub enum StageError {
    /// A descriptive report could not be fetched, retries included.
    #[error("metadata fetch failed for {report}: {source}")]
    MetadataFetch {
        report: String,
        #[source]
        source: CatalogError,
    },

    /// A report or catalog record did not have the structure redaction needs.
    #[error("schema violation in {report}: {detail}")]
    Schema { report: String, detail: String },

    /// A WARC payload could not be downloaded, retries included.
    #[error("WARC fetch failed for {filename}: {source}")]
    WarcFetch {
        filename: String,
        #[source]
        source: CatalogError,
    },

    /// A digest disagreed with the checksum the catalog declared.
    #[error("fixity mismatch for {filename} ({side}): expected {expected}, got {actual}")]
    Fixity {
        filename: String,
        /// Which digest disagreed: `transfer` or `at-rest`.
        side: &'static str,
        expected: String,
        actual: String,
    },

    /// The catalog listed a WARC without an MD5 checksum to verify against.
    #[error("no MD5 checksum in catalog record for {filename}")]
    MissingChecksum { filename: String },

    /// Reading a payload back for its at-rest digest failed.
    #[error("fixity check could not read {filename}: {source}")]
    FixityRead {
        filename: String,
        #[source]
        source: FixityError,
    },

    /// Payload decompression failed.
    #[error("normalization failed for {filename}: {source}")]
    Normalize {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// Creating, writing, or renaming part of the package tree failed.
    #[error("layout failure at {path}: {source}")]
    Layout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// No From<CatalogError> or From<std::io::Error> impls: the same source error
// maps to different stages depending on where it happened, so callers must
// say which stage they were in.
impl StageError {
    /// Creates a `MetadataFetch` error for a named report.
    pub fn metadata_fetch(report: impl Into<String>, source: CatalogError) -> Self {
        Self::MetadataFetch {
            report: report.into(),
            source,
        }
    }

    /// Creates a `Schema` error for a named report.
    pub fn schema(report: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Schema {
            report: report.into(),
            detail: detail.into(),
        }
    }

    /// Creates a `WarcFetch` error for a named payload.
    pub fn warc_fetch(filename: impl Into<String>, source: CatalogError) -> Self {
        Self::WarcFetch {
            filename: filename.into(),
            source,
        }
    }

    /// Creates a `Fixity` mismatch error.
    pub fn fixity(
        filename: impl Into<String>,
        side: &'static str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Fixity {
            filename: filename.into(),
            side,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a `MissingChecksum` error.
    pub fn missing_checksum(filename: impl Into<String>) -> Self {
        Self::MissingChecksum {
            filename: filename.into(),
        }
    }

    /// Creates a `FixityRead` error.
    pub fn fixity_read(filename: impl Into<String>, source: FixityError) -> Self {
        Self::FixityRead {
            filename: filename.into(),
            source,
        }
    }

    /// Creates a `Normalize` error for a named payload.
    pub fn normalize(filename: impl Into<String>, source: std::io::Error) -> Self {
        Self::Normalize {
            filename: filename.into(),
            source,
        }
    }

    /// Creates a `Layout` error for a path.
    pub fn layout(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Layout {
            path: path.into(),
            source,
        }
    }

    /// Returns the quarantine reason this failure maps to.
    #[must_use]
    pub fn reason(&self) -> ReasonCode {
        match self {
            Self::MetadataFetch { .. } => ReasonCode::MetadataFetch,
            Self::Schema { .. } => ReasonCode::Schema,
            Self::WarcFetch { .. } => ReasonCode::WarcFetch,
            Self::Fixity { .. } | Self::MissingChecksum { .. } | Self::FixityRead { .. } => {
                ReasonCode::Fixity
            }
            Self::Normalize { .. } => ReasonCode::Normalize,
            Self::Layout { .. } => ReasonCode::Layout,
        }
    }
}
