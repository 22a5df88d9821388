//! MD5 fixity computation and verification for archived payloads.
//!
//! The remote catalog publishes an MD5 digest for every WARC file it stores.
//! This module recomputes that digest locally and compares it against the
//! declared value. MD5 is the digest the catalog mandates; it is used here as
//! a transfer-integrity check, not as a cryptographic guarantee.
//!
//! Digests are computed in fixed-size chunks so multi-gigabyte WARC files
//! never need to fit in memory. Hex comparison is case-insensitive because
//! upstream systems disagree about digest casing.
//!
//! # Example
//!
//! ```no_run
//! use warcpack_core::fixity::{FixityOutcome, verify_file_md5};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let outcome = verify_file_md5(
//!     Path::new("objects/ARCHIVE-001.warc.gz"),
//!     "9e107d9d372bb6826bd81d3542a419d6",
//! )
//! .await?;
//! match outcome {
//!     FixityOutcome::Match { .. } => println!("fixity ok"),
//!     FixityOutcome::Mismatch { expected, actual } => {
//!         eprintln!("corrupt transfer: expected {expected}, got {actual}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

/// Read chunk size for streaming digest computation (64 KiB).
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Errors raised while computing a digest.
#[derive(Debug, Error)]
pub enum FixityError {
    /// The file could not be opened or read.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// The file that failed to read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl FixityError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of comparing a computed digest against a declared one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixityOutcome {
    /// Computed digest equals the declared digest.
    Match {
        /// The agreed digest, lowercase hex.
        checksum: String,
    },

    /// Computed digest differs from the declared digest.
    ///
    /// Both values are kept so the mismatch can be recorded verbatim in the
    /// run log and the quarantine note.
    Mismatch {
        /// Digest the catalog declared, lowercase hex.
        expected: String,
        /// Digest computed from the local bytes, lowercase hex.
        actual: String,
    },
}

impl FixityOutcome {
    /// Returns `true` when the digests agreed.
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }
}

/// Incremental MD5 digest for hashing a payload while it streams to disk.
///
/// The catalog client feeds every downloaded chunk through one of these so a
/// WARC is hashed during transfer without a second read pass. The at-rest
/// check in the fixity stage re-reads the file independently.
#[derive(Debug, Default)]
pub struct StreamingDigest {
    hasher: Md5,
}

impl StreamingDigest {
    /// Creates an empty digest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk into the digest.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Consumes the digest and returns lowercase hex.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

/// Computes the MD5 digest of an in-memory buffer, lowercase hex.
#[must_use]
pub fn compute_md5(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Computes the MD5 digest of a file by streaming it in chunks.
///
/// # Errors
///
/// Returns [`FixityError::Io`] if the file cannot be opened or read.
#[instrument(level = "debug", fields(path = %path.display()))]
pub async fn compute_file_md5(path: &Path) -> Result<String, FixityError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| FixityError::io(path, e))?;

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; READ_CHUNK_BYTES];
    let mut total_bytes: u64 = 0;

    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| FixityError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total_bytes += read as u64;
    }

    debug!(bytes = total_bytes, "digest computed");
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compares a computed digest against a declared one, case-insensitively.
///
/// The returned [`FixityOutcome::Match`] and the `expected` side of a
/// mismatch are normalized to lowercase so downstream records are uniform.
#[must_use]
pub fn compare_digests(actual: &str, expected: &str) -> FixityOutcome {
    if actual.eq_ignore_ascii_case(expected) {
        FixityOutcome::Match {
            checksum: actual.to_ascii_lowercase(),
        }
    } else {
        FixityOutcome::Mismatch {
            expected: expected.to_ascii_lowercase(),
            actual: actual.to_ascii_lowercase(),
        }
    }
}

/// Verifies a file on disk against a declared MD5 digest.
///
/// This is the at-rest half of fixity checking: the file is re-read from disk
/// in full, independent of whatever digest was computed during transfer.
///
/// # Errors
///
/// Returns [`FixityError::Io`] if the file cannot be read. An unreadable file
/// is an IO failure, not a mismatch; callers decide how to classify it.
#[instrument(level = "debug", fields(path = %path.display()))]
pub async fn verify_file_md5(path: &Path, expected: &str) -> Result<FixityOutcome, FixityError> {
    let actual = compute_file_md5(path).await?;
    Ok(compare_digests(&actual, expected))
}
