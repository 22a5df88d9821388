//! Error types for remote catalog operations.
//!
//! Every variant carries the endpoint or file path it relates to, so a
//! failure can be logged and quarantined with enough context to re-run the
//! item by hand.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while talking to the remote catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error calling {endpoint}: {source}")]
    Network {
        /// The endpoint that failed.
        endpoint: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout calling {endpoint}")]
    Timeout {
        /// The endpoint that timed out.
        endpoint: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} from {endpoint}")]
    HttpStatus {
        /// The endpoint that returned an error status.
        endpoint: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// Response body did not match the expected shape.
    #[error("malformed response from {endpoint}: {source}")]
    Decode {
        /// The endpoint whose response failed to decode.
        endpoint: String,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// File system error while writing a downloaded payload.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A URL from configuration or a catalog record is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Downloaded payload is shorter or longer than the catalog declared.
    #[error("truncated transfer for {path}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Truncated {
        /// Download path that failed the size check.
        path: PathBuf,
        /// Size the catalog declared.
        expected_bytes: u64,
        /// Size actually received.
        actual_bytes: u64,
    },
}

impl CatalogError {
    /// Creates a network error from a reqwest error.
    pub fn network(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(endpoint: impl Into<String>) -> Self {
        Self::Timeout {
            endpoint: endpoint.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(endpoint: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            endpoint: endpoint.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        endpoint: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            endpoint: endpoint.into(),
            status,
            retry_after,
        }
    }

    /// Creates a decode error.
    pub fn decode(endpoint: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a truncated-transfer error.
    pub fn truncated(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Truncated {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }
}

// No From<reqwest::Error> or From<std::io::Error> impls: every variant needs
// endpoint or path context the source errors do not carry. The helper
// constructors force callers to supply it.
