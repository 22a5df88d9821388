//! Client for the remote archiving catalog.
//!
//! The catalog is the system of record for everything this tool packages:
//! which seeds exist, which WARC files each crawl produced, where those
//! files live, and what the catalog believes their MD5 checksums are. This
//! module covers the full read surface:
//!
//! - Seed listings and per-seed metadata (memoized per run)
//! - WARC listings over a stored-time window, with pagination
//! - Descriptive reports (seed, collection, crawl), where "not generated"
//!   is a valid answer and not an error
//! - Streaming WARC payload downloads with an inline transfer digest
//!
//! The client itself never retries; [`RetryPolicy`] and
//! [`classify_catalog_error`] let callers decide which failures deserve
//! another attempt.
//!
//! # Example
//!
//! ```no_run
//! use warcpack_core::catalog::{CatalogClient, SeedFilter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CatalogClient::new("https://catalog.example", None)?;
//! let seeds = client.list_seeds(&SeedFilter::default()).await?;
//! println!("{} seeds", seeds.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod retry;
mod types;

pub use client::{CatalogClient, WarcDownload};
pub use error::CatalogError;
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_catalog_error,
    retry_after_delay,
};
pub use types::{
    ReportKind, ReportPayload, Seed, SeedFilter, TimeRange, WarcListing, WarcRecord,
};

// Note: no module-local Result alias. Use `Result<T, CatalogError>` explicitly
// in function signatures.
