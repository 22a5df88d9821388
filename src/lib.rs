//! warcpack Core Library
//!
//! This library packages crawled websites from a web-archiving catalog into
//! self-contained preservation units: one directory per seed with redacted
//! descriptive metadata and fixity-verified, decompressed WARC payloads.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`catalog`] - Remote catalog API client with retry classification
//! - [`ident`] - Package identifier derivation and assignment
//! - [`fixity`] - Streaming and at-rest MD5 verification
//! - [`package`] - Per-seed package assembly pipeline
//! - [`quarantine`] - Isolation of failed packages under `errors/`
//! - [`runlog`] - CSV run logs and the cumulative run summary
//! - [`watermark`] - Persistent incremental-run time bound
//! - [`batch`] - Run orchestration across a bounded worker pool
//! - [`config`] / [`cli`] - Flag and environment resolution

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod fixity;
pub mod ident;
pub mod package;
pub mod quarantine;
pub mod runlog;
pub mod watermark;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use batch::{
    BatchCoordinator, DEFAULT_CONCURRENCY, MAX_CONCURRENCY, OutputTree, RunError, RunReport,
    RunStats,
};
pub use catalog::{
    CatalogClient, CatalogError, DEFAULT_MAX_RETRIES, RetryPolicy, Seed, TimeRange, WarcRecord,
};
pub use config::Config;
pub use fixity::{FixityError, FixityOutcome, StreamingDigest, verify_file_md5};
pub use ident::{IdentifierAssigner, PackageIdentifier, Scope, parse_relation};
pub use package::{PackageBuilder, PackageState, ReasonCode, SeedOutcome, StageStatus};
pub use quarantine::Quarantine;
pub use runlog::{RunLog, RunSummary, run_stamp};
pub use watermark::Watermark;
