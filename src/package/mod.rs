//! Package assembly: one self-contained preservation unit per seed.
//!
//! A package is a directory named `<identifier>_<title-slug>` holding a
//! `metadata/` directory of redacted catalog reports and an `objects/`
//! directory of verified, decompressed WARC payloads. This module covers
//! the whole lifecycle:
//!
//! - [`PackageState`] - the stage-by-stage state machine, with quarantine
//!   reachable from every non-terminal state
//! - [`PackageBuilder`] - drives one package end to end, converting stage
//!   failures into quarantine outcomes
//! - [`PackageLayout`] - directory naming and the final commit rename
//! - [`redact_credentials`] - credential scrubbing for seed reports
//! - [`normalize_objects`] - in-place gzip decompression of payloads
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use warcpack_core::catalog::{CatalogClient, RetryPolicy};
//! use warcpack_core::ident::{IdentifierAssigner, Scope};
//! use warcpack_core::package::PackageBuilder;
//! use warcpack_core::quarantine::Quarantine;
//!
//! # async fn example(seed: warcpack_core::catalog::Seed, warcs: Vec<warcpack_core::catalog::WarcRecord>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(CatalogClient::new("https://catalog.example", None)?);
//! let quarantine = Arc::new(Quarantine::new("out/errors"));
//! let builder = PackageBuilder::new(
//!     client,
//!     quarantine,
//!     RetryPolicy::default(),
//!     "out/staging",
//!     "out/completed",
//! );
//!
//! let assigner = IdentifierAssigner::new(chrono::Utc::now().date_naive());
//! let identifier = assigner.assign(&seed.collector, Scope::Unscoped);
//! let outcome = builder.build(identifier, &seed, &warcs).await;
//! println!("{}: {}", outcome.identifier, outcome.final_state);
//! # Ok(())
//! # }
//! ```

mod builder;
mod error;
mod layout;
mod normalize;
mod redact;
mod state;

pub use builder::{
    FailureNote, PackageBuilder, SeedOutcome, StageStatus, StageStatuses,
};
pub use error::StageError;
pub use layout::{PackageLayout, title_slug};
pub use normalize::normalize_objects;
pub use redact::{REDACTED_PLACEHOLDER, redact_credentials};
pub use state::{PackageState, ReasonCode, TerminalStateError};
