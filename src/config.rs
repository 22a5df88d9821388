//! Runtime configuration resolved from CLI flags and the environment.
//!
//! Flags always win over environment variables. The catalog URL is the one
//! setting with no default: a packaging run aimed at the wrong catalog is
//! worse than one that refuses to start.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

use crate::cli::Args;

/// Environment variable naming the catalog API base URL.
pub const CATALOG_URL_ENV: &str = "WARCPACK_CATALOG_URL";

/// Environment variable carrying the catalog API bearer token.
pub const API_TOKEN_ENV: &str = "WARCPACK_API_TOKEN";

/// Resolved settings for one run.
#[derive(Clone)]
pub struct Config {
    pub catalog_url: String,
    pub api_token: Option<String>,
    pub output_dir: PathBuf,
    pub collections: Vec<u64>,
    pub concurrency: usize,
    pub max_retries: u32,
    pub enumeration_timeout_secs: u64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub dry_run: bool,
}

impl Config {
    /// Resolves flags and environment into a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when no catalog URL is available from either source,
    /// or when [`Config::validate`] rejects the combination.
    pub fn from_args(args: &Args) -> Result<Self> {
        let catalog_url = args
            .catalog_url
            .clone()
            .or_else(|| env_nonempty(CATALOG_URL_ENV))
            .with_context(|| {
                format!("no catalog URL; pass --catalog-url or set {CATALOG_URL_ENV}")
            })?;
        let api_token = args.api_token.clone().or_else(|| env_nonempty(API_TOKEN_ENV));

        let config = Self {
            catalog_url,
            api_token,
            output_dir: args.output_dir.clone(),
            collections: args.collections.clone(),
            concurrency: usize::from(args.concurrency),
            max_retries: u32::from(args.max_retries),
            enumeration_timeout_secs: args.enumeration_timeout,
            start_date: args.start_date,
            end_date: args.end_date,
            dry_run: args.dry_run,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints clap cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending flag.
    pub fn validate(&self) -> Result<()> {
        if !self.catalog_url.starts_with("http://") && !self.catalog_url.starts_with("https://") {
            bail!(
                "catalog URL '{}' must start with http:// or https://",
                self.catalog_url
            );
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                bail!("--start-date {start} is after --end-date {end}");
            }
        }
        Ok(())
    }
}

// Manual Debug so the token never reaches logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("catalog_url", &self.catalog_url)
            .field("authenticated", &self.api_token.is_some())
            .field("output_dir", &self.output_dir)
            .field("collections", &self.collections)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("enumeration_timeout_secs", &self.enumeration_timeout_secs)
            .field("start_date", &self.start_date)
            .field("end_date", &self.end_date)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

/// Reads an environment variable, treating unset, empty and blank as absent.
fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
