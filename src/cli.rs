//! CLI argument definitions using clap derive macros.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

use crate::batch::{DEFAULT_CONCURRENCY, DEFAULT_ENUMERATION_TIMEOUT_SECS};
use crate::catalog::DEFAULT_MAX_RETRIES;

/// Package crawled websites into preservation-ready directories.
///
/// warcpack enumerates the WARC files the catalog stored inside a time
/// window, then builds one package per seed: redacted descriptive metadata
/// under `metadata/`, verified and decompressed payloads under `objects/`.
/// Finished packages land in `completed/`, failed ones in `errors/`.
#[derive(Parser)]
#[command(name = "warcpack")]
#[command(author, version, about)]
pub struct Args {
    /// Catalog API base URL (overrides WARCPACK_CATALOG_URL)
    #[arg(long, value_name = "URL")]
    pub catalog_url: Option<String>,

    /// Catalog API bearer token (overrides WARCPACK_API_TOKEN)
    #[arg(long, value_name = "TOKEN")]
    pub api_token: Option<String>,

    /// Output directory holding completed/, errors/, staging/, logs/ and state/
    #[arg(short = 'o', long, default_value = ".", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Restrict the run to a collection id (repeatable)
    #[arg(long = "collection", value_name = "ID")]
    pub collections: Vec<u64>,

    /// Package WARCs stored on or after this UTC date (YYYY-MM-DD); defaults to the stored watermark
    #[arg(long, value_name = "DATE")]
    pub start_date: Option<NaiveDate>,

    /// Package WARCs stored before this UTC date (YYYY-MM-DD, exclusive); defaults to now
    #[arg(long, value_name = "DATE")]
    pub end_date: Option<NaiveDate>,

    /// Maximum concurrent package builds (1-16)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: u8,

    /// Maximum retry attempts for transient catalog failures (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Abort the run if enumeration takes longer than this many seconds (1-86400)
    #[arg(long, default_value_t = DEFAULT_ENUMERATION_TIMEOUT_SECS, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=86400))]
    pub enumeration_timeout: u64,

    /// List what would be packaged without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

// Manual Debug so a `debug!(?args)` line can never leak the token.
impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("catalog_url", &self.catalog_url)
            .field("authenticated", &self.api_token.is_some())
            .field("output_dir", &self.output_dir)
            .field("collections", &self.collections)
            .field("start_date", &self.start_date)
            .field("end_date", &self.end_date)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("enumeration_timeout", &self.enumeration_timeout)
            .field("dry_run", &self.dry_run)
            .field("verbose", &self.verbose)
            .field("quiet", &self.quiet)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["warcpack"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.dry_run);
        assert_eq!(args.concurrency, 4); // DEFAULT_CONCURRENCY
        assert_eq!(args.max_retries, 3); // DEFAULT_MAX_RETRIES
        assert_eq!(args.enumeration_timeout, 300);
        assert_eq!(args.output_dir, PathBuf::from("."));
        assert!(args.collections.is_empty());
        assert!(args.start_date.is_none());
        assert!(args.end_date.is_none());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["warcpack", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["warcpack", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);

        let args = Args::try_parse_from(["warcpack", "--verbose", "--verbose"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["warcpack", "-q"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        // --help causes early exit, so we check it returns an error with Help kind
        let result = Args::try_parse_from(["warcpack", "--help"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let result = Args::try_parse_from(["warcpack", "--version"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let result = Args::try_parse_from(["warcpack", "--invalid-flag"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Concurrency Tests ====================

    #[test]
    fn test_cli_concurrency_bounds() {
        let args = Args::try_parse_from(["warcpack", "-c", "1"]).unwrap();
        assert_eq!(args.concurrency, 1);

        let args = Args::try_parse_from(["warcpack", "--concurrency", "16"]).unwrap();
        assert_eq!(args.concurrency, 16);
    }

    #[test]
    fn test_cli_concurrency_zero_rejected() {
        let result = Args::try_parse_from(["warcpack", "-c", "0"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_concurrency_over_max_rejected() {
        let result = Args::try_parse_from(["warcpack", "-c", "17"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    // ==================== Max Retries Tests ====================

    #[test]
    fn test_cli_max_retries_zero_allowed() {
        // 0 retries means no retry, just a single attempt
        let args = Args::try_parse_from(["warcpack", "-r", "0"]).unwrap();
        assert_eq!(args.max_retries, 0);
    }

    #[test]
    fn test_cli_max_retries_over_max_rejected() {
        let result = Args::try_parse_from(["warcpack", "-r", "11"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    // ==================== Window Flag Tests ====================

    #[test]
    fn test_cli_dates_parse_iso_format() {
        let args = Args::try_parse_from([
            "warcpack",
            "--start-date",
            "2026-08-01",
            "--end-date",
            "2026-08-23",
        ])
        .unwrap();
        assert_eq!(args.start_date, NaiveDate::from_ymd_opt(2026, 8, 1));
        assert_eq!(args.end_date, NaiveDate::from_ymd_opt(2026, 8, 23));
    }

    #[test]
    fn test_cli_malformed_date_rejected() {
        let result = Args::try_parse_from(["warcpack", "--start-date", "01/08/2026"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    // ==================== Collection Flag Tests ====================

    #[test]
    fn test_cli_collection_flag_repeatable() {
        let args = Args::try_parse_from([
            "warcpack",
            "--collection",
            "7312",
            "--collection",
            "7313",
        ])
        .unwrap();
        assert_eq!(args.collections, vec![7312, 7313]);
    }

    // ==================== Misc Flag Tests ====================

    #[test]
    fn test_cli_dry_run_flag() {
        let args = Args::try_parse_from(["warcpack", "--dry-run"]).unwrap();
        assert!(args.dry_run);
    }

    #[test]
    fn test_cli_enumeration_timeout_zero_rejected() {
        let result = Args::try_parse_from(["warcpack", "--enumeration-timeout", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_debug_output_never_shows_token() {
        let args = Args::try_parse_from(["warcpack", "--api-token", "secret-sesame"]).unwrap();
        let debug = format!("{args:?}");
        assert!(!debug.contains("secret-sesame"));
        assert!(debug.contains("authenticated: true"));
    }
}
