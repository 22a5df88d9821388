//! CLI entry point for the warcpack packaging tool.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fs2::FileExt;
use tracing::{debug, info, warn};
use warcpack_core::batch::{BatchCoordinator, OutputTree};
use warcpack_core::catalog::CatalogClient;
use warcpack_core::cli::Args;
use warcpack_core::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config = Config::from_args(&args)?;
    info!(
        catalog = %config.catalog_url,
        output = %config.output_dir.display(),
        dry_run = config.dry_run,
        "warcpack starting"
    );

    let client = Arc::new(CatalogClient::new(
        &config.catalog_url,
        config.api_token.clone(),
    )?);
    let coordinator = BatchCoordinator::new(client, &config)?;

    // One run at a time per output tree; a second process would race the
    // staging directory and the identifier sequences. Dry runs write nothing
    // and skip the lock.
    let tree = OutputTree::new(&config.output_dir);
    let _lock = if config.dry_run {
        None
    } else {
        Some(acquire_run_lock(&tree.run_lock_path())?)
    };

    let report = coordinator.run().await?;

    if config.dry_run {
        for plan in &report.planned {
            if let Some(problem) = &plan.problem {
                warn!(
                    seed_id = plan.seed_id,
                    title = %plan.title,
                    problem = %problem,
                    "would quarantine"
                );
            } else if let Some(identifier) = &plan.identifier {
                info!(
                    identifier = %identifier,
                    seed_id = plan.seed_id,
                    title = %plan.title,
                    warc_count = plan.warc_count,
                    declared_bytes = plan.declared_bytes,
                    "would package"
                );
            }
        }
        info!(seeds = report.seeds_total, window = %report.window, "dry run complete");
        return Ok(());
    }

    if report.escalated > 0 {
        warn!(
            escalated = report.escalated,
            "failures needed operator attention; see errors/ and the run log"
        );
    }
    if let Some(path) = &report.run_log_path {
        info!(path = %path.display(), "run log written");
    }
    info!(
        completed = report.completed,
        quarantined = report.quarantined,
        total_bytes = report.total_bytes,
        watermark_advanced = report.watermark_advanced,
        "run complete"
    );

    Ok(())
}

/// Takes the advisory run lock, failing fast when another run holds it.
fn acquire_run_lock(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("could not open run lock {}", path.display()))?;
    file.try_lock_exclusive()
        .with_context(|| format!("another run already holds {}", path.display()))?;
    Ok(file)
}
