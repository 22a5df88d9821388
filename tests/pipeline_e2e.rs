//! End-to-end pipeline tests: mock catalog in, finished package tree out.
//!
//! Each test stands up a wiremock catalog, runs a whole packaging pass
//! through [`BatchCoordinator`], then asserts on the resulting directory
//! tree, run log and watermark.

mod support;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use warcpack_core::batch::{BatchCoordinator, RunError, RunReport};
use warcpack_core::catalog::CatalogClient;
use warcpack_core::config::Config;
use warcpack_core::fixity::compute_md5;
use warcpack_core::watermark::Watermark;

use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

// ==================== Fixture ====================

fn gzip(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

fn seed_json(
    id: u64,
    title: &str,
    collector: &str,
    relation: Option<&str>,
    collection: u64,
    crawl_definition: u64,
) -> serde_json::Value {
    json!({
        "id": id,
        "title": title,
        "collector": collector,
        "relation": relation,
        "collection": collection,
        "crawl_definition": crawl_definition,
    })
}

fn warc_json(
    server: &MockServer,
    filename: &str,
    seed: u64,
    crawl: u64,
    collection: u64,
    payload: &[u8],
    store_time: &str,
) -> serde_json::Value {
    json!({
        "filename": filename,
        "size": payload.len(),
        "checksums": {"md5": compute_md5(payload)},
        "seed": seed,
        "crawl": crawl,
        "collection": collection,
        "locations": [format!("{}/webdata/{filename}", server.uri())],
        "store_time": store_time,
    })
}

async fn mount_listing(server: &MockServer, seeds: &[serde_json::Value], warcs: &[serde_json::Value]) {
    Mock::given(method("GET"))
        .and(path("/api/warcs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"count": warcs.len(), "files": warcs})),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/seeds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(seeds)))
        .mount(server)
        .await;
}

async fn mount_payload(server: &MockServer, filename: &str, payload: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/webdata/{filename}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.to_vec()))
        .mount(server)
        .await;
}

async fn mount_report(server: &MockServer, kind: &str, id: u64, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/reports/{kind}/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/csv"))
        .mount(server)
        .await;
}

/// Explicit-window config; replay runs keep identifier names deterministic.
fn run_config(server: &MockServer, output: &Path) -> Config {
    Config {
        catalog_url: server.uri(),
        api_token: None,
        output_dir: output.to_path_buf(),
        collections: Vec::new(),
        concurrency: 4,
        max_retries: 1,
        enumeration_timeout_secs: 10,
        start_date: NaiveDate::from_ymd_opt(2026, 8, 1),
        end_date: NaiveDate::from_ymd_opt(2026, 8, 23),
        dry_run: false,
    }
}

async fn run_pipeline(config: &Config) -> Result<RunReport, RunError> {
    let client = Arc::new(CatalogClient::new(&config.catalog_url, None).unwrap());
    let coordinator = BatchCoordinator::new(client, config).unwrap();
    coordinator.run().await
}

/// Every file under `root`, depth first.
fn tree_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let entry = entry.unwrap();
            if entry.path().is_dir() {
                stack.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }
    files
}

fn read_log_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

// ==================== Full Run ====================

/// Three seeds across two departments: scoped identifiers share a sequence,
/// the unscoped seed gets the sentinel scope, and every package carries the
/// strict metadata/objects layout.
#[tokio::test]
async fn test_full_run_builds_every_package_with_strict_layout() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out");

    let payload_a1 = gzip(b"WARC/1.0 alpha-one");
    let payload_a2 = gzip(b"WARC/1.0 alpha-two");
    let payload_b1 = gzip(b"WARC/1.0 bravo-one");
    let payload_c1 = gzip(b"WARC/1.0 charlie-one");

    let seeds = [
        seed_json(911, "City Climate Blog", "University Archives", Some("Accession 42"), 7312, 31415),
        seed_json(912, "County Fair Histories", "University Archives", Some("Accession 42"), 7312, 31415),
        seed_json(913, "Oral Histories", "Municipal Library", None, 7313, 31416),
    ];
    let warcs = [
        warc_json(&server, "a1.warc.gz", 911, 1615, 7312, &payload_a1, "2026-08-02T10:00:00Z"),
        warc_json(&server, "a2.warc.gz", 911, 1616, 7312, &payload_a2, "2026-08-03T10:00:00Z"),
        warc_json(&server, "b1.warc.gz", 912, 1615, 7312, &payload_b1, "2026-08-04T10:00:00Z"),
        warc_json(&server, "c1.warc.gz", 913, 1700, 7313, &payload_c1, "2026-08-05T10:00:00Z"),
    ];
    mount_listing(&server, &seeds, &warcs).await;
    mount_payload(&server, "a1.warc.gz", &payload_a1).await;
    mount_payload(&server, "a2.warc.gz", &payload_a2).await;
    mount_payload(&server, "b1.warc.gz", &payload_b1).await;
    mount_payload(&server, "c1.warc.gz", &payload_c1).await;
    mount_report(
        &server,
        "seed",
        911,
        "id,url,login_username,login_password\n911,https://city.example,alice,hunter2\n",
    )
    .await;
    mount_report(&server, "collection", 7312, "id,name\n7312,Municipal Web\n").await;
    mount_report(&server, "crawl", 31415, "id,frequency\n31415,quarterly\n").await;

    let config = run_config(&server, &output);
    let report = run_pipeline(&config).await.unwrap();

    assert_eq!(report.completed, 3);
    assert_eq!(report.quarantined, 0);
    assert_eq!(report.escalated, 0);
    let expected_bytes =
        (payload_a1.len() + payload_a2.len() + payload_b1.len() + payload_c1.len()) as u64;
    assert_eq!(report.total_bytes, expected_bytes);

    // Scoped sequence follows seed-id order; the unscoped seed starts its own.
    let first = output.join("completed").join("ua-0042-202608-0001_City_Climate_Blog");
    let second = output.join("completed").join("ua-0042-202608-0002_County_Fair_Histories");
    let third = output.join("completed").join("ml-0000-202608-0001_Oral_Histories");
    assert!(first.is_dir(), "missing {}", first.display());
    assert!(second.is_dir(), "missing {}", second.display());
    assert!(third.is_dir(), "missing {}", third.display());

    // Payloads arrive decompressed, without the .gz suffix.
    assert_eq!(
        std::fs::read(first.join("objects").join("a1.warc")).unwrap(),
        b"WARC/1.0 alpha-one"
    );
    assert_eq!(
        std::fs::read(first.join("objects").join("a2.warc")).unwrap(),
        b"WARC/1.0 alpha-two"
    );

    // The seed report lands redacted; the other reports land as served.
    let seed_report =
        std::fs::read_to_string(first.join("metadata").join("seed-911.csv")).unwrap();
    assert!(seed_report.contains("[REDACTED],[REDACTED]"));
    assert!(!seed_report.contains("alice"));
    assert!(!seed_report.contains("hunter2"));
    assert!(first.join("metadata").join("collection-7312.csv").is_file());
    assert!(first.join("metadata").join("crawl-31415.csv").is_file());

    // Seed 913 has no reports at all; its metadata directory is just empty.
    assert!(third.join("metadata").is_dir());
    assert_eq!(std::fs::read_dir(third.join("metadata")).unwrap().count(), 0);
    assert_eq!(
        std::fs::read(third.join("objects").join("c1.warc")).unwrap(),
        b"WARC/1.0 charlie-one"
    );

    // Staging drained; nothing quarantined.
    assert_eq!(std::fs::read_dir(output.join("staging")).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(output.join("errors")).unwrap().count(), 0);

    // Run log holds one row per seed plus the shared summary file.
    let log_path = report.run_log_path.unwrap();
    let rows = read_log_rows(&log_path);
    assert_eq!(rows.len(), 3);
    let identifiers: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
    assert!(identifiers.contains(&"ua-0042-202608-0001"));
    assert!(identifiers.contains(&"ml-0000-202608-0001"));
    assert!(rows.iter().all(|r| r[12] == "true"));

    let summaries = read_log_rows(&output.join("logs").join("runs.csv"));
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0][6], "3", "completed column");
    assert_eq!(summaries[0][10], "false", "explicit window never advances");

    // Explicit window: no watermark may appear.
    assert!(!output.join("state").join("watermark").exists());
}

// ==================== Per-Seed Failure Isolation ====================

/// A fixity mismatch quarantines its own seed and leaves the rest alone.
#[tokio::test]
async fn test_fixity_failure_quarantines_one_seed_among_successes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out");

    let good = gzip(b"WARC/1.0 good");
    let bad = gzip(b"WARC/1.0 bad");

    let seeds = [
        seed_json(911, "City Climate Blog", "University Archives", Some("Accession 42"), 7312, 31415),
        seed_json(912, "County Fair Histories", "University Archives", Some("Accession 42"), 7312, 31415),
    ];
    let mut bad_record = warc_json(&server, "b1.warc.gz", 912, 1615, 7312, &bad, "2026-08-04T10:00:00Z");
    bad_record["checksums"]["md5"] = json!("00000000000000000000000000000000");
    let warcs = [
        warc_json(&server, "a1.warc.gz", 911, 1615, 7312, &good, "2026-08-02T10:00:00Z"),
        bad_record,
    ];
    mount_listing(&server, &seeds, &warcs).await;
    mount_payload(&server, "a1.warc.gz", &good).await;
    mount_payload(&server, "b1.warc.gz", &bad).await;

    let config = run_config(&server, &output);
    let report = run_pipeline(&config).await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.escalated, 0);

    assert!(
        output
            .join("completed")
            .join("ua-0042-202608-0001_City_Climate_Blog")
            .is_dir()
    );
    let quarantined = output
        .join("errors")
        .join("fixity")
        .join("ua-0042-202608-0002_County_Fair_Histories");
    assert!(quarantined.is_dir(), "missing {}", quarantined.display());

    let note = std::fs::read_to_string(quarantined.join("quarantine.txt")).unwrap();
    assert!(note.starts_with("reason: fixity"));

    // The suspect payload stays with the package, still compressed, for
    // operator inspection.
    assert!(quarantined.join("objects").join("b1.warc.gz").is_file());
    assert!(!quarantined.join("objects").join("b1.warc").exists());
}

/// A missing payload fails the whole seed: no partial object sets.
#[tokio::test]
async fn test_missing_payload_quarantines_whole_seed() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out");

    let present = gzip(b"WARC/1.0 present");
    let missing = gzip(b"WARC/1.0 missing");

    let seeds = [seed_json(
        911,
        "City Climate Blog",
        "University Archives",
        Some("Accession 42"),
        7312,
        31415,
    )];
    let warcs = [
        warc_json(&server, "a1.warc.gz", 911, 1615, 7312, &present, "2026-08-02T10:00:00Z"),
        warc_json(&server, "a2.warc.gz", 911, 1616, 7312, &missing, "2026-08-03T10:00:00Z"),
    ];
    mount_listing(&server, &seeds, &warcs).await;
    mount_payload(&server, "a1.warc.gz", &present).await;
    // a2.warc.gz is never mounted: the catalog answers 404.

    let config = run_config(&server, &output);
    let report = run_pipeline(&config).await.unwrap();

    assert_eq!(report.completed, 0);
    assert_eq!(report.quarantined, 1);
    assert_eq!(std::fs::read_dir(output.join("completed")).unwrap().count(), 0);

    let quarantined = output
        .join("errors")
        .join("warc-fetch")
        .join("ua-0042-202608-0001_City_Climate_Blog");
    assert!(quarantined.is_dir());

    let rows = read_log_rows(&report.run_log_path.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][9], "failed", "warc_fetch column");
    assert_eq!(rows[0][12], "false");
    assert_eq!(rows[0][13], "warc-fetch");
}

// ==================== Credential Handling ====================

/// When redaction cannot complete, the raw seed report must not exist
/// anywhere on disk, quarantine included.
#[tokio::test]
async fn test_failed_redaction_leaves_no_credentials_on_disk() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out");

    let payload = gzip(b"WARC/1.0 payload");
    let seeds = [seed_json(
        911,
        "City Climate Blog",
        "University Archives",
        Some("Accession 42"),
        7312,
        31415,
    )];
    let warcs = [warc_json(&server, "a1.warc.gz", 911, 1615, 7312, &payload, "2026-08-02T10:00:00Z")];
    mount_listing(&server, &seeds, &warcs).await;
    mount_payload(&server, "a1.warc.gz", &payload).await;
    // Ragged second row makes the report unredactable after a row that
    // already carries a credential value.
    mount_report(
        &server,
        "seed",
        911,
        "id,url,login_username,login_password\n911,https://city.example,alice,hunter2\n911,extra\n",
    )
    .await;
    mount_report(&server, "collection", 7312, "id,name\n7312,Municipal Web\n").await;

    let config = run_config(&server, &output);
    let report = run_pipeline(&config).await.unwrap();

    assert_eq!(report.quarantined, 1);
    let quarantined = output
        .join("errors")
        .join("schema")
        .join("ua-0042-202608-0001_City_Climate_Blog");
    assert!(quarantined.is_dir());

    // The collection report was already fetched and stays with the package;
    // the seed report never reached disk.
    assert!(quarantined.join("metadata").join("collection-7312.csv").is_file());
    assert!(!quarantined.join("metadata").join("seed-911.csv").exists());

    for file in tree_files(&output) {
        let bytes = std::fs::read(&file).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(
            !text.contains("hunter2") && !text.contains("alice"),
            "credential value leaked into {}",
            file.display()
        );
    }
}

// ==================== Watermark Behavior ====================

/// A scheduled run that enumerates nothing still advances the watermark.
#[tokio::test]
async fn test_scheduled_empty_run_advances_watermark() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out");

    let stored = "2026-08-01T00:00:00Z".parse().unwrap();
    let watermark = Watermark::new(output.join("state"));
    watermark.advance(stored).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/warcs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0, "files": []})))
        .mount(&server)
        .await;

    let mut config = run_config(&server, &output);
    config.start_date = None;
    config.end_date = None;
    let report = run_pipeline(&config).await.unwrap();

    assert_eq!(report.seeds_total, 0);
    assert!(report.watermark_advanced);
    let advanced = watermark.load().unwrap().unwrap();
    assert!(advanced > stored, "watermark must move to the window end");

    let summaries = read_log_rows(&output.join("logs").join("runs.csv"));
    assert_eq!(summaries[0][5], "0", "seeds_total column");
    assert_eq!(summaries[0][10], "true", "watermark_advanced column");
}

/// A failed enumeration leaves the watermark and the output tree untouched.
#[tokio::test]
async fn test_enumeration_failure_preserves_watermark_and_tree() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out");

    let stored = "2026-08-01T00:00:00Z".parse().unwrap();
    let watermark = Watermark::new(output.join("state"));
    watermark.advance(stored).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/warcs"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = run_config(&server, &output);
    config.start_date = None;
    config.end_date = None;
    let result = run_pipeline(&config).await;

    assert!(matches!(result, Err(RunError::Enumeration { .. })));
    assert_eq!(watermark.load().unwrap(), Some(stored));
    assert!(!output.join("completed").exists());
    assert!(!output.join("logs").exists());
}
