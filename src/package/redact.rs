//! Credential scrubbing for seed reports.
//!
//! Seed reports from the catalog carry the crawler's site credentials in
//! `login_username` and `login_password` columns. Those values must never
//! reach a finished package, so the whole column is overwritten before the
//! report is persisted. Columns are found by header name, case-insensitively;
//! a report without both columns fails the schema check and the package is
//! quarantined rather than written with credentials intact.

use super::error::StageError;

/// Replacement written into every credential cell.
pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Header names of the columns to scrub, matched case-insensitively.
const CREDENTIAL_COLUMNS: [&str; 2] = ["login_username", "login_password"];

/// Redacts both credential columns of a CSV seed report.
///
/// Every cell of each credential column is overwritten, whatever it held,
/// which also makes the operation idempotent. `report_name` only labels
/// errors.
///
/// # Errors
///
/// Returns [`StageError::Schema`] if either credential column is missing,
/// or if the CSV cannot be parsed.
pub fn redact_credentials(report_name: &str, raw: &[u8]) -> Result<Vec<u8>, StageError> {
    let mut reader = csv::Reader::from_reader(raw);
    let headers = reader
        .headers()
        .map_err(|e| StageError::schema(report_name, format!("unreadable CSV header: {e}")))?
        .clone();

    let mut targets = Vec::with_capacity(CREDENTIAL_COLUMNS.len());
    for wanted in CREDENTIAL_COLUMNS {
        let index = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| StageError::schema(report_name, format!("missing {wanted} column")))?;
        targets.push(index);
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&headers)
        .map_err(|e| StageError::schema(report_name, format!("could not rewrite header: {e}")))?;

    for record in reader.records() {
        let record = record
            .map_err(|e| StageError::schema(report_name, format!("malformed CSV row: {e}")))?;
        let row: Vec<&str> = record
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                if targets.contains(&i) {
                    REDACTED_PLACEHOLDER
                } else {
                    cell
                }
            })
            .collect();
        writer
            .write_record(&row)
            .map_err(|e| StageError::schema(report_name, format!("could not rewrite row: {e}")))?;
    }

    writer
        .into_inner()
        .map_err(|e| StageError::schema(report_name, format!("could not finish CSV: {e}")))
}
