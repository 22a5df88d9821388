//! Run watermark: where the last successful enumeration left off.
//!
//! `state/watermark` holds a single RFC 3339 UTC timestamp, the end bound
//! of the last run whose catalog enumeration succeeded. The next scheduled
//! run starts there. The file is replaced atomically (write a sibling,
//! rename over), so a crash mid-write leaves the old watermark intact and
//! the worst case is re-packaging a window that was already handled.
//!
//! A watermark that exists but does not parse is an error, not a default:
//! silently starting from epoch would re-package everything, and silently
//! starting from now would drop crawls.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the watermark file inside the state directory.
const WATERMARK_FILENAME: &str = "watermark";

/// Error from watermark operations.
#[derive(Debug, Error)]
pub enum WatermarkError {
    /// Filesystem failure.
    #[error("watermark I/O failure at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not hold an RFC 3339 timestamp.
    #[error("watermark at {} is not a valid RFC 3339 timestamp: {content:?}", .path.display())]
    Corrupt { path: PathBuf, content: String },
}

impl WatermarkError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reads and advances the watermark file.
#[derive(Debug, Clone)]
pub struct Watermark {
    path: PathBuf,
}

impl Watermark {
    /// Creates a handle for the watermark inside `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: state_dir.into().join(WATERMARK_FILENAME),
        }
    }

    /// Returns the watermark's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored timestamp. `None` means no run has recorded one yet.
    ///
    /// # Errors
    ///
    /// Returns [`WatermarkError::Corrupt`] if the file holds anything but a
    /// single RFC 3339 timestamp, or [`WatermarkError::Io`] if it cannot be
    /// read.
    pub fn load(&self) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no watermark yet");
                return Ok(None);
            }
            Err(e) => return Err(WatermarkError::io(&self.path, e)),
        };

        let trimmed = content.trim();
        let parsed =
            DateTime::parse_from_rfc3339(trimmed).map_err(|_| WatermarkError::Corrupt {
                path: self.path.clone(),
                content: trimmed.to_string(),
            })?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    /// Replaces the watermark with `to`, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`WatermarkError::Io`] if the write or rename fails.
    pub fn advance(&self, to: DateTime<Utc>) -> Result<(), WatermarkError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| WatermarkError::io(dir, e))?;
        }

        let tmp = self.path.with_extension("tmp");
        let stamp = to.to_rfc3339_opts(SecondsFormat::Secs, true);
        std::fs::write(&tmp, format!("{stamp}\n")).map_err(|e| WatermarkError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| WatermarkError::io(&self.path, e))?;

        info!(watermark = %stamp, "watermark advanced");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_is_none() {
        let temp = TempDir::new().unwrap();
        let watermark = Watermark::new(temp.path().join("state"));
        assert_eq!(watermark.load().unwrap(), None);
    }

    #[test]
    fn test_advance_then_load_round_trips() {
        let temp = TempDir::new().unwrap();
        let watermark = Watermark::new(temp.path().join("state"));
        let instant = Utc.with_ymd_and_hms(2026, 8, 23, 0, 0, 0).unwrap();

        watermark.advance(instant).unwrap();
        assert_eq!(watermark.load().unwrap(), Some(instant));
    }

    #[test]
    fn test_advance_replaces_previous_value() {
        let temp = TempDir::new().unwrap();
        let watermark = Watermark::new(temp.path().join("state"));
        let first = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 8, 23, 0, 0, 0).unwrap();

        watermark.advance(first).unwrap();
        watermark.advance(second).unwrap();
        assert_eq!(watermark.load().unwrap(), Some(second));
    }

    #[test]
    fn test_advance_leaves_no_tmp_file() {
        let temp = TempDir::new().unwrap();
        let state_dir = temp.path().join("state");
        let watermark = Watermark::new(&state_dir);
        watermark
            .advance(Utc.with_ymd_and_hms(2026, 8, 23, 0, 0, 0).unwrap())
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(&state_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["watermark"]);
    }

    #[test]
    fn test_corrupt_content_is_an_error_not_a_default() {
        let temp = TempDir::new().unwrap();
        let state_dir = temp.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("watermark"), "last tuesday\n").unwrap();

        let watermark = Watermark::new(&state_dir);
        match watermark.load() {
            Err(WatermarkError::Corrupt { content, .. }) => {
                assert_eq!(content, "last tuesday");
            }
            other => panic!("expected Corrupt, got: {other:?}"),
        }
    }

    #[test]
    fn test_offset_timestamps_are_readable() {
        let temp = TempDir::new().unwrap();
        let state_dir = temp.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("watermark"), "2026-08-23T02:00:00+02:00\n").unwrap();

        let watermark = Watermark::new(&state_dir);
        assert_eq!(
            watermark.load().unwrap(),
            Some(Utc.with_ymd_and_hms(2026, 8, 23, 0, 0, 0).unwrap())
        );
    }
}
