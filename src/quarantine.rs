//! Quarantine for packages that fail a stage.
//!
//! A failed package is moved out of `staging/` into
//! `errors/<reason-code>/<package-name>/` with a single rename, so it is
//! never half-moved and never left to be swept up with stale staging data.
//! A `quarantine.txt` note inside the package records what went wrong.
//!
//! Reason directories are created on demand and creation is idempotent, so
//! two workers hitting the same reason code for the first time cannot race
//! each other. A same-name entry already present under the reason directory
//! is a collision: identifiers never repeat, so this cannot happen in a
//! healthy deployment, and the entry is reported for an operator to untangle
//! rather than overwritten.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::package::ReasonCode;

/// Name of the note file written into each quarantined package.
pub const NOTE_FILENAME: &str = "quarantine.txt";

/// Error from a quarantine operation.
#[derive(Debug, Error)]
pub enum QuarantineError {
    /// An entry with the same name is already quarantined under this reason.
    #[error("quarantine entry already exists: {}", .dest.display())]
    EntryExists { dest: PathBuf },

    /// Filesystem failure while isolating.
    #[error("quarantine failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl QuarantineError {
    /// Creates an `Io` error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for the name-collision case that needs an operator.
    #[must_use]
    pub fn is_collision(&self) -> bool {
        matches!(self, Self::EntryExists { .. })
    }
}

/// Moves failed packages under the `errors/` tree.
#[derive(Debug, Clone)]
pub struct Quarantine {
    errors_root: PathBuf,
}

impl Quarantine {
    /// Creates a manager rooted at the run's `errors/` directory.
    pub fn new(errors_root: impl Into<PathBuf>) -> Self {
        Self {
            errors_root: errors_root.into(),
        }
    }

    /// Returns the directory for one reason code.
    #[must_use]
    pub fn reason_dir(&self, reason: ReasonCode) -> PathBuf {
        self.errors_root.join(reason.as_str())
    }

    /// Isolates a failed package directory under `errors/<reason>/`.
    ///
    /// Writes the reason note into the package, then moves the whole
    /// directory with one rename. Returns the package's new path.
    ///
    /// # Errors
    ///
    /// Returns [`QuarantineError::EntryExists`] if the destination name is
    /// already taken (never overwritten), or [`QuarantineError::Io`] if a
    /// directory cannot be created or the rename fails.
    #[instrument(skip(self, detail), fields(package = %package_dir.display()))]
    pub fn isolate(
        &self,
        reason: ReasonCode,
        package_dir: &Path,
        detail: &str,
    ) -> Result<PathBuf, QuarantineError> {
        let reason_dir = self.reason_dir(reason);
        fs::create_dir_all(&reason_dir).map_err(|e| QuarantineError::io(&reason_dir, e))?;

        let name = package_dir.file_name().ok_or_else(|| {
            QuarantineError::io(
                package_dir,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "package path has no final component",
                ),
            )
        })?;
        let dest = reason_dir.join(name);
        if dest.exists() {
            return Err(QuarantineError::EntryExists { dest });
        }

        // Written before the move so the note travels with the package.
        // Isolation itself must not fail over a note; the move is the part
        // that keeps failed data out of staging.
        if let Err(e) = write_note(package_dir, reason, detail) {
            warn!(error = %e, "could not write quarantine note");
        }

        fs::rename(package_dir, &dest).map_err(|e| QuarantineError::io(&dest, e))?;

        info!(
            reason = %reason,
            dest = %dest.display(),
            "package quarantined"
        );
        Ok(dest)
    }

    /// Records a failure for a package that never got a directory.
    ///
    /// Used when assignment- or staging-time failures leave nothing to move:
    /// a labeled directory holding only the reason note is created under
    /// `errors/<reason>/`.
    ///
    /// # Errors
    ///
    /// Returns [`QuarantineError::EntryExists`] if the label is already
    /// taken, or [`QuarantineError::Io`] on filesystem failure.
    #[instrument(skip(self, detail))]
    pub fn isolate_unbuilt(
        &self,
        reason: ReasonCode,
        label: &str,
        detail: &str,
    ) -> Result<PathBuf, QuarantineError> {
        let dest = self.reason_dir(reason).join(label);
        if dest.exists() {
            return Err(QuarantineError::EntryExists { dest });
        }
        fs::create_dir_all(&dest).map_err(|e| QuarantineError::io(&dest, e))?;
        write_note(&dest, reason, detail).map_err(|e| QuarantineError::io(&dest, e))?;

        info!(reason = %reason, dest = %dest.display(), "failure recorded");
        Ok(dest)
    }
}

/// Writes the reason note into a package directory.
fn write_note(dir: &Path, reason: ReasonCode, detail: &str) -> std::io::Result<()> {
    let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let body = format!("reason: {reason}\ntime: {stamp}\ndetail: {detail}\n");
    fs::write(dir.join(NOTE_FILENAME), body)
}
