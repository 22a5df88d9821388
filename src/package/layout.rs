//! On-disk shape of one package.
//!
//! A package is assembled under `staging/` as
//! `<identifier>_<title-slug>/{metadata,objects}/` and moves out with a
//! single rename: into `completed/` on success, or under `errors/<reason>/`
//! on failure. The rename is the commit point; a package directory is never
//! visible in `completed/` half-built.

use std::fs;
use std::path::{Path, PathBuf};

use super::error::StageError;
use crate::ident::PackageIdentifier;

/// Longest title slug kept in a directory name.
const MAX_SLUG_LEN: usize = 60;

/// Slug used when a seed has no usable title.
const FALLBACK_SLUG: &str = "untitled";

/// Paths for one package under assembly.
#[derive(Debug, Clone)]
pub struct PackageLayout {
    dir_name: String,
    staging_dir: PathBuf,
}

impl PackageLayout {
    /// Derives the layout for a package from its identifier and seed title.
    #[must_use]
    pub fn new(staging_root: &Path, identifier: &PackageIdentifier, title: &str) -> Self {
        let dir_name = format!("{identifier}_{}", title_slug(title));
        let staging_dir = staging_root.join(&dir_name);
        Self {
            dir_name,
            staging_dir,
        }
    }

    /// Returns the `<identifier>_<slug>` directory name.
    #[must_use]
    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    /// Returns the package root under `staging/`.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Returns the descriptive-reports directory.
    #[must_use]
    pub fn metadata_dir(&self) -> PathBuf {
        self.staging_dir.join("metadata")
    }

    /// Returns the WARC payload directory.
    #[must_use]
    pub fn objects_dir(&self) -> PathBuf {
        self.staging_dir.join("objects")
    }

    /// Creates the staging skeleton: package root plus both subdirectories.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Layout`] if a directory cannot be created.
    pub fn create_staging(&self) -> Result<(), StageError> {
        for dir in [self.metadata_dir(), self.objects_dir()] {
            fs::create_dir_all(&dir).map_err(|e| StageError::layout(dir.clone(), e))?;
        }
        Ok(())
    }

    /// Re-checks the layout invariants and renames the package into
    /// `completed/`.
    ///
    /// Returns the package's final path.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Layout`] if the staged tree is malformed, the
    /// destination already exists, or the rename fails.
    pub fn finalize(&self, completed_root: &Path) -> Result<PathBuf, StageError> {
        self.verify_staged_tree()?;

        fs::create_dir_all(completed_root)
            .map_err(|e| StageError::layout(completed_root.to_path_buf(), e))?;

        let dest = completed_root.join(&self.dir_name);
        // Identifiers never repeat, so an existing destination means the
        // invariant broke somewhere. Refuse rather than overwrite.
        if dest.exists() {
            return Err(StageError::layout(
                dest,
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "completed package with this name already exists",
                ),
            ));
        }

        fs::rename(&self.staging_dir, &dest).map_err(|e| StageError::layout(dest.clone(), e))?;
        Ok(dest)
    }

    /// Checks that the staged package holds exactly `metadata/` and
    /// `objects/`, with at least one payload in `objects/`.
    fn verify_staged_tree(&self) -> Result<(), StageError> {
        let layout_err = |detail: &str| {
            StageError::layout(
                self.staging_dir.clone(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, detail.to_string()),
            )
        };

        for required in ["metadata", "objects"] {
            if !self.staging_dir.join(required).is_dir() {
                return Err(layout_err(&format!("missing {required}/ directory")));
            }
        }

        let entries = fs::read_dir(&self.staging_dir)
            .map_err(|e| StageError::layout(self.staging_dir.clone(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StageError::layout(self.staging_dir.clone(), e))?;
            let name = entry.file_name();
            if name != "metadata" && name != "objects" {
                return Err(layout_err(&format!(
                    "unexpected entry {name:?} at package root"
                )));
            }
        }

        let mut objects = fs::read_dir(self.objects_dir())
            .map_err(|e| StageError::layout(self.objects_dir(), e))?;
        if objects.next().is_none() {
            return Err(layout_err("objects/ directory is empty"));
        }

        Ok(())
    }
}

/// Reduces a seed title to a directory-name-safe slug.
///
/// Unsafe characters and whitespace collapse to single underscores, the
/// result is capped at 60 characters, and an empty result falls back to
/// `untitled`.
#[must_use]
pub fn title_slug(title: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in title.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }

    let trimmed: String = out.trim_matches('_').chars().take(MAX_SLUG_LEN).collect();
    let trimmed = trimmed.trim_matches('_').to_string();
    if trimmed.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        trimmed
    }
}
