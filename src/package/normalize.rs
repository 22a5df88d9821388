//! Payload normalization: compressed WARCs are decompressed in place.
//!
//! Crawlers hand over payloads as multi-member gzip (`.warc.gz`). Packages
//! keep the decompressed form, so after fixity passes each compressed
//! payload is streamed through a gzip decoder into a temporary sibling,
//! the temporary is renamed into place, and only then is the compressed
//! original removed. A failure at any point leaves the original exactly as
//! downloaded; the temporary never survives an error.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::bufread::MultiGzDecoder;
use tracing::{debug, instrument};

use super::error::StageError;

/// Suffix that marks a payload as gzip-compressed.
const GZ_SUFFIX: &str = ".gz";

/// Decompresses every `.gz` payload under `objects_dir`, in place.
///
/// Payloads without a `.gz` suffix are left untouched. Runs on the blocking
/// pool; decompression is CPU- and disk-bound.
///
/// Returns the paths of the decompressed payloads.
///
/// # Errors
///
/// Returns [`StageError::Normalize`] on the first payload that fails. The
/// failing payload's compressed original is kept.
#[instrument(skip_all, fields(dir = %objects_dir.display()))]
pub async fn normalize_objects(objects_dir: &Path) -> Result<Vec<PathBuf>, StageError> {
    let dir = objects_dir.to_path_buf();
    tokio::task::spawn_blocking(move || normalize_dir_blocking(&dir))
        .await
        .map_err(|e| {
            StageError::normalize(
                "objects",
                io::Error::new(
                    io::ErrorKind::Interrupted,
                    format!("normalization task failed: {e}"),
                ),
            )
        })?
}

fn normalize_dir_blocking(objects_dir: &Path) -> Result<Vec<PathBuf>, StageError> {
    let entries =
        fs::read_dir(objects_dir).map_err(|e| StageError::normalize("objects", e))?;

    let mut sources = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StageError::normalize("objects", e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(GZ_SUFFIX) && name.len() > GZ_SUFFIX.len() {
            sources.push((entry.path(), name));
        } else {
            debug!(payload = %name, "not gzip-compressed, leaving as is");
        }
    }
    sources.sort();

    let mut normalized = Vec::with_capacity(sources.len());
    for (source, name) in sources {
        let target_name = name.strip_suffix(GZ_SUFFIX).unwrap_or(&name);
        let target = objects_dir.join(target_name);
        if target.exists() {
            return Err(StageError::normalize(
                name.clone(),
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("decompression target {target_name} already exists"),
                ),
            ));
        }

        let tmp = objects_dir.join(format!("{target_name}.tmp"));
        let result = decompress_file(&source, &tmp)
            .and_then(|bytes| fs::rename(&tmp, &target).map(|()| bytes))
            .and_then(|bytes| fs::remove_file(&source).map(|()| bytes));

        match result {
            Ok(bytes) => {
                debug!(payload = %name, bytes, "payload decompressed");
                normalized.push(target);
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(StageError::normalize(name, e));
            }
        }
    }

    Ok(normalized)
}

/// Streams `src` through a multi-member gzip decoder into `dest`.
fn decompress_file(src: &Path, dest: &Path) -> io::Result<u64> {
    let reader = BufReader::new(File::open(src)?);
    let mut decoder = MultiGzDecoder::new(reader);
    let mut writer = BufWriter::new(File::create(dest)?);
    let bytes = io::copy(&mut decoder, &mut writer)?;
    writer.into_inner().map_err(io::IntoInnerError::into_error)?;
    Ok(bytes)
}
