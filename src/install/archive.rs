//! Archive expansion.

use crate::core::ScanJobError;

use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// Expands a downloaded scanner archive into a directory.
///
/// Expansion is blocking; installers call it from `spawn_blocking`. On error
/// the destination may hold partial output, which the caller discards.
pub trait ArchiveExpander: Send + Sync + Debug {
    /// Expands `archive` into `destination`, which already exists.
    fn expand(&self, archive: &Path, destination: &Path) -> Result<(), ScanJobError>;
}

/// Expands zip archives with the `zip` crate.
///
/// Entry names that would escape the destination are rejected by the
/// extractor, and unix permissions stored in the archive are restored.
#[derive(Debug, Clone, Default)]
pub struct ZipExpander;

impl ZipExpander {
    /// Creates a new expander.
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExpander for ZipExpander {
    fn expand(&self, archive: &Path, destination: &Path) -> Result<(), ScanJobError> {
        let file = std::fs::File::open(archive).map_err(|e| {
            ScanJobError::install(format!("failed to open archive '{}': {}", archive.display(), e))
        })?;
        let mut zip = zip::ZipArchive::new(std::io::BufReader::new(file)).map_err(|e| {
            ScanJobError::install(format!("'{}' is not a valid zip archive: {}", archive.display(), e))
        })?;

        if zip.is_empty() {
            return Err(ScanJobError::install(format!(
                "archive '{}' contains no entries",
                archive.display()
            )));
        }

        let entries = zip.len();
        zip.extract(destination).map_err(|e| {
            ScanJobError::install(format!(
                "failed to extract '{}' into '{}': {}",
                archive.display(),
                destination.display(),
                e
            ))
        })?;

        tracing::debug!(
            archive = %archive.display(),
            destination = %destination.display(),
            entries,
            "Archive expanded"
        );
        Ok(())
    }
}

/// Returns the directory that should become the install directory.
///
/// The executable is looked up at `executable` relative to the extracted
/// tree first. Archives that wrap everything in a single top-level directory
/// are flattened to that directory.
pub fn archive_root(extracted: &Path, executable: &Path) -> Result<PathBuf, ScanJobError> {
    if extracted.join(executable).is_file() {
        return Ok(extracted.to_path_buf());
    }

    let entries: Vec<_> = std::fs::read_dir(extracted)
        .map_err(|e| {
            ScanJobError::install(format!("failed to read '{}': {}", extracted.display(), e))
        })?
        .filter_map(|e| e.ok())
        .collect();

    match entries.as_slice() {
        [only] if only.path().join(executable).is_file() => Ok(only.path()),
        _ => Err(ScanJobError::install(format!(
            "archive does not contain '{}'",
            executable.display()
        ))),
    }
}
