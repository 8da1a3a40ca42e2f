//! Version marker stored next to an installed scanner.

use crate::core::ScanJobError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Records which archive an installation came from.
///
/// Remote installers skip the download when the source reports the same
/// `version` token as the marker and the executable is still present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarker {
    /// Version token reported by the source.
    pub version: String,
    /// SHA-256 of the installed archive.
    pub sha256: String,
    /// BLAKE3 of the installed archive.
    pub blake3: String,
    /// Endpoint the archive was downloaded from.
    pub source: String,
    /// When the installation was promoted.
    pub installed_at: DateTime<Utc>,
}

impl VersionMarker {
    /// Reads a marker. Missing or unreadable markers yield `None`.
    pub fn read(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(marker) => Some(marker),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable version marker"
                );
                None
            }
        }
    }

    /// Writes the marker as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<(), ScanJobError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            ScanJobError::install(format!("failed to serialize version marker: {}", e))
        })?;
        std::fs::write(path, content).map_err(|e| {
            ScanJobError::install(format!(
                "failed to write version marker '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
