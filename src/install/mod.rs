//! Scanner installers.
//!
//! Every installer implements [`ArtifactInstaller`]: make sure the scanner at
//! `ScanPaths::executable_path` is present and current.
//!
//! ## Available Installers
//!
//! - [`ManagedInstaller`] - downloads from an authenticated scanner server
//! - [`UserUrlInstaller`] - downloads from a caller-supplied URL
//! - [`PreInstalledInstaller`] - verifies an existing installation, no network
//!
//! The remote installers download into a scoped temp directory, extract into
//! a staging directory beside the install directory and promote it with a
//! rename, so a failed install never leaves partial state behind.

mod archive;
mod managed;
mod marker;
mod preinstalled;
mod remote;
mod user_url;

pub use archive::{archive_root, ArchiveExpander, ZipExpander};
pub use managed::ManagedInstaller;
pub use marker::VersionMarker;
pub use preinstalled::PreInstalledInstaller;
pub use user_url::UserUrlInstaller;

use crate::core::{InstalledArtifact, ScanJobError, ScanPaths};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Ensures the scanner is installed and up to date.
///
/// # Implementation Notes
///
/// - Calling `ensure_installed` again on a current installation must not
///   download anything.
/// - Failures must not leave partial state in the install directory.
#[async_trait]
pub trait ArtifactInstaller: Send + Sync + Debug {
    /// Stable name of the install strategy, used in logs.
    fn strategy(&self) -> &'static str;

    /// Installs or verifies the scanner described by `paths`.
    async fn ensure_installed(&self, paths: &ScanPaths) -> Result<InstalledArtifact, ScanJobError>;
}

/// A boxed installer for type-erased storage.
pub type BoxedInstaller = Box<dyn ArtifactInstaller>;

/// Verification settings for downloaded archives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Smallest acceptable archive size in bytes (at least 1).
    pub min_artifact_size: u64,
    /// Expected SHA-256 of the archive. Overrides any checksum the source
    /// advertises.
    pub expected_sha256: Option<String>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            min_artifact_size: 1,
            expected_sha256: None,
        }
    }
}

impl InstallerConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum archive size.
    pub fn with_min_artifact_size(mut self, size: u64) -> Self {
        self.min_artifact_size = size.max(1);
        self
    }

    /// Sets the expected archive checksum.
    pub fn with_expected_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.expected_sha256 = Some(sha256.into());
        self
    }
}
