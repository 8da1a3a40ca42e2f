//! Installer backed by a caller-supplied archive URL.

use crate::core::{InstalledArtifact, ScanJobError, ScanPaths};
use crate::install::archive::{ArchiveExpander, ZipExpander};
use crate::install::remote::RemoteInstall;
use crate::install::{ArtifactInstaller, InstallerConfig};
use crate::transport::ArtifactSource;

use async_trait::async_trait;
use std::sync::Arc;

/// Downloads the scanner from an arbitrary URL.
///
/// Follows the same verify, stage and promote flow as
/// [`ManagedInstaller`](crate::install::ManagedInstaller). The URL is
/// validated when the transport is created, not here.
#[derive(Debug)]
pub struct UserUrlInstaller {
    inner: RemoteInstall,
}

impl UserUrlInstaller {
    /// Creates an installer that expands zip archives.
    pub fn new(source: Box<dyn ArtifactSource>) -> Self {
        Self::with_parts(source, Arc::new(ZipExpander::new()), InstallerConfig::default())
    }

    /// Creates an installer with a custom expander and configuration.
    pub fn with_parts(
        source: Box<dyn ArtifactSource>,
        expander: Arc<dyn ArchiveExpander>,
        config: InstallerConfig,
    ) -> Self {
        Self {
            inner: RemoteInstall::new(source, expander, config),
        }
    }

    /// Returns the archive URL.
    pub fn url(&self) -> &str {
        self.inner.endpoint()
    }
}

#[async_trait]
impl ArtifactInstaller for UserUrlInstaller {
    fn strategy(&self) -> &'static str {
        "user_url"
    }

    async fn ensure_installed(&self, paths: &ScanPaths) -> Result<InstalledArtifact, ScanJobError> {
        self.inner.ensure_installed(paths).await
    }
}
