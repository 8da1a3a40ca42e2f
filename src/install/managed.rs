//! Installer backed by an authenticated scanner server.

use crate::core::{InstalledArtifact, ScanJobError, ScanPaths};
use crate::install::archive::{ArchiveExpander, ZipExpander};
use crate::install::remote::RemoteInstall;
use crate::install::{ArtifactInstaller, InstallerConfig};
use crate::transport::ArtifactSource;

use async_trait::async_trait;
use std::sync::Arc;

/// Downloads the scanner from the server it will report to.
///
/// This is the usual setup: the server publishes the scanner build that
/// matches its own version, so upgrading the server upgrades the scanner.
///
/// # Example
///
/// ```rust,ignore
/// use scanjob::install::ManagedInstaller;
/// use scanjob::transport::{ConnectionFactory, Credentials, HttpConnectionFactory, ServerConfig};
/// use scanjob::core::OperatingSystemFamily;
///
/// let server = ServerConfig::parse("https://scan.example.com", Credentials::api_token("..."))?;
/// let source = HttpConnectionFactory::new().connect_server(&server, OperatingSystemFamily::detect())?;
/// let installer = ManagedInstaller::new(source);
/// ```
#[derive(Debug)]
pub struct ManagedInstaller {
    inner: RemoteInstall,
}

impl ManagedInstaller {
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

    /// Returns the server endpoint.
    pub fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }
}

#[async_trait]
impl ArtifactInstaller for ManagedInstaller {
    fn strategy(&self) -> &'static str {
        "managed"
    }

    async fn ensure_installed(&self, paths: &ScanPaths) -> Result<InstalledArtifact, ScanJobError> {
        self.inner.ensure_installed(paths).await
    }
}
