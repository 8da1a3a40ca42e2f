//! Transport capabilities used by the remote installers.
//!
//! An [`ArtifactSource`] is the transport handle an installer owns for the
//! duration of a single install step. A [`ConnectionFactory`] creates sources
//! for a managed server or for an arbitrary URL.
//!
//! ## Available Transports
//!
//! - [`http`] - `reqwest`-based transport (requires `http` feature)
//! - [`crate::mock`] - in-memory transport for tests

pub mod credentials;

#[cfg(feature = "http")]
pub mod http;

pub use credentials::{validate_url, Credentials, ResolvedCredentials, ServerConfig};

#[cfg(feature = "http")]
pub use http::{HttpArtifactSource, HttpConnectionFactory};

use crate::core::{OperatingSystemFamily, ScanJobError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use url::Url;

/// The version of an artifact as reported by its source.
///
/// `token` is compared for equality with the installed version marker; any
/// change means the artifact is re-downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    /// Opaque version token (server version, ETag, Last-Modified, ...).
    pub token: String,
    /// SHA-256 the source advertises for the archive, if any.
    pub sha256: Option<String>,
}

impl ArtifactVersion {
    /// Creates a version without an advertised checksum.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            sha256: None,
        }
    }

    /// Sets the advertised checksum.
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// A transport handle able to report and download the scanner archive.
///
/// # Implementation Notes
///
/// - Credential rejection must map to `ScanJobError::Authentication`.
/// - An unreachable endpoint must map to `ScanJobError::Network`.
/// - A missing artifact must map to `ScanJobError::Install`.
#[async_trait]
pub trait ArtifactSource: Send + Sync + Debug {
    /// Endpoint description used in logs and errors.
    fn endpoint(&self) -> &str;

    /// Asks the source which version it currently serves.
    async fn latest_version(&self) -> Result<ArtifactVersion, ScanJobError>;

    /// Downloads the archive for the given version.
    async fn fetch(&self, version: &ArtifactVersion) -> Result<Vec<u8>, ScanJobError>;
}

/// Creates transport handles.
pub trait ConnectionFactory: Send + Sync + Debug {
    /// Opens an authenticated connection to a managed server.
    ///
    /// Credential material is decoded here, so this fails with
    /// `ScanJobError::Encryption` when it cannot be read.
    fn connect_server(
        &self,
        server: &ServerConfig,
        os: OperatingSystemFamily,
    ) -> Result<Box<dyn ArtifactSource>, ScanJobError>;

    /// Opens a connection to an arbitrary archive URL.
    ///
    /// Requests are unauthenticated unless credentials are supplied.
    fn connect_url(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn ArtifactSource>, ScanJobError>;
}
