//! Download, verify, stage and promote flow shared by the remote installers.

use crate::core::{ArtifactHasher, InstalledArtifact, ScanJobError, ScanPaths};
use crate::install::archive::{archive_root, ArchiveExpander};
use crate::install::marker::VersionMarker;
use crate::install::InstallerConfig;
use crate::transport::{ArtifactSource, ArtifactVersion};

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DOWNLOAD_PREFIX: &str = "scanjob-download-";
pub(crate) const STAGING_PREFIX: &str = ".scanjob-staging-";
const PREVIOUS_PREFIX: &str = ".scanjob-previous-";
const ARCHIVE_FILE: &str = "scanner-archive.zip";

/// Installs a scanner archive obtained from an [`ArtifactSource`].
///
/// The source is owned exclusively and released with the installer.
#[derive(Debug)]
pub(crate) struct RemoteInstall {
    source: Box<dyn ArtifactSource>,
    expander: Arc<dyn ArchiveExpander>,
    config: InstallerConfig,
}

impl RemoteInstall {
    pub(crate) fn new(
        source: Box<dyn ArtifactSource>,
        expander: Arc<dyn ArchiveExpander>,
        config: InstallerConfig,
    ) -> Self {
        Self {
            source,
            expander,
            config,
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        self.source.endpoint()
    }

    pub(crate) async fn ensure_installed(
        &self,
        paths: &ScanPaths,
    ) -> Result<InstalledArtifact, ScanJobError> {
        let version = self.source.latest_version().await?;

        if let Some(marker) = VersionMarker::read(&paths.version_marker_path) {
            if marker.version == version.token && paths.executable_path.is_file() {
                tracing::info!(
                    endpoint = %self.source.endpoint(),
                    version = %marker.version,
                    "Scanner is up to date, skipping download"
                );
                return Ok(InstalledArtifact {
                    executable_path: paths.executable_path.clone(),
                    install_directory: paths.install_directory.clone(),
                    version: Some(marker.version),
                    sha256: Some(marker.sha256),
                    freshly_installed: false,
                });
            }
            tracing::info!(
                installed = %marker.version,
                available = %version.token,
                "Scanner version changed, updating"
            );
        }

        let archive = self.source.fetch(&version).await?;

        tracing::info!(
            endpoint = %self.source.endpoint(),
            version = %version.token,
            bytes = archive.len(),
            "Scanner archive downloaded"
        );

        let job = StagedInstall {
            paths: paths.clone(),
            version,
            source: self.source.endpoint().to_string(),
            config: self.config.clone(),
            expander: Arc::clone(&self.expander),
        };

        tokio::task::spawn_blocking(move || job.run(&archive))
            .await
            .map_err(|e| ScanJobError::install(format!("install task failed: {}", e)))?
    }
}

/// The blocking part of an install. Every temporary directory it creates is
/// a `TempDir`, so nothing is left behind on any exit path.
struct StagedInstall {
    paths: ScanPaths,
    version: ArtifactVersion,
    source: String,
    config: InstallerConfig,
    expander: Arc<dyn ArchiveExpander>,
}

impl StagedInstall {
    fn run(self, archive: &[u8]) -> Result<InstalledArtifact, ScanJobError> {
        let install_dir = &self.paths.install_directory;
        let parent = install_dir.parent().ok_or_else(|| {
            ScanJobError::install(format!(
                "install directory '{}' has no parent",
                install_dir.display()
            ))
        })?;
        std::fs::create_dir_all(parent).map_err(|e| io_error("create", parent, e))?;

        let download_dir = tempfile::Builder::new()
            .prefix(DOWNLOAD_PREFIX)
            .tempdir()
            .map_err(|e| ScanJobError::install(format!("failed to create download directory: {}", e)))?;
        let archive_path = download_dir.path().join(ARCHIVE_FILE);
        std::fs::write(&archive_path, archive).map_err(|e| io_error("write", &archive_path, e))?;

        let digest = ArtifactHasher::new().hash_file(&archive_path)?;
        if digest.size < self.config.min_artifact_size.max(1) {
            return Err(ScanJobError::install(format!(
                "downloaded archive is too small ({} bytes)",
                digest.size
            )));
        }
        let expected = self
            .config
            .expected_sha256
            .as_deref()
            .or(self.version.sha256.as_deref());
        if let Some(expected) = expected {
            if !digest.matches_sha256(expected) {
                return Err(ScanJobError::install(format!(
                    "checksum mismatch: expected {}, got {}",
                    expected, digest.sha256
                )));
            }
        }

        // Staging sits beside the install directory so promotion is a rename.
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| ScanJobError::install(format!("failed to create staging directory: {}", e)))?;

        self.expander.expand(&archive_path, staging.path())?;
        drop(download_dir);

        let relative_exe = self
            .paths
            .executable_within_install()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| ScanPaths::relative_executable(self.paths.os));
        let root = archive_root(staging.path(), &relative_exe)?;
        let staged_exe = root.join(&relative_exe);
        mark_executable(&staged_exe)?;

        let marker_name = self
            .paths
            .version_marker_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(crate::core::VERSION_MARKER_FILE));
        VersionMarker {
            version: self.version.token.clone(),
            sha256: digest.sha256.clone(),
            blake3: digest.blake3.clone(),
            source: self.source.clone(),
            installed_at: Utc::now(),
        }
        .write(&root.join(marker_name))?;

        ensure_replaceable(install_dir, &self.paths.version_marker_path)?;
        promote(&root, install_dir, parent)?;

        tracing::info!(
            install_directory = %install_dir.display(),
            version = %self.version.token,
            sha256 = %digest.sha256,
            "Scanner installed"
        );

        Ok(InstalledArtifact {
            executable_path: install_dir.join(&relative_exe),
            install_directory: install_dir.clone(),
            version: Some(self.version.token),
            sha256: Some(digest.sha256),
            freshly_installed: true,
        })
    }
}

/// Only an empty directory or one holding a previous install may be
/// replaced.
fn ensure_replaceable(install_dir: &Path, marker: &Path) -> Result<(), ScanJobError> {
    if !install_dir.exists() || marker.is_file() {
        return Ok(());
    }
    let mut entries = std::fs::read_dir(install_dir).map_err(|e| io_error("read", install_dir, e))?;
    if entries.next().is_none() {
        return Ok(());
    }
    Err(ScanJobError::install(format!(
        "refusing to replace '{}': it is not empty and holds no scanner version marker",
        install_dir.display()
    )))
}

/// Moves `staged` into place, keeping the previous install until the rename
/// succeeded.
fn promote(staged: &Path, install_dir: &Path, parent: &Path) -> Result<(), ScanJobError> {
    let previous = if install_dir.exists() {
        let aside = parent.join(format!("{}{}", PREVIOUS_PREFIX, uuid::Uuid::new_v4()));
        std::fs::rename(install_dir, &aside).map_err(|e| io_error("move aside", install_dir, e))?;
        Some(aside)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(staged, install_dir) {
        if let Some(ref aside) = previous {
            if let Err(restore) = std::fs::rename(aside, install_dir) {
                tracing::error!(
                    previous = %aside.display(),
                    error = %restore,
                    "Failed to restore previous scanner installation"
                );
            }
        }
        return Err(io_error("promote", install_dir, e));
    }

    if let Some(aside) = previous {
        if let Err(e) = std::fs::remove_dir_all(&aside) {
            tracing::warn!(
                path = %aside.display(),
                error = %e,
                "Failed to remove previous scanner installation"
            );
        }
    }
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<(), ScanJobError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)
        .map_err(|e| io_error("stat", path, e))?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms).map_err(|e| io_error("chmod", path, e))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<(), ScanJobError> {
    Ok(())
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> ScanJobError {
    ScanJobError::install(format!("failed to {} '{}': {}", action, path.display(), e))
}
