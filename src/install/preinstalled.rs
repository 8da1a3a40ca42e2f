//! Installer for scanners that are already on disk.

use crate::core::{InstalledArtifact, ScanJobError, ScanPaths};
use crate::install::marker::VersionMarker;
use crate::install::ArtifactInstaller;

use async_trait::async_trait;
use std::path::Path;

/// Verifies an existing scanner without touching the network.
///
/// Used when running offline or when the caller pointed at an existing
/// scanner. The executable must exist, be a regular file and be executable.
#[derive(Debug, Clone, Default)]
pub struct PreInstalledInstaller;

impl PreInstalledInstaller {
    /// Creates a new installer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ArtifactInstaller for PreInstalledInstaller {
    fn strategy(&self) -> &'static str {
        "pre_installed"
    }

    async fn ensure_installed(&self, paths: &ScanPaths) -> Result<InstalledArtifact, ScanJobError> {
        let exe = &paths.executable_path;
        let metadata = tokio::fs::metadata(exe).await.map_err(|e| {
            ScanJobError::install(format!("scanner '{}' is not available: {}", exe.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(ScanJobError::install(format!(
                "scanner '{}' is not a regular file",
                exe.display()
            )));
        }
        if !is_executable(exe, &metadata) {
            return Err(ScanJobError::install(format!(
                "scanner '{}' is not executable",
                exe.display()
            )));
        }

        let marker = VersionMarker::read(&paths.version_marker_path);
        tracing::info!(
            executable = %exe.display(),
            version = ?marker.as_ref().map(|m| m.version.as_str()),
            "Using pre-installed scanner"
        );

        Ok(InstalledArtifact {
            executable_path: exe.clone(),
            install_directory: paths.install_directory.clone(),
            version: marker.as_ref().map(|m| m.version.clone()),
            sha256: marker.map(|m| m.sha256),
            freshly_installed: false,
        })
    }
}

#[cfg(unix)]
fn is_executable(_path: &Path, metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(path: &Path, _metadata: &std::fs::Metadata) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "exe" | "bat" | "cmd" | "com"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EnvironmentVariables, OperatingSystemFamily, ScanPathsResolver};
    use crate::core::{SCANNER_PATH_VAR, WORKING_DIR_VAR};
    use tempfile::TempDir;

    fn paths_for(temp: &TempDir, exe: &Path) -> ScanPaths {
        let env = EnvironmentVariables::empty()
            .with(SCANNER_PATH_VAR, exe.to_string_lossy())
            .with(WORKING_DIR_VAR, temp.path().join("runs").to_string_lossy());
        ScanPathsResolver::new()
            .resolve(OperatingSystemFamily::detect(), &env)
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let temp = TempDir::new().unwrap();
        let paths = paths_for(&temp, &temp.path().join("bin").join("nope"));

        let err = PreInstalledInstaller::new()
            .ensure_installed(&paths)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanJobError::Install { .. }));
    }

    #[tokio::test]
    async fn test_directory_is_rejected() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("scanner-dir");
        std::fs::create_dir(&dir).unwrap();
        let paths = paths_for(&temp, &dir);

        let err = PreInstalledInstaller::new()
            .ensure_installed(&paths)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a regular file"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_executable_file_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("scan.cli.sh");
        std::fs::write(&exe, b"#!/bin/sh\necho hi\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o644)).unwrap();
        let paths = paths_for(&temp, &exe);

        let err = PreInstalledInstaller::new()
            .ensure_installed(&paths)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanJobError::Install { .. }));
        assert!(err.to_string().contains("not executable"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executable_file_is_accepted() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("scan.cli.sh");
        std::fs::write(&exe, b"#!/bin/sh\necho hi\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        let paths = paths_for(&temp, &exe);

        let artifact = PreInstalledInstaller::new()
            .ensure_installed(&paths)
            .await
            .unwrap();
        assert_eq!(artifact.executable_path, exe);
        assert!(!artifact.freshly_installed);
        assert_eq!(artifact.version, None);
    }
}
