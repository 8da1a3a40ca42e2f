//! Filesystem locations used by the installer and the scan coordinator.

use crate::core::environment::{
    EnvironmentVariables, INSTALL_DIR_VAR, SCANNER_PATH_VAR, WORKING_DIR_VAR,
};
use crate::core::error::ScanJobError;
use crate::core::platform::OperatingSystemFamily;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name used under the per-user data directory.
const APP_DIR: &str = "scanjob";

/// Name of the install directory inside [`APP_DIR`].
const INSTALL_DIR_NAME: &str = "scanner";

/// Name of the version marker file inside the install directory.
pub const VERSION_MARKER_FILE: &str = "scanner-version.json";

/// Resolved locations for one orchestration.
///
/// Immutable after construction. Shared between the installer and the
/// coordinator behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPaths {
    /// Directory the scanner is installed into.
    pub install_directory: PathBuf,
    /// The scanner launcher.
    pub executable_path: PathBuf,
    /// Parent directory for per-scan output.
    pub working_directory: PathBuf,
    /// File recording the installed scanner version.
    pub version_marker_path: PathBuf,
    /// Operating system the paths were resolved for.
    pub os: OperatingSystemFamily,
}

impl ScanPaths {
    /// Path of the executable relative to the install directory.
    pub fn relative_executable(os: OperatingSystemFamily) -> PathBuf {
        Path::new("bin").join(os.executable_name())
    }

    /// Returns the executable path relative to the install directory, if it
    /// lives inside it.
    pub fn executable_within_install(&self) -> Option<&Path> {
        self.executable_path.strip_prefix(&self.install_directory).ok()
    }

    /// Returns the output directory for a single scan.
    pub fn scan_output_directory(&self, scan_id: &str) -> PathBuf {
        self.working_directory.join(scan_id)
    }
}

/// Computes [`ScanPaths`] from an OS family and environment overrides.
#[derive(Debug, Clone, Default)]
pub struct ScanPathsResolver;

impl ScanPathsResolver {
    /// Creates a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolves paths, creating the install and working directories if
    /// they are absent.
    ///
    /// Explicit overrides win over the OS-family defaults and are made
    /// absolute against the current directory. When only
    /// `SCANJOB_SCANNER_PATH` is given, the install directory is derived from
    /// the executable location and left untouched.
    ///
    /// # Errors
    ///
    /// Returns `ScanJobError::Configuration` when an override names something
    /// that is not a directory or a directory that cannot be created.
    pub fn resolve(
        &self,
        os: OperatingSystemFamily,
        env: &EnvironmentVariables,
    ) -> Result<ScanPaths, ScanJobError> {
        let install_override = absolute_override(env, INSTALL_DIR_VAR)?;
        let scanner_override = absolute_override(env, SCANNER_PATH_VAR)?;
        let working_override = absolute_override(env, WORKING_DIR_VAR)?;

        let (install_directory, executable_path, create_install) =
            match (install_override, scanner_override) {
                (Some(install), Some(exe)) => (install, exe, true),
                (Some(install), None) => {
                    let exe = install.join(ScanPaths::relative_executable(os));
                    (install, exe, true)
                }
                (None, Some(exe)) => (install_directory_of(&exe), exe, false),
                (None, None) => {
                    let install = default_data_directory(os, env)
                        .join(APP_DIR)
                        .join(INSTALL_DIR_NAME);
                    let exe = install.join(ScanPaths::relative_executable(os));
                    (install, exe, true)
                }
            };

        if create_install {
            ensure_directory(&install_directory, "install directory")?;
        }

        let working_directory =
            working_override.unwrap_or_else(|| std::env::temp_dir().join("scanjob-runs"));
        ensure_directory(&working_directory, "working directory")?;

        let version_marker_path = install_directory.join(VERSION_MARKER_FILE);

        tracing::debug!(
            os = %os,
            install_directory = %install_directory.display(),
            executable = %executable_path.display(),
            working_directory = %working_directory.display(),
            "Resolved scan paths"
        );

        Ok(ScanPaths {
            install_directory,
            executable_path,
            working_directory,
            version_marker_path,
            os,
        })
    }
}

/// Reads a path override, anchoring relative values at the current directory.
///
/// Scans run with their output directory as cwd, so a relative executable
/// would no longer resolve once the process is spawned.
fn absolute_override(
    env: &EnvironmentVariables,
    var: &str,
) -> Result<Option<PathBuf>, ScanJobError> {
    let Some(value) = env.get_non_blank(var) else {
        return Ok(None);
    };
    let path = PathBuf::from(value);
    if path.is_absolute() {
        return Ok(Some(path));
    }
    let cwd = std::env::current_dir().map_err(|e| {
        ScanJobError::configuration(format!(
            "cannot resolve relative {} '{}': {}",
            var,
            path.display(),
            e
        ))
    })?;
    Ok(Some(cwd.join(path)))
}

/// Per-user data directory for the family, falling back to the temp dir.
fn default_data_directory(os: OperatingSystemFamily, env: &EnvironmentVariables) -> PathBuf {
    let home = env.get_non_blank("HOME").map(PathBuf::from);
    let base = match os {
        OperatingSystemFamily::Windows => env
            .get_non_blank("LOCALAPPDATA")
            .map(PathBuf::from)
            .or_else(|| {
                env.get_non_blank("USERPROFILE")
                    .map(|p| PathBuf::from(p).join("AppData").join("Local"))
            }),
        OperatingSystemFamily::MacOs => {
            home.map(|h| h.join("Library").join("Application Support"))
        }
        OperatingSystemFamily::Linux | OperatingSystemFamily::Unknown => env
            .get_non_blank("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| home.map(|h| h.join(".local").join("share"))),
    };
    base.unwrap_or_else(std::env::temp_dir)
}

/// `<install>/bin/<exe>` maps back to `<install>`; anything else to the parent.
fn install_directory_of(executable: &Path) -> PathBuf {
    let parent = executable.parent().unwrap_or_else(|| Path::new("."));
    match parent.file_name() {
        Some(name) if name == "bin" => parent.parent().unwrap_or(parent).to_path_buf(),
        _ => parent.to_path_buf(),
    }
}

fn ensure_directory(path: &Path, what: &str) -> Result<(), ScanJobError> {
    if path.exists() && !path.is_dir() {
        return Err(ScanJobError::configuration(format!(
            "{} '{}' exists but is not a directory",
            what,
            path.display()
        )));
    }
    std::fs::create_dir_all(path).map_err(|e| {
        ScanJobError::configuration(format!(
            "failed to create {} '{}': {}",
            what,
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_win() {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        let work = temp.path().join("work");
        let env = EnvironmentVariables::empty()
            .with(INSTALL_DIR_VAR, install.to_string_lossy())
            .with(WORKING_DIR_VAR, work.to_string_lossy());

        let paths = ScanPathsResolver::new()
            .resolve(OperatingSystemFamily::Linux, &env)
            .unwrap();

        assert_eq!(paths.install_directory, install);
        assert_eq!(paths.executable_path, install.join("bin").join("scan.cli.sh"));
        assert_eq!(paths.version_marker_path, install.join(VERSION_MARKER_FILE));
        assert_eq!(paths.working_directory, work);
        assert!(install.is_dir());
        assert!(work.is_dir());
    }

    #[test]
    fn test_family_default_uses_data_home() {
        let temp = TempDir::new().unwrap();
        let env = EnvironmentVariables::empty()
            .with("XDG_DATA_HOME", temp.path().to_string_lossy())
            .with(WORKING_DIR_VAR, temp.path().join("work").to_string_lossy());

        let paths = ScanPathsResolver::new()
            .resolve(OperatingSystemFamily::Linux, &env)
            .unwrap();

        assert_eq!(
            paths.install_directory,
            temp.path().join("scanjob").join("scanner")
        );
    }

    #[test]
    fn test_windows_default_uses_local_app_data() {
        let temp = TempDir::new().unwrap();
        let env = EnvironmentVariables::empty()
            .with("LOCALAPPDATA", temp.path().to_string_lossy())
            .with(WORKING_DIR_VAR, temp.path().join("work").to_string_lossy());

        let paths = ScanPathsResolver::new()
            .resolve(OperatingSystemFamily::Windows, &env)
            .unwrap();

        assert!(paths.executable_path.ends_with("scan.cli.bat"));
        assert!(paths.install_directory.starts_with(temp.path()));
    }

    #[test]
    fn test_scanner_path_derives_install_directory() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("tool").join("bin").join("scan.cli.sh");
        let env = EnvironmentVariables::empty()
            .with(SCANNER_PATH_VAR, exe.to_string_lossy())
            .with(WORKING_DIR_VAR, temp.path().join("work").to_string_lossy());

        let paths = ScanPathsResolver::new()
            .resolve(OperatingSystemFamily::Linux, &env)
            .unwrap();

        assert_eq!(paths.executable_path, exe);
        assert_eq!(paths.install_directory, temp.path().join("tool"));
        // Derived install directories are not created.
        assert!(!temp.path().join("tool").exists());
    }

    #[test]
    fn test_relative_overrides_are_made_absolute() {
        let cwd = std::env::current_dir().unwrap();
        let temp = TempDir::new().unwrap();
        let env = EnvironmentVariables::empty()
            .with(SCANNER_PATH_VAR, "relative-tool/bin/scan.cli.sh")
            .with(WORKING_DIR_VAR, temp.path().join("work").to_string_lossy());

        let paths = ScanPathsResolver::new()
            .resolve(OperatingSystemFamily::Linux, &env)
            .unwrap();

        assert!(paths.executable_path.is_absolute());
        assert_eq!(
            paths.executable_path,
            cwd.join("relative-tool").join("bin").join("scan.cli.sh")
        );
        assert_eq!(paths.install_directory, cwd.join("relative-tool"));
        assert!(paths.version_marker_path.is_absolute());
    }

    #[test]
    fn test_bare_scanner_name_is_not_left_for_path_lookup() {
        let temp = TempDir::new().unwrap();
        let env = EnvironmentVariables::empty()
            .with(SCANNER_PATH_VAR, "scan.cli.sh")
            .with(WORKING_DIR_VAR, temp.path().join("work").to_string_lossy());

        let paths = ScanPathsResolver::new()
            .resolve(OperatingSystemFamily::Linux, &env)
            .unwrap();

        assert!(paths.executable_path.is_absolute());
        assert!(paths.executable_path.parent().is_some_and(|p| !p.as_os_str().is_empty()));
    }

    #[test]
    fn test_override_pointing_at_file_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let env = EnvironmentVariables::empty().with(INSTALL_DIR_VAR, file.to_string_lossy());

        let err = ScanPathsResolver::new()
            .resolve(OperatingSystemFamily::Linux, &env)
            .unwrap_err();

        assert!(matches!(err, ScanJobError::Configuration { .. }));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let env = EnvironmentVariables::empty()
            .with(INSTALL_DIR_VAR, temp.path().join("i").to_string_lossy())
            .with(WORKING_DIR_VAR, temp.path().join("w").to_string_lossy());
        let resolver = ScanPathsResolver::new();

        let first = resolver.resolve(OperatingSystemFamily::Linux, &env).unwrap();
        let second = resolver.resolve(OperatingSystemFamily::Linux, &env).unwrap();
        assert_eq!(first, second);
    }
}
