//! Host operating system detection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The operating system family the scanner runs on.
///
/// Selects the archive flavour, executable name and default directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingSystemFamily {
    /// Linux and other unix-likes with the same layout.
    Linux,
    /// macOS.
    MacOs,
    /// Windows.
    Windows,
    /// Anything else. Treated like Linux for path conventions.
    Unknown,
}

impl OperatingSystemFamily {
    /// Detects the family of the current host. Never fails.
    pub fn detect() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    /// Maps an OS name in the style of `std::env::consts::OS`.
    pub fn from_os_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "linux" => Self::Linux,
            "macos" | "mac" | "darwin" | "osx" => Self::MacOs,
            "windows" | "win32" | "win64" => Self::Windows,
            _ => Self::Unknown,
        }
    }

    /// File name of the scanner launcher for this family.
    pub fn executable_name(&self) -> &'static str {
        match self {
            Self::Windows => "scan.cli.bat",
            _ => "scan.cli.sh",
        }
    }

    /// File name of the scanner archive a managed server publishes.
    pub fn archive_name(&self) -> &'static str {
        match self {
            Self::MacOs => "scan.cli-macosx.zip",
            Self::Windows => "scan.cli-windows.zip",
            _ => "scan.cli.zip",
        }
    }

    /// Returns `true` for Windows hosts.
    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }
}

impl fmt::Display for OperatingSystemFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::MacOs => write!(f, "macos"),
            Self::Windows => write!(f, "windows"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
