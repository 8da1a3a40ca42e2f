//! Core types used throughout the scanjob library.
//!
//! This module defines scan targets, per-scan outcomes and the description
//! of an installed scanner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One invocation of the scanner.
///
/// # Examples
///
/// ```rust
/// use scanjob::core::ScanTarget;
/// use std::time::Duration;
///
/// let target = ScanTarget::new("frontend")
///     .with_argument("--source")
///     .with_argument("/src/frontend")
///     .with_env("SCAN_MODE", "full")
///     .with_timeout(Duration::from_secs(600));
/// assert_eq!(target.arguments.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    /// Human-readable name, used in logs and outcomes.
    pub name: String,
    /// Arguments passed to the scanner.
    pub arguments: Vec<String>,
    /// Extra environment variables for the scanner process.
    pub environment: BTreeMap<String, String>,
    /// Per-target timeout overriding the coordinator default.
    pub timeout: Option<Duration>,
}

impl ScanTarget {
    /// Creates a target with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            environment: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Appends one argument.
    pub fn with_argument(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the scanner process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Sets the timeout for this target.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How a single scan ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanStatus {
    /// The scanner exited with status 0.
    Succeeded,
    /// The scanner exited with a non-zero status.
    Failed,
    /// The scanner process could not be started.
    LaunchFailed {
        /// Why the launch failed.
        reason: String,
    },
    /// The scanner was killed after exceeding its timeout.
    TimedOut,
    /// The scan was cancelled through its handle.
    Cancelled,
    /// The scan never ran, usually because installation failed.
    NotStarted {
        /// Why the scan did not run.
        reason: String,
    },
}

impl ScanStatus {
    /// Returns `true` for a zero exit status.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Short name used in logs and audit events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::LaunchFailed { .. } => "launch_failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::NotStarted { .. } => "not_started",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of one scan invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Unique identifier for this scan.
    pub scan_id: String,
    /// Name of the target that was scanned.
    pub target: String,
    /// How the scan ended.
    pub status: ScanStatus,
    /// Process exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Directory holding this scan's logs, if one was created.
    pub output_directory: Option<PathBuf>,
    /// When the scan was dispatched.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time spent running the process.
    pub duration: Duration,
}

impl ScanOutcome {
    /// Creates an outcome for a scan that never reached the process stage.
    pub fn not_started(
        scan_id: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            scan_id: scan_id.into(),
            target: target.into(),
            status: ScanStatus::NotStarted {
                reason: reason.into(),
            },
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            output_directory: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Returns `true` if the scanner exited with status 0.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// A scanner installation that passed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledArtifact {
    /// The verified scanner launcher.
    pub executable_path: PathBuf,
    /// Directory holding the installation.
    pub install_directory: PathBuf,
    /// Version token recorded for the installation, if known.
    pub version: Option<String>,
    /// SHA-256 of the archive the installation came from, if known.
    pub sha256: Option<String>,
    /// `true` if this call downloaded and promoted a new installation.
    pub freshly_installed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_builder() {
        let target = ScanTarget::new("api")
            .with_arguments(["--source", "/src/api"])
            .with_env("A", "1");

        assert_eq!(target.arguments, vec!["--source", "/src/api"]);
        assert_eq!(target.environment.get("A").map(String::as_str), Some("1"));
        assert_eq!(target.timeout, None);
    }

    #[test]
    fn test_not_started_outcome() {
        let outcome = ScanOutcome::not_started("id-1", "api", "install failed");
        assert!(!outcome.is_success());
        assert_eq!(outcome.status.as_str(), "not_started");
        assert_eq!(outcome.exit_code, None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ScanStatus::LaunchFailed {
            reason: "missing".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"launch_failed\""));
    }
}
