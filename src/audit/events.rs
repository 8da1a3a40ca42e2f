//! Audit event types and emission functions.

use crate::core::{InstalledArtifact, ScanJobError, ScanOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Base trait for audit events.
pub trait AuditEvent: Serialize {
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;

    /// Returns the timestamp of the event.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Audit record of an installation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallAuditEvent {
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Installer strategy name.
    pub strategy: String,

    /// Whether the installation is usable.
    pub success: bool,

    /// Installed executable, on success.
    pub executable_path: Option<String>,

    /// Installed version token, if known.
    pub version: Option<String>,

    /// SHA-256 of the installed archive, if known.
    pub sha256: Option<String>,

    /// Whether this attempt downloaded a new archive.
    pub freshly_installed: bool,

    /// Error category, on failure.
    pub error_kind: Option<String>,

    /// Error message, on failure.
    pub error: Option<String>,
}

impl InstallAuditEvent {
    /// Builds the record for a finished installation attempt.
    pub fn from_result(strategy: &str, result: &Result<InstalledArtifact, ScanJobError>) -> Self {
        let mut event = Self {
            timestamp: Utc::now(),
            strategy: strategy.to_string(),
            success: result.is_ok(),
            executable_path: None,
            version: None,
            sha256: None,
            freshly_installed: false,
            error_kind: None,
            error: None,
        };
        match result {
            Ok(artifact) => {
                event.executable_path = Some(artifact.executable_path.display().to_string());
                event.version = artifact.version.clone();
                event.sha256 = artifact.sha256.clone();
                event.freshly_installed = artifact.freshly_installed;
            }
            Err(e) => {
                event.error_kind = Some(e.kind().to_string());
                event.error = Some(e.to_string());
            }
        }
        event
    }
}

impl AuditEvent for InstallAuditEvent {
    fn event_type(&self) -> &'static str {
        if self.success {
            "install_completed"
        } else {
            "install_failed"
        }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Audit record of a finished scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanAuditEvent {
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Unique scan ID.
    pub scan_id: String,

    /// Scan target name.
    pub target: String,

    /// Final status.
    pub status: String,

    /// Process exit code, if any.
    pub exit_code: Option<i32>,

    /// Scan duration in milliseconds.
    pub duration_ms: u64,

    /// Directory holding the scan's logs, if any.
    pub output_directory: Option<String>,
}

impl From<&ScanOutcome> for ScanAuditEvent {
    fn from(outcome: &ScanOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            scan_id: outcome.scan_id.clone(),
            target: outcome.target.clone(),
            status: outcome.status.as_str().to_string(),
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration.as_millis() as u64,
            output_directory: outcome
                .output_directory
                .as_ref()
                .map(|p| p.display().to_string()),
        }
    }
}

impl AuditEvent for ScanAuditEvent {
    fn event_type(&self) -> &'static str {
        "scan_completed"
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Emits an audit event for an installation starting.
pub fn emit_install_started(strategy: &str, install_directory: &Path) {
    tracing::info!(
        target: "scanjob::audit",
        event_type = "install_started",
        strategy = %strategy,
        install_directory = %install_directory.display(),
        "Scanner installation started"
    );
}

/// Emits an audit event for a finished installation attempt.
pub fn emit_install_finished(
    strategy: &str,
    result: &Result<InstalledArtifact, ScanJobError>,
    duration: Duration,
) {
    let event = InstallAuditEvent::from_result(strategy, result);
    if event.success {
        tracing::info!(
            target: "scanjob::audit",
            event_type = event.event_type(),
            strategy = %event.strategy,
            executable = ?event.executable_path,
            version = ?event.version,
            sha256 = ?event.sha256,
            freshly_installed = event.freshly_installed,
            duration_ms = duration.as_millis() as u64,
            "Scanner installation completed"
        );
    } else {
        tracing::warn!(
            target: "scanjob::audit",
            event_type = event.event_type(),
            strategy = %event.strategy,
            error_kind = ?event.error_kind,
            error = ?event.error,
            duration_ms = duration.as_millis() as u64,
            "Scanner installation failed"
        );
    }
}

/// Emits an audit event for a scan process starting.
pub fn emit_scan_started(scan_id: &str, target: &str, executable: &Path) {
    tracing::info!(
        target: "scanjob::audit",
        event_type = "scan_started",
        scan_id = %scan_id,
        scan_target = %target,
        executable = %executable.display(),
        "Scan started"
    );
}

/// Emits an audit event for a completed scan.
pub fn emit_scan_completed(outcome: &ScanOutcome) {
    let event = ScanAuditEvent::from(outcome);
    tracing::info!(
        target: "scanjob::audit",
        event_type = event.event_type(),
        scan_id = %event.scan_id,
        scan_target = %event.target,
        status = %event.status,
        exit_code = ?event.exit_code,
        duration_ms = event.duration_ms,
        output_directory = ?event.output_directory,
        "Scan completed"
    );
}
