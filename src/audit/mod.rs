//! Structured audit logging.
//!
//! Installation attempts and finished scans are emitted as `tracing` events
//! on the `scanjob::audit` target, so any subscriber (JSON file,
//! OpenTelemetry, etc.) can route them separately from diagnostic logs.

mod events;

pub use events::{
    emit_install_finished, emit_install_started, emit_scan_completed, emit_scan_started,
    AuditEvent, InstallAuditEvent, ScanAuditEvent,
};
