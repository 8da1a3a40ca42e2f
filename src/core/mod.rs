//! Core types for the scanjob library.
//!
//! - [`platform`] - Host operating system detection
//! - [`environment`] - Environment variable overrides
//! - [`paths`] - Install, executable and working directory resolution
//! - [`types`] - Scan targets, outcomes and installed artifacts
//! - [`hasher`] - Artifact digests
//! - [`error`] - Structured error types

pub mod environment;
pub mod error;
pub mod hasher;
pub mod paths;
pub mod platform;
pub mod types;

pub use environment::{EnvironmentVariables, INSTALL_DIR_VAR, SCANNER_PATH_VAR, WORKING_DIR_VAR};
pub use error::{ErrorKind, ScanJobError, ScanJobResult};
pub use hasher::{ArtifactDigest, ArtifactHasher};
pub use paths::{ScanPaths, ScanPathsResolver, VERSION_MARKER_FILE};
pub use platform::OperatingSystemFamily;
pub use types::{InstalledArtifact, ScanOutcome, ScanStatus, ScanTarget};
