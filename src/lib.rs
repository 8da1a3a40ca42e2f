//! # Scanjob
//!
//! Installs a command-line scanner once and runs it concurrently against
//! many targets.
//!
//! ## Overview
//!
//! Scanjob decides how the scanner gets onto disk and then drives it:
//!
//! - Download and update the scanner from a managed server
//! - Download and update the scanner from a user-provided URL
//! - Use a scanner that is already installed (or run offline)
//! - Resolve install, executable and working paths per OS family
//! - Run one scanner process per target on a bounded worker pool
//! - Emit structured audit events for installs and scans
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scanjob::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ServerConfig::parse(
//!         "https://scan.example.com",
//!         Credentials::api_token("token"),
//!     )?;
//!     let pool = WorkerPool::new(4)?;
//!
//!     let coordinator = InstallationOrchestrator::new()
//!         .build_managed(&server, &pool, &EnvironmentVariables::from_system())?;
//!
//!     let outcomes = coordinator
//!         .run_all(vec![
//!             ScanTarget::new("api").with_argument("--dir=services/api"),
//!             ScanTarget::new("web").with_argument("--dir=services/web"),
//!         ])
//!         .await;
//!
//!     for outcome in outcomes {
//!         println!("{}: {}", outcome.target, outcome.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `default` - Includes the HTTP transport
//! - `http` - `reqwest`-based artifact downloads
//!
//! ## Architecture
//!
//! - **Core**: Errors, OS detection, path resolution and shared types
//! - **Transport**: Credentials and artifact sources
//! - **Install**: Managed, user-URL and pre-installed installers
//! - **Manager**: Worker pool, process runner and scan coordinator
//! - **Factory**: Strategy selection and coordinator construction
//! - **Audit**: Structured logging for installs and scans

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod audit;
pub mod core;
pub mod factory;
pub mod install;
pub mod manager;
pub mod mock;
pub mod transport;

// Re-export commonly used types at the crate root
pub use crate::core::{
    EnvironmentVariables, InstalledArtifact, OperatingSystemFamily, ScanJobError, ScanJobResult,
    ScanOutcome, ScanPaths, ScanPathsResolver, ScanStatus, ScanTarget,
};

pub use crate::factory::{InstallPreferences, InstallStrategy, InstallationOrchestrator};
pub use crate::install::{ArtifactInstaller, InstallerConfig};
pub use crate::manager::{CoordinatorConfig, ScanExecutionCoordinator, ScanHandle, WorkerPool};
pub use crate::transport::{Credentials, ServerConfig};

/// Prelude module for convenient imports.
///
/// ```rust
/// use scanjob::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        EnvironmentVariables, InstalledArtifact, OperatingSystemFamily, ScanJobError,
        ScanJobResult, ScanOutcome, ScanPaths, ScanStatus, ScanTarget,
    };
    pub use crate::factory::{InstallPreferences, InstallStrategy, InstallationOrchestrator};
    pub use crate::install::{ArtifactInstaller, InstallerConfig};
    pub use crate::manager::{
        CoordinatorConfig, ScanExecutionCoordinator, ScanHandle, WorkerPool,
    };
    pub use crate::transport::{Credentials, ServerConfig};
}
