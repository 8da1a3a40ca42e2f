//! Installation strategy selection and coordinator construction.

use crate::core::{
    EnvironmentVariables, OperatingSystemFamily, ScanJobError, ScanPaths, ScanPathsResolver,
    INSTALL_DIR_VAR, SCANNER_PATH_VAR,
};
use crate::install::{
    ArchiveExpander, BoxedInstaller, InstallerConfig, ManagedInstaller, PreInstalledInstaller,
    UserUrlInstaller, ZipExpander,
};
use crate::manager::{
    CoordinatorConfig, ProcessRunner, ScanExecutionCoordinator, TokioProcessRunner, WorkerPool,
};
use crate::transport::{validate_url, ConnectionFactory, Credentials, ServerConfig};

use std::path::PathBuf;
use std::sync::Arc;

/// How the scanner gets onto disk.
///
/// Exactly one strategy is chosen per coordinator and never changes.
#[derive(Debug, Clone)]
pub enum InstallStrategy {
    /// Download and update the scanner from the managed server.
    Managed {
        /// Server to authenticate against.
        server: ServerConfig,
    },
    /// Download and update the scanner from a caller-supplied URL.
    UserProvidedUrl {
        /// Location of the scanner archive.
        url: String,
        /// Credentials, only if the URL requires them.
        credentials: Option<Credentials>,
    },
    /// Use a scanner that is already installed.
    PreInstalled {
        /// Explicit executable location; the resolved default otherwise.
        existing_path: Option<PathBuf>,
    },
}

impl InstallStrategy {
    /// Returns the strategy name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Managed { .. } => "managed",
            Self::UserProvidedUrl { .. } => "user_url",
            Self::PreInstalled { .. } => "pre_installed",
        }
    }

    /// Chooses a strategy from the caller's preferences.
    ///
    /// Offline mode or an explicit local scanner wins, then a user URL, then
    /// the managed server.
    ///
    /// # Errors
    ///
    /// Returns `ScanJobError::Configuration` when no source is available.
    pub fn select(preferences: &InstallPreferences) -> Result<Self, ScanJobError> {
        if preferences.offline || preferences.local_scanner_path.is_some() {
            return Ok(Self::PreInstalled {
                existing_path: preferences.local_scanner_path.clone(),
            });
        }
        if let Some(url) = &preferences.user_url {
            return Ok(Self::UserProvidedUrl {
                url: url.clone(),
                credentials: preferences.url_credentials.clone(),
            });
        }
        if let Some(server) = &preferences.server {
            return Ok(Self::Managed {
                server: server.clone(),
            });
        }
        Err(ScanJobError::configuration(
            "no scanner source: configure a server, a download URL, a local scanner or offline mode",
        ))
    }
}

/// Caller preferences that decide the [`InstallStrategy`].
#[derive(Debug, Clone, Default)]
pub struct InstallPreferences {
    /// Never touch the network.
    pub offline: bool,
    /// Path of an existing scanner executable.
    pub local_scanner_path: Option<PathBuf>,
    /// URL to download the scanner archive from.
    pub user_url: Option<String>,
    /// Credentials for `user_url`.
    pub url_credentials: Option<Credentials>,
    /// Managed server configuration.
    pub server: Option<ServerConfig>,
}

impl InstallPreferences {
    /// Creates empty preferences.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets offline mode.
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Sets an existing scanner executable.
    pub fn with_local_scanner_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_scanner_path = Some(path.into());
        self
    }

    /// Sets a download URL.
    pub fn with_user_url(mut self, url: impl Into<String>) -> Self {
        self.user_url = Some(url.into());
        self
    }

    /// Sets credentials for the download URL.
    pub fn with_url_credentials(mut self, credentials: Credentials) -> Self {
        self.url_credentials = Some(credentials);
        self
    }

    /// Sets the managed server.
    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self
    }
}

/// Builds a [`ScanExecutionCoordinator`] bound to one installation strategy.
///
/// Each entry point detects the OS family, resolves the [`ScanPaths`],
/// constructs the installer and returns a coordinator. Nothing is installed
/// until the coordinator's first scan or its `ensure_installed` call.
///
/// # Examples
///
/// ```rust,no_run
/// use scanjob::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), ScanJobError> {
/// let pool = WorkerPool::new(4)?;
/// let coordinator = InstallationOrchestrator::new()
///     .build_unmanaged(&pool, &EnvironmentVariables::from_system())?;
///
/// let outcome = coordinator.submit(ScanTarget::new("repo").with_argument("--help")).await;
/// println!("{} exited with {:?}", outcome.target, outcome.exit_code);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InstallationOrchestrator {
    connection_factory: Option<Arc<dyn ConnectionFactory>>,
    expander: Arc<dyn ArchiveExpander>,
    runner: Arc<dyn ProcessRunner>,
    installer_config: InstallerConfig,
    coordinator_config: CoordinatorConfig,
    resolver: ScanPathsResolver,
    operating_system: Option<OperatingSystemFamily>,
}

impl Default for InstallationOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallationOrchestrator {
    /// Creates an orchestrator with the default HTTP transport, zip
    /// expander and process runner.
    pub fn new() -> Self {
        Self {
            connection_factory: default_connection_factory(),
            expander: Arc::new(ZipExpander::new()),
            runner: Arc::new(TokioProcessRunner::new()),
            installer_config: InstallerConfig::default(),
            coordinator_config: CoordinatorConfig::default(),
            resolver: ScanPathsResolver::new(),
            operating_system: None,
        }
    }

    /// Sets the connection factory used by [`Self::build_managed`] and
    /// [`Self::build`].
    pub fn with_connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.connection_factory = Some(factory);
        self
    }

    /// Sets the archive expander.
    pub fn with_expander(mut self, expander: Arc<dyn ArchiveExpander>) -> Self {
        self.expander = expander;
        self
    }

    /// Sets the process runner.
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Sets the installer configuration.
    pub fn with_installer_config(mut self, config: InstallerConfig) -> Self {
        self.installer_config = config;
        self
    }

    /// Sets the coordinator configuration.
    pub fn with_coordinator_config(mut self, config: CoordinatorConfig) -> Self {
        self.coordinator_config = config;
        self
    }

    /// Uses `os` instead of detecting the host's OS family.
    pub fn with_operating_system(mut self, os: OperatingSystemFamily) -> Self {
        self.operating_system = Some(os);
        self
    }

    /// Builds a coordinator that installs and updates the scanner from the
    /// managed server.
    ///
    /// # Errors
    ///
    /// `Encryption` when the server credentials cannot be decoded,
    /// `Configuration` when the paths cannot be resolved, when
    /// `SCANJOB_SCANNER_PATH` is set without `SCANJOB_INSTALL_DIR`, or when no
    /// transport is available.
    pub fn build_managed(
        &self,
        server: &ServerConfig,
        pool: &WorkerPool,
        env: &EnvironmentVariables,
    ) -> Result<ScanExecutionCoordinator, ScanJobError> {
        let factory = self.connection_factory()?;
        let (os, paths) = self.resolve_for_install(env)?;
        let source = factory.connect_server(server, os)?;

        tracing::info!(server = %server.url, "Scanner will be installed from the server");
        let installer = ManagedInstaller::with_parts(
            source,
            Arc::clone(&self.expander),
            self.installer_config.clone(),
        );
        Ok(self.coordinator(paths, Box::new(installer), pool))
    }

    /// Builds a coordinator for a scanner that is already installed, either
    /// at an explicit `SCANJOB_SCANNER_PATH` or because the caller is
    /// offline.
    ///
    /// The executable is verified on first use, not here.
    ///
    /// # Errors
    ///
    /// `Configuration` when the paths cannot be resolved.
    pub fn build_unmanaged(
        &self,
        pool: &WorkerPool,
        env: &EnvironmentVariables,
    ) -> Result<ScanExecutionCoordinator, ScanJobError> {
        let (_, paths) = self.resolve(env)?;

        tracing::info!(
            executable = %paths.executable_path.display(),
            "Scanner installation is not managed"
        );
        Ok(self.coordinator(paths, Box::new(PreInstalledInstaller::new()), pool))
    }

    /// Builds a coordinator that installs and updates the scanner from `url`
    /// without server credentials.
    ///
    /// # Errors
    ///
    /// `DetectConfiguration` when `url` is malformed or not http(s),
    /// `Configuration` when the paths cannot be resolved or when
    /// `SCANJOB_SCANNER_PATH` is set without `SCANJOB_INSTALL_DIR`.
    pub fn build_with_user_url(
        &self,
        url: &str,
        connection_factory: &dyn ConnectionFactory,
        pool: &WorkerPool,
        env: &EnvironmentVariables,
    ) -> Result<ScanExecutionCoordinator, ScanJobError> {
        self.user_url_coordinator(url, None, connection_factory, pool, env)
    }

    /// Builds a coordinator for an already chosen strategy.
    pub fn build(
        &self,
        strategy: &InstallStrategy,
        pool: &WorkerPool,
        env: &EnvironmentVariables,
    ) -> Result<ScanExecutionCoordinator, ScanJobError> {
        tracing::debug!(strategy = strategy.name(), "Building scan coordinator");
        match strategy {
            InstallStrategy::Managed { server } => self.build_managed(server, pool, env),
            InstallStrategy::UserProvidedUrl { url, credentials } => {
                let factory = self.connection_factory()?;
                self.user_url_coordinator(url, credentials.as_ref(), factory.as_ref(), pool, env)
            }
            InstallStrategy::PreInstalled {
                existing_path: Some(path),
            } => {
                let env = env.clone().with(SCANNER_PATH_VAR, path.to_string_lossy());
                self.build_unmanaged(pool, &env)
            }
            InstallStrategy::PreInstalled {
                existing_path: None,
            } => self.build_unmanaged(pool, env),
        }
    }

    /// Builds a coordinator around a custom installer.
    pub fn build_with_installer(
        &self,
        installer: BoxedInstaller,
        pool: &WorkerPool,
        env: &EnvironmentVariables,
    ) -> Result<ScanExecutionCoordinator, ScanJobError> {
        let (_, paths) = self.resolve(env)?;
        Ok(self.coordinator(paths, installer, pool))
    }

    fn user_url_coordinator(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        connection_factory: &dyn ConnectionFactory,
        pool: &WorkerPool,
        env: &EnvironmentVariables,
    ) -> Result<ScanExecutionCoordinator, ScanJobError> {
        let url = validate_url(url)?;
        let (_, paths) = self.resolve_for_install(env)?;
        let source = connection_factory.connect_url(&url, credentials)?;

        tracing::info!(url = %url, "Scanner will be installed from a user-provided URL");
        let installer = UserUrlInstaller::with_parts(
            source,
            Arc::clone(&self.expander),
            self.installer_config.clone(),
        );
        Ok(self.coordinator(paths, Box::new(installer), pool))
    }

    fn resolve(
        &self,
        env: &EnvironmentVariables,
    ) -> Result<(OperatingSystemFamily, ScanPaths), ScanJobError> {
        let os = self
            .operating_system
            .unwrap_or_else(OperatingSystemFamily::detect);
        let paths = self.resolver.resolve(os, env)?;
        Ok((os, paths))
    }

    /// Paths for an installer that writes into the install directory. An
    /// install directory derived from a scanner path may hold anything, so
    /// it has to be named explicitly.
    fn resolve_for_install(
        &self,
        env: &EnvironmentVariables,
    ) -> Result<(OperatingSystemFamily, ScanPaths), ScanJobError> {
        if env.get_non_blank(SCANNER_PATH_VAR).is_some()
            && env.get_non_blank(INSTALL_DIR_VAR).is_none()
        {
            return Err(ScanJobError::configuration(format!(
                "{} is set without {}; set both to install into a custom location, \
                 or use a pre-installed scanner",
                SCANNER_PATH_VAR, INSTALL_DIR_VAR
            )));
        }
        self.resolve(env)
    }

    fn connection_factory(&self) -> Result<Arc<dyn ConnectionFactory>, ScanJobError> {
        self.connection_factory.clone().ok_or_else(|| {
            ScanJobError::configuration("no connection factory configured for remote installs")
        })
    }

    fn coordinator(
        &self,
        paths: ScanPaths,
        installer: BoxedInstaller,
        pool: &WorkerPool,
    ) -> ScanExecutionCoordinator {
        ScanExecutionCoordinator::builder(paths, installer, pool.clone())
            .with_runner(Arc::clone(&self.runner))
            .with_config(self.coordinator_config.clone())
            .build()
    }
}

#[cfg(feature = "http")]
fn default_connection_factory() -> Option<Arc<dyn ConnectionFactory>> {
    Some(Arc::new(crate::transport::HttpConnectionFactory::new()))
}

#[cfg(not(feature = "http"))]
fn default_connection_factory() -> Option<Arc<dyn ConnectionFactory>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ScanStatus, ScanTarget, WORKING_DIR_VAR};
    use crate::mock::{
        scanner_archive, EventLog, MockArtifactSource, MockConnectionFactory, RecordingInstaller,
        ScriptedRunner,
    };
    use tempfile::TempDir;

    const SCRIPT: &str = "#!/bin/sh\necho scanned\n";

    fn env(temp: &TempDir) -> EnvironmentVariables {
        EnvironmentVariables::empty()
            .with(INSTALL_DIR_VAR, temp.path().join("scanner").to_string_lossy())
            .with(WORKING_DIR_VAR, temp.path().join("runs").to_string_lossy())
    }

    fn targets(n: usize) -> Vec<ScanTarget> {
        (0..n).map(|i| ScanTarget::new(format!("target-{}", i))).collect()
    }

    fn mock_factory(log: &EventLog) -> MockConnectionFactory {
        let source = MockArtifactSource::new(
            "2024.4.0",
            scanner_archive(OperatingSystemFamily::Linux, Some("scan.cli-2024.4.0"), SCRIPT),
        )
        .with_log(log.clone());
        MockConnectionFactory::new(source).with_log(log.clone())
    }

    fn orchestrator(log: &EventLog) -> InstallationOrchestrator {
        InstallationOrchestrator::new()
            .with_operating_system(OperatingSystemFamily::Linux)
            .with_runner(Arc::new(ScriptedRunner::new().with_log(log.clone())))
    }

    fn assert_scans_after(log: &EventLog, barrier: &str, expected_scans: usize) {
        let events = log.events();
        let barrier = log.position(barrier).unwrap();
        let scans: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.starts_with("scan:"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(scans.len(), expected_scans);
        assert!(scans.iter().all(|&i| i > barrier), "events: {:?}", events);
    }

    #[test]
    fn test_select_precedence() {
        let server = ServerConfig::parse(
            "https://scan.example.com",
            Credentials::api_token("token"),
        )
        .unwrap();
        let all = InstallPreferences::new()
            .with_server(server.clone())
            .with_user_url("https://downloads.example.com/scan.cli.zip")
            .with_local_scanner_path("/opt/scanner/bin/scan.cli.sh");

        assert!(matches!(
            InstallStrategy::select(&all).unwrap(),
            InstallStrategy::PreInstalled { existing_path: Some(_) }
        ));
        assert!(matches!(
            InstallStrategy::select(&all.clone().with_offline(true)).unwrap(),
            InstallStrategy::PreInstalled { .. }
        ));

        let remote = InstallPreferences::new()
            .with_server(server.clone())
            .with_user_url("https://downloads.example.com/scan.cli.zip");
        assert_eq!(InstallStrategy::select(&remote).unwrap().name(), "user_url");

        let managed = InstallPreferences::new().with_server(server);
        assert_eq!(InstallStrategy::select(&managed).unwrap().name(), "managed");

        assert!(matches!(
            InstallStrategy::select(&InstallPreferences::new()),
            Err(ScanJobError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_managed_installs_before_scans() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::new();
        let server = ServerConfig::parse(
            "https://scan.example.com",
            Credentials::username_password("ci", "secret"),
        )
        .unwrap();

        let coordinator = orchestrator(&log)
            .with_connection_factory(Arc::new(mock_factory(&log)))
            .build_managed(&server, &WorkerPool::new(2).unwrap(), &env(&temp))
            .unwrap();
        assert_eq!(coordinator.strategy(), "managed");
        assert_eq!(log.position("fetch"), None);

        let outcomes = coordinator.run_all(targets(4)).await;

        assert!(outcomes.iter().all(|o| o.is_success()));
        assert!(coordinator.paths().executable_path.is_file());
        assert_scans_after(&log, "fetch", 4);
    }

    #[tokio::test]
    async fn test_user_url_installs_before_scans() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::new();
        let factory = mock_factory(&log);

        let coordinator = orchestrator(&log)
            .build_with_user_url(
                "https://downloads.example.com/scan.cli.zip",
                &factory,
                &WorkerPool::new(3).unwrap(),
                &env(&temp),
            )
            .unwrap();
        assert_eq!(coordinator.strategy(), "user_url");

        let outcomes = coordinator.run_all(targets(3)).await;

        assert!(outcomes.iter().all(|o| o.is_success()));
        assert_eq!(log.position("connect:url"), Some(0));
        assert_scans_after(&log, "fetch", 3);
    }

    #[tokio::test]
    async fn test_remote_builds_reject_derived_install_directory() {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("home");
        std::fs::create_dir_all(home.join("bin")).unwrap();
        std::fs::write(home.join("important.txt"), b"user data").unwrap();
        let env = EnvironmentVariables::empty()
            .with(SCANNER_PATH_VAR, home.join("bin").join("scan.cli.sh").to_string_lossy())
            .with(WORKING_DIR_VAR, temp.path().join("runs").to_string_lossy());
        let log = EventLog::new();
        let factory = mock_factory(&log);
        let pool = WorkerPool::new(1).unwrap();
        let server = ServerConfig::parse(
            "https://scan.example.com",
            Credentials::api_token("token"),
        )
        .unwrap();

        let managed = orchestrator(&log)
            .with_connection_factory(Arc::new(mock_factory(&log)))
            .build_managed(&server, &pool, &env);
        let user_url = orchestrator(&log).build_with_user_url(
            "https://downloads.example.com/scan.cli.zip",
            &factory,
            &pool,
            &env,
        );

        assert!(matches!(managed, Err(ScanJobError::Configuration { .. })));
        assert!(matches!(user_url, Err(ScanJobError::Configuration { .. })));
        assert!(home.join("important.txt").is_file());
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn test_custom_installer_runs_before_scans() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::new();
        let installer = RecordingInstaller::new().with_log(log.clone());

        let coordinator = orchestrator(&log)
            .build_with_installer(Box::new(installer), &WorkerPool::new(2).unwrap(), &env(&temp))
            .unwrap();
        coordinator.run_all(targets(3)).await;

        assert_scans_after(&log, "install:end", 3);
    }

    #[tokio::test]
    async fn test_unmanaged_without_scanner_never_starts_scans() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::new();

        let coordinator = orchestrator(&log)
            .build_unmanaged(&WorkerPool::new(2).unwrap(), &env(&temp))
            .unwrap();
        let outcomes = coordinator.run_all(targets(2)).await;

        assert!(outcomes
            .iter()
            .all(|o| matches!(o.status, ScanStatus::NotStarted { .. })));
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_user_url_is_detect_configuration_error() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::new();
        let factory = mock_factory(&log);
        let pool = WorkerPool::new(1).unwrap();

        for url in ["not a url", "ftp://downloads.example.com/scan.cli.zip"] {
            let err = orchestrator(&log)
                .build_with_user_url(url, &factory, &pool, &env(&temp))
                .unwrap_err();
            assert!(matches!(err, ScanJobError::DetectConfiguration { .. }), "{}", url);
        }
        assert_eq!(factory.connection_counter().get(), 0);
    }

    #[tokio::test]
    async fn test_bad_credentials_fail_at_build_time() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::new();
        let server = ServerConfig::parse(
            "https://scan.example.com",
            Credentials::encoded("ci", "not*base64"),
        )
        .unwrap();

        let err = orchestrator(&log)
            .with_connection_factory(Arc::new(mock_factory(&log)))
            .build_managed(&server, &WorkerPool::new(1).unwrap(), &env(&temp))
            .unwrap_err();

        assert!(matches!(err, ScanJobError::Encryption { .. }));
    }

    #[tokio::test]
    async fn test_build_dispatches_on_strategy() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::new();
        let pool = WorkerPool::new(1).unwrap();
        let orchestrator =
            orchestrator(&log).with_connection_factory(Arc::new(mock_factory(&log)));

        let strategy = InstallStrategy::UserProvidedUrl {
            url: "https://downloads.example.com/scan.cli.zip".into(),
            credentials: Some(Credentials::api_token("abc")),
        };
        let coordinator = orchestrator.build(&strategy, &pool, &env(&temp)).unwrap();
        assert_eq!(coordinator.strategy(), "user_url");

        let exe = temp.path().join("elsewhere").join("bin").join("scan.cli.sh");
        let strategy = InstallStrategy::PreInstalled {
            existing_path: Some(exe.clone()),
        };
        let coordinator = orchestrator
            .build(
                &strategy,
                &pool,
                &EnvironmentVariables::empty()
                    .with(WORKING_DIR_VAR, temp.path().join("runs").to_string_lossy()),
            )
            .unwrap();
        assert_eq!(coordinator.strategy(), "pre_installed");
        assert_eq!(coordinator.paths().executable_path, exe);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unmanaged_runs_dummy_scanner() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("scanner").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let exe = bin.join("scan.cli.sh");
        std::fs::write(&exe, "#!/bin/sh\necho \"scanning $1\"\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let env = EnvironmentVariables::empty()
            .with(SCANNER_PATH_VAR, exe.to_string_lossy())
            .with(WORKING_DIR_VAR, temp.path().join("runs").to_string_lossy());
        let coordinator = InstallationOrchestrator::new()
            .with_operating_system(OperatingSystemFamily::Linux)
            .build_unmanaged(&WorkerPool::new(2).unwrap(), &env)
            .unwrap();

        let outcome = coordinator
            .submit(ScanTarget::new("project").with_argument("project"))
            .await;

        assert_eq!(outcome.status, ScanStatus::Succeeded);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout, "scanning project\n");
    }
}
