//! The scan execution coordinator.

use crate::audit;
use crate::core::{InstalledArtifact, ScanJobError, ScanOutcome, ScanPaths, ScanStatus, ScanTarget};
use crate::install::BoxedInstaller;
use crate::manager::handle::ScanHandle;
use crate::manager::pool::{PendingSlot, WorkerPool};
use crate::manager::runner::{
    ProcessOutput, ProcessRunner, ScanInvocation, Termination, TokioProcessRunner,
};

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const STDOUT_LOG: &str = "stdout.log";
const STDERR_LOG: &str = "stderr.log";
const TRUNCATION_NOTICE: &str = "\n[output truncated]";

/// Configuration for the scan execution coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Default timeout for a scan; a target's own timeout takes precedence.
    pub scan_timeout: Option<Duration>,

    /// Whether to write `stdout.log` and `stderr.log` into each scan's
    /// output directory.
    pub write_output_logs: bool,

    /// Maximum bytes of stdout/stderr kept in a [`ScanOutcome`]. The log
    /// files always hold the full output.
    pub max_captured_output: usize,

    /// Environment variables passed to every scan. Target variables win.
    pub environment: BTreeMap<String, String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            scan_timeout: None,
            write_output_logs: true,
            max_captured_output: 1024 * 1024, // 1 MiB
            environment: BTreeMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Creates a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = Some(timeout);
        self
    }

    /// Enables or disables log files in the output directories.
    pub fn with_output_logs(mut self, enabled: bool) -> Self {
        self.write_output_logs = enabled;
        self
    }

    /// Sets the captured-output limit.
    pub fn with_max_captured_output(mut self, bytes: usize) -> Self {
        self.max_captured_output = bytes;
        self
    }

    /// Adds an environment variable for every scan.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

/// Progress of the one-time installation.
enum InstallState {
    Pending(BoxedInstaller),
    Installed(InstalledArtifact),
    Failed(ScanJobError),
}

/// Builder for creating a [`ScanExecutionCoordinator`].
pub struct CoordinatorBuilder {
    paths: ScanPaths,
    installer: BoxedInstaller,
    pool: WorkerPool,
    runner: Arc<dyn ProcessRunner>,
    config: CoordinatorConfig,
}

impl CoordinatorBuilder {
    /// Sets the process runner.
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the coordinator.
    pub fn build(self) -> ScanExecutionCoordinator {
        ScanExecutionCoordinator {
            inner: Arc::new(Inner {
                strategy: self.installer.strategy(),
                install: Mutex::new(InstallState::Pending(self.installer)),
                paths: self.paths,
                pool: self.pool,
                runner: self.runner,
                config: self.config,
            }),
        }
    }
}

/// Runs scans of many targets against a single scanner installation.
///
/// The installation happens exactly once, before the first scan runs, and
/// its result is shared by every scan. Scans then run in the worker pool,
/// at most `pool.capacity()` at a time. A failing scan only affects its own
/// [`ScanOutcome`].
///
/// The coordinator is a cheap handle; clones share the same installation
/// and pool.
#[derive(Clone)]
pub struct ScanExecutionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    paths: ScanPaths,
    strategy: &'static str,
    install: Mutex<InstallState>,
    pool: WorkerPool,
    runner: Arc<dyn ProcessRunner>,
    config: CoordinatorConfig,
}

impl std::fmt::Debug for ScanExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanExecutionCoordinator")
            .field("strategy", &self.inner.strategy)
            .field("paths", &self.inner.paths)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl ScanExecutionCoordinator {
    /// Creates a builder using [`TokioProcessRunner`] and default config.
    pub fn builder(
        paths: ScanPaths,
        installer: BoxedInstaller,
        pool: WorkerPool,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            paths,
            installer,
            pool,
            runner: Arc::new(TokioProcessRunner::new()),
            config: CoordinatorConfig::default(),
        }
    }

    /// Returns the resolved paths.
    pub fn paths(&self) -> &ScanPaths {
        &self.inner.paths
    }

    /// Returns the installer strategy name.
    pub fn strategy(&self) -> &'static str {
        self.inner.strategy
    }

    /// Returns the worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Runs the installation if it has not run yet.
    ///
    /// Concurrent callers wait for the same attempt. The result, success or
    /// failure, is kept and returned to every later caller.
    pub async fn ensure_installed(&self) -> Result<InstalledArtifact, ScanJobError> {
        let mut state = self.inner.install.lock().await;

        let result = match &*state {
            InstallState::Installed(artifact) => return Ok(artifact.clone()),
            InstallState::Failed(error) => return Err(error.clone()),
            InstallState::Pending(installer) => {
                audit::emit_install_started(
                    self.inner.strategy,
                    &self.inner.paths.install_directory,
                );
                let start = Instant::now();
                let result = installer.ensure_installed(&self.inner.paths).await;
                audit::emit_install_finished(self.inner.strategy, &result, start.elapsed());
                result
            }
        };

        // The installer, and any transport it owns, is released here.
        *state = match &result {
            Ok(artifact) => InstallState::Installed(artifact.clone()),
            Err(error) => InstallState::Failed(error.clone()),
        };
        result
    }

    /// Submits one scan and returns immediately.
    ///
    /// Must be called from within the tokio runtime that owns the pool.
    pub fn submit(&self, target: ScanTarget) -> ScanHandle {
        let scan_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let slot = self.inner.pool.reserve();

        tracing::debug!(
            scan_id = %scan_id,
            scan_target = %target.name,
            pending = self.inner.pool.pending_count(),
            "Scan submitted"
        );

        let name = target.name.clone();
        let coordinator = self.clone();
        let join = self.inner.pool.spawn(coordinator.execute(
            scan_id.clone(),
            target,
            slot,
            cancel.clone(),
        ));
        ScanHandle::new(scan_id, name, cancel, join)
    }

    /// Submits every target and returns their handles in order.
    pub fn submit_all<I>(&self, targets: I) -> Vec<ScanHandle>
    where
        I: IntoIterator<Item = ScanTarget>,
    {
        targets.into_iter().map(|t| self.submit(t)).collect()
    }

    /// Submits every target and waits for all outcomes, in order.
    pub async fn run_all<I>(&self, targets: I) -> Vec<ScanOutcome>
    where
        I: IntoIterator<Item = ScanTarget>,
    {
        futures::future::join_all(self.submit_all(targets)).await
    }

    async fn execute(
        self,
        scan_id: String,
        target: ScanTarget,
        slot: PendingSlot,
        cancel: CancellationToken,
    ) -> ScanOutcome {
        // Every scan waits for the installation before taking a pool slot.
        let artifact = match self.ensure_installed().await {
            Ok(artifact) => artifact,
            Err(e) => {
                let outcome = ScanOutcome::not_started(
                    scan_id,
                    target.name,
                    format!("scanner installation failed: {}", e),
                );
                audit::emit_scan_completed(&outcome);
                return outcome;
            }
        };

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let outcome = status_only(scan_id, target.name, ScanStatus::Cancelled);
                audit::emit_scan_completed(&outcome);
                return outcome;
            }
            permit = slot.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    let outcome = ScanOutcome::not_started(scan_id, target.name, e.to_string());
                    audit::emit_scan_completed(&outcome);
                    return outcome;
                }
            },
        };

        let outcome = self.run_scan(scan_id, target, &artifact, cancel).await;
        audit::emit_scan_completed(&outcome);
        outcome
    }

    async fn run_scan(
        &self,
        scan_id: String,
        target: ScanTarget,
        artifact: &InstalledArtifact,
        cancel: CancellationToken,
    ) -> ScanOutcome {
        let config = &self.inner.config;
        let started_at = Utc::now();
        let output_directory = self.inner.paths.scan_output_directory(&scan_id);

        if let Err(e) = tokio::fs::create_dir_all(&output_directory).await {
            let reason = format!(
                "failed to create output directory '{}': {}",
                output_directory.display(),
                e
            );
            return status_only(scan_id, target.name, ScanStatus::LaunchFailed { reason });
        }

        let mut environment = config.environment.clone();
        environment.extend(target.environment);
        let invocation = ScanInvocation {
            scan_id: scan_id.clone(),
            target: target.name.clone(),
            executable: artifact.executable_path.clone(),
            arguments: target.arguments,
            working_directory: output_directory.clone(),
            environment,
            timeout: target.timeout.or(config.scan_timeout),
        };

        audit::emit_scan_started(&scan_id, &target.name, &invocation.executable);
        let start = Instant::now();
        let result = self.inner.runner.run(&invocation, cancel).await;
        let duration = start.elapsed();

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(scan_id = %scan_id, error = %e, "Scanner failed to launch");
                let mut outcome = status_only(
                    scan_id,
                    target.name,
                    ScanStatus::LaunchFailed {
                        reason: e.to_string(),
                    },
                );
                outcome.started_at = started_at;
                outcome.duration = duration;
                outcome.output_directory = Some(output_directory);
                return outcome;
            }
        };

        if config.write_output_logs {
            write_logs(&output_directory, &output).await;
        }

        let status = match output.termination {
            Termination::TimedOut => ScanStatus::TimedOut,
            Termination::Cancelled => ScanStatus::Cancelled,
            Termination::Exited if output.exit_code == Some(0) => ScanStatus::Succeeded,
            Termination::Exited => ScanStatus::Failed,
        };

        tracing::info!(
            scan_id = %scan_id,
            scan_target = %target.name,
            status = %status,
            exit_code = ?output.exit_code,
            duration_ms = duration.as_millis() as u64,
            "Scan finished"
        );

        ScanOutcome {
            scan_id,
            target: target.name,
            status,
            exit_code: output.exit_code,
            stdout: truncate_output(&output.stdout, config.max_captured_output),
            stderr: truncate_output(&output.stderr, config.max_captured_output),
            output_directory: Some(output_directory),
            started_at,
            duration,
        }
    }
}

fn status_only(scan_id: String, target: String, status: ScanStatus) -> ScanOutcome {
    let mut outcome = ScanOutcome::not_started(scan_id, target, String::new());
    outcome.status = status;
    outcome
}

async fn write_logs(dir: &Path, output: &ProcessOutput) {
    for (name, bytes) in [(STDOUT_LOG, &output.stdout), (STDERR_LOG, &output.stderr)] {
        let path = dir.join(name);
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write scan log");
        }
    }
}

/// Decodes process output lossily, keeping at most `limit` bytes.
fn truncate_output(bytes: &[u8], limit: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if text.len() > limit {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str(TRUNCATION_NOTICE);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EnvironmentVariables, OperatingSystemFamily, ScanPathsResolver};
    use crate::core::{INSTALL_DIR_VAR, WORKING_DIR_VAR};
    use crate::mock::{EventLog, RecordingInstaller, ScriptedResponse, ScriptedRunner};
    use tempfile::TempDir;

    fn paths(temp: &TempDir) -> ScanPaths {
        let env = EnvironmentVariables::empty()
            .with(INSTALL_DIR_VAR, temp.path().join("scanner").to_string_lossy())
            .with(WORKING_DIR_VAR, temp.path().join("runs").to_string_lossy());
        ScanPathsResolver::new()
            .resolve(OperatingSystemFamily::Linux, &env)
            .unwrap()
    }

    fn coordinator(
        temp: &TempDir,
        installer: RecordingInstaller,
        runner: ScriptedRunner,
        capacity: usize,
    ) -> ScanExecutionCoordinator {
        ScanExecutionCoordinator::builder(
            paths(temp),
            Box::new(installer),
            WorkerPool::new(capacity).unwrap(),
        )
        .with_runner(Arc::new(runner))
        .build()
    }

    fn targets(n: usize) -> Vec<ScanTarget> {
        (0..n).map(|i| ScanTarget::new(format!("target-{}", i))).collect()
    }

    #[tokio::test]
    async fn test_install_runs_once_before_any_scan() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::new();
        let installer = RecordingInstaller::new()
            .with_log(log.clone())
            .with_delay(Duration::from_millis(50));
        let calls = installer.call_counter();
        let runner = ScriptedRunner::new().with_log(log.clone());

        let outcomes = coordinator(&temp, installer, runner, 3)
            .run_all(targets(6))
            .await;

        assert_eq!(calls.get(), 1);
        assert!(outcomes.iter().all(ScanOutcome::is_success));

        let events = log.events();
        let installed = log.position("install:end").unwrap();
        assert_eq!(events.iter().filter(|e| e.starts_with("scan:")).count(), 6);
        for (i, event) in events.iter().enumerate() {
            if event.starts_with("scan:") {
                assert!(i > installed, "{} ran before install finished", event);
            }
        }
    }

    #[tokio::test]
    async fn test_failed_install_is_cached_and_scans_do_not_start() {
        let temp = TempDir::new().unwrap();
        let installer =
            RecordingInstaller::new().with_failure(ScanJobError::network("mock://server", "refused"));
        let calls = installer.call_counter();
        let runner = ScriptedRunner::new();
        let stats = runner.clone();

        let coordinator = coordinator(&temp, installer, runner, 2);
        let outcomes = coordinator.run_all(targets(4)).await;

        assert!(outcomes
            .iter()
            .all(|o| matches!(o.status, ScanStatus::NotStarted { .. })));
        assert_eq!(stats.invocations().len(), 0);

        let err = coordinator.ensure_installed().await.unwrap_err();
        assert!(matches!(err, ScanJobError::Network { .. }));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().with_latency(Duration::from_millis(30));
        let stats = runner.clone();

        let outcomes = coordinator(&temp, RecordingInstaller::new(), runner, 2)
            .run_all(targets(8))
            .await;

        assert_eq!(outcomes.len(), 8);
        assert!(stats.max_concurrency() <= 2);
        assert!(stats.max_concurrency() >= 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new()
            .with_response("target-1", ScriptedResponse::exit(2).with_stderr("bad input"))
            .with_launch_failure("target-3");

        let outcomes = coordinator(&temp, RecordingInstaller::new(), runner, 4)
            .run_all(targets(5))
            .await;

        assert_eq!(outcomes[1].status, ScanStatus::Failed);
        assert_eq!(outcomes[1].exit_code, Some(2));
        assert_eq!(outcomes[1].stderr, "bad input");
        assert!(matches!(outcomes[3].status, ScanStatus::LaunchFailed { .. }));
        for i in [0, 2, 4] {
            assert!(outcomes[i].is_success(), "target-{} should succeed", i);
        }
    }

    #[tokio::test]
    async fn test_cancel_queued_scan() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().with_latency(Duration::from_millis(200));
        let coordinator = coordinator(&temp, RecordingInstaller::new(), runner, 1);

        let first = coordinator.submit(ScanTarget::new("slow"));
        let second = coordinator.submit(ScanTarget::new("queued"));
        second.cancel();

        assert_eq!(second.await.status, ScanStatus::Cancelled);
        assert!(first.await.is_success());
    }

    #[tokio::test]
    async fn test_cancel_running_scan() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().with_latency(Duration::from_secs(30));
        let coordinator = coordinator(&temp, RecordingInstaller::new(), runner, 1);

        let handle = coordinator.submit(ScanTarget::new("slow"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        assert_eq!(handle.wait().await.status, ScanStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_output_logs_and_environment() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new()
            .with_response("repo", ScriptedResponse::exit(0).with_stdout("42 issues"));
        let stats = runner.clone();
        let coordinator = ScanExecutionCoordinator::builder(
            paths(&temp),
            Box::new(RecordingInstaller::new()),
            WorkerPool::new(1).unwrap(),
        )
        .with_runner(Arc::new(runner))
        .with_config(
            CoordinatorConfig::new()
                .with_env("SCAN_MODE", "full")
                .with_env("SCAN_LABEL", "default"),
        )
        .build();

        let outcome = coordinator
            .submit(ScanTarget::new("repo").with_env("SCAN_LABEL", "repo"))
            .await;

        assert!(outcome.is_success());
        let dir = outcome.output_directory.unwrap();
        assert!(dir.starts_with(&coordinator.paths().working_directory));
        assert_eq!(std::fs::read_to_string(dir.join(STDOUT_LOG)).unwrap(), "42 issues");
        assert!(dir.join(STDERR_LOG).is_file());

        let invocation = &stats.invocations()[0];
        assert_eq!(invocation.working_directory, dir);
        assert_eq!(invocation.environment["SCAN_MODE"], "full");
        assert_eq!(invocation.environment["SCAN_LABEL"], "repo");
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output(b"short", 10), "short");
        assert_eq!(truncate_output(b"0123456789", 4), format!("0123{}", TRUNCATION_NOTICE));
        // 'é' is two bytes; never split it.
        assert_eq!(truncate_output("aé".as_bytes(), 2), format!("a{}", TRUNCATION_NOTICE));
    }
}
