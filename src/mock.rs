//! In-memory test doubles.
//!
//! These types stand in for the network, the archive expander, the installer
//! and the scanner process so that installation and coordination can be
//! exercised without a server or a real scanner.
//!
//! # Examples
//!
//! ```rust
//! use scanjob::core::OperatingSystemFamily;
//! use scanjob::mock::{scanner_archive, MockArtifactSource};
//!
//! let archive = scanner_archive(OperatingSystemFamily::Linux, None, "#!/bin/sh\necho ok\n");
//! let source = MockArtifactSource::new("2024.4.0", archive);
//! let fetches = source.fetch_counter();
//! assert_eq!(fetches.get(), 0);
//! ```

use crate::core::{InstalledArtifact, OperatingSystemFamily, ScanJobError, ScanPaths};
use crate::install::{ArchiveExpander, ArtifactInstaller};
use crate::manager::{ProcessOutput, ProcessRunner, ScanInvocation, Termination};
use crate::transport::{ArtifactSource, ArtifactVersion, ConnectionFactory, Credentials, ServerConfig};

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Builds a zip archive from `(name, contents, unix mode)` entries.
///
/// # Panics
///
/// Panics if the zip writer rejects an entry, for example a duplicate name.
/// The archive is written to memory, so I/O cannot fail.
pub fn zip_archive(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents, mode) in entries {
        let options = zip::write::SimpleFileOptions::default().unix_permissions(*mode);
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(contents).expect("write zip entry");
    }
    writer.finish().expect("finish zip archive").into_inner()
}

/// Builds a scanner archive holding `bin/<executable>` for `os`, optionally
/// wrapped in a single top-level directory.
///
/// # Panics
///
/// Panics under the same conditions as [`zip_archive`].
pub fn scanner_archive(os: OperatingSystemFamily, wrapper: Option<&str>, script: &str) -> Vec<u8> {
    let relative = ScanPaths::relative_executable(os);
    let relative = relative.to_string_lossy().replace('\\', "/");
    let name = match wrapper {
        Some(dir) => format!("{}/{}", dir, relative),
        None => relative,
    };
    zip_archive(&[(name.as_str(), script.as_bytes(), 0o755)])
}

/// A shared counter handed out by the mocks.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    /// Returns the current count.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// An ordered, shared log of named events.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&self, event: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.into());
    }

    /// Returns a snapshot of all events.
    pub fn events(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns the index of the first occurrence of `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// An [`ArtifactSource`] serving a fixed archive.
#[derive(Debug, Clone)]
pub struct MockArtifactSource {
    endpoint: String,
    version: ArtifactVersion,
    archive: Vec<u8>,
    version_error: Option<ScanJobError>,
    fetch_error: Option<ScanJobError>,
    fetches: Counter,
    log: Option<EventLog>,
}

impl MockArtifactSource {
    /// Creates a source reporting `version` and serving `archive`.
    pub fn new(version: impl Into<String>, archive: Vec<u8>) -> Self {
        Self {
            endpoint: "mock://artifacts".to_string(),
            version: ArtifactVersion::new(version),
            archive,
            version_error: None,
            fetch_error: None,
            fetches: Counter::default(),
            log: None,
        }
    }

    /// Sets the reported endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Advertises a checksum alongside the version.
    pub fn with_advertised_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.version = self.version.with_sha256(sha256);
        self
    }

    /// Makes `latest_version` fail.
    pub fn with_version_error(mut self, error: ScanJobError) -> Self {
        self.version_error = Some(error);
        self
    }

    /// Makes `fetch` fail.
    pub fn with_fetch_error(mut self, error: ScanJobError) -> Self {
        self.fetch_error = Some(error);
        self
    }

    /// Records `fetch` calls into `log`.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Returns a counter of `fetch` calls, shared with clones.
    pub fn fetch_counter(&self) -> Counter {
        self.fetches.clone()
    }
}

#[async_trait]
impl ArtifactSource for MockArtifactSource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn latest_version(&self) -> Result<ArtifactVersion, ScanJobError> {
        match &self.version_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.version.clone()),
        }
    }

    async fn fetch(&self, _version: &ArtifactVersion) -> Result<Vec<u8>, ScanJobError> {
        self.fetches.increment();
        if let Some(log) = &self.log {
            log.record("fetch");
        }
        match &self.fetch_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.archive.clone()),
        }
    }
}

/// A [`ConnectionFactory`] handing out clones of one [`MockArtifactSource`].
///
/// Credentials are resolved exactly as the HTTP factory does, so invalid
/// material fails at connect time.
#[derive(Debug, Clone)]
pub struct MockConnectionFactory {
    source: MockArtifactSource,
    connections: Counter,
    log: Option<EventLog>,
}

impl MockConnectionFactory {
    /// Creates a factory serving `source`.
    pub fn new(source: MockArtifactSource) -> Self {
        Self {
            source,
            connections: Counter::default(),
            log: None,
        }
    }

    /// Records connections into `log`.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Returns a counter of connections made.
    pub fn connection_counter(&self) -> Counter {
        self.connections.clone()
    }

    fn connect(&self, event: &str, endpoint: String) -> Box<dyn ArtifactSource> {
        self.connections.increment();
        if let Some(log) = &self.log {
            log.record(event);
        }
        Box::new(self.source.clone().with_endpoint(endpoint))
    }
}

impl ConnectionFactory for MockConnectionFactory {
    fn connect_server(
        &self,
        server: &ServerConfig,
        _os: OperatingSystemFamily,
    ) -> Result<Box<dyn ArtifactSource>, ScanJobError> {
        server.credentials.resolve()?;
        Ok(self.connect("connect:server", server.url.to_string()))
    }

    fn connect_url(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn ArtifactSource>, ScanJobError> {
        credentials.map(Credentials::resolve).transpose()?;
        Ok(self.connect("connect:url", url.to_string()))
    }
}

/// An [`ArchiveExpander`] that leaves a partial file behind and fails.
#[derive(Debug, Clone, Default)]
pub struct FailingExpander;

impl FailingExpander {
    /// Creates a new expander.
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExpander for FailingExpander {
    fn expand(&self, _archive: &Path, destination: &Path) -> Result<(), ScanJobError> {
        let partial = destination.join("partial.bin");
        std::fs::write(&partial, b"half an archive")
            .map_err(|e| ScanJobError::install(e.to_string()))?;
        Err(ScanJobError::install("simulated extraction failure"))
    }
}

/// An [`ArtifactInstaller`] that records its calls.
///
/// On success it reports the resolved executable path without touching the
/// filesystem.
#[derive(Debug, Clone, Default)]
pub struct RecordingInstaller {
    failure: Option<ScanJobError>,
    delay: Option<Duration>,
    calls: Counter,
    log: Option<EventLog>,
}

impl RecordingInstaller {
    /// Creates an installer that succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `error`.
    pub fn with_failure(mut self, error: ScanJobError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Sleeps this long before returning.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Records `install:start` and `install:end` into `log`.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Returns a counter of `ensure_installed` calls.
    pub fn call_counter(&self) -> Counter {
        self.calls.clone()
    }

    fn record(&self, event: &str) {
        if let Some(log) = &self.log {
            log.record(event);
        }
    }
}

#[async_trait]
impl ArtifactInstaller for RecordingInstaller {
    fn strategy(&self) -> &'static str {
        "recording"
    }

    async fn ensure_installed(&self, paths: &ScanPaths) -> Result<InstalledArtifact, ScanJobError> {
        self.calls.increment();
        self.record("install:start");
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.record("install:end");

        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(InstalledArtifact {
                executable_path: paths.executable_path.clone(),
                install_directory: paths.install_directory.clone(),
                version: Some("mock".to_string()),
                sha256: None,
                freshly_installed: false,
            }),
        }
    }
}

/// A canned process result for [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedResponse {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl ScriptedResponse {
    /// A process exiting with `code` and no output.
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Sets the standard output.
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Sets the standard error.
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

/// A [`ProcessRunner`] that answers from a script instead of spawning.
///
/// Targets without a scripted response exit with status 0. Clones share the
/// recorded invocations and concurrency statistics.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, ScriptedResponse>,
    launch_failures: Vec<String>,
    latency: Option<Duration>,
    log: Option<EventLog>,
    stats: Arc<RunnerStats>,
}

#[derive(Debug, Default)]
struct RunnerStats {
    running: AtomicUsize,
    max_running: AtomicUsize,
    invocations: Mutex<Vec<ScanInvocation>>,
}

impl ScriptedRunner {
    /// Creates a runner where every target succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the result for `target`.
    pub fn with_response(mut self, target: impl Into<String>, response: ScriptedResponse) -> Self {
        self.responses.insert(target.into(), response);
        self
    }

    /// Makes launching `target` fail.
    pub fn with_launch_failure(mut self, target: impl Into<String>) -> Self {
        self.launch_failures.push(target.into());
        self
    }

    /// Keeps each simulated process running this long.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Records `scan:<target>` into `log` when a process starts.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Returns the highest number of simultaneously running processes.
    pub fn max_concurrency(&self) -> usize {
        self.stats.max_running.load(Ordering::SeqCst)
    }

    /// Returns every invocation received so far.
    pub fn invocations(&self) -> Vec<ScanInvocation> {
        self.stats
            .invocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(
        &self,
        invocation: &ScanInvocation,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, ScanJobError> {
        self.stats
            .invocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(invocation.clone());

        if self.launch_failures.contains(&invocation.target) {
            return Err(ScanJobError::execution(format!(
                "failed to launch '{}': simulated",
                invocation.executable.display()
            )));
        }

        if let Some(log) = &self.log {
            log.record(format!("scan:{}", invocation.target));
        }

        let running = self.stats.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_running.fetch_max(running, Ordering::SeqCst);

        let cancelled = match self.latency {
            Some(latency) => tokio::select! {
                _ = tokio::time::sleep(latency) => false,
                _ = cancel.cancelled() => true,
            },
            None => cancel.is_cancelled(),
        };
        self.stats.running.fetch_sub(1, Ordering::SeqCst);

        if cancelled {
            return Ok(ProcessOutput {
                exit_code: None,
                stdout: Vec::new(),
                stderr: Vec::new(),
                termination: Termination::Cancelled,
            });
        }

        let response = self
            .responses
            .get(&invocation.target)
            .cloned()
            .unwrap_or_else(|| ScriptedResponse::exit(0));
        Ok(ProcessOutput {
            exit_code: Some(response.exit_code),
            stdout: response.stdout.into_bytes(),
            stderr: response.stderr.into_bytes(),
            termination: Termination::Exited,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_archive_layout() {
        let bytes = scanner_archive(OperatingSystemFamily::Windows, Some("wrap"), "@echo off");
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<_> = archive.file_names().collect();
        assert_eq!(names, vec!["wrap/bin/scan.cli.bat"]);
    }

    #[test]
    #[should_panic(expected = "start zip entry")]
    fn test_zip_archive_panics_on_duplicate_entry() {
        zip_archive(&[("a.txt", b"1".as_slice(), 0o644), ("a.txt", b"2".as_slice(), 0o644)]);
    }

    #[test]
    fn test_event_log_position() {
        let log = EventLog::new();
        log.record("a");
        log.record("b");
        assert_eq!(log.position("b"), Some(1));
        assert_eq!(log.position("c"), None);
    }

    #[tokio::test]
    async fn test_mock_source_counts_fetches() {
        let source = MockArtifactSource::new("1", vec![1, 2, 3]);
        let counter = source.fetch_counter();

        let version = source.latest_version().await.unwrap();
        assert_eq!(version.token, "1");
        assert_eq!(source.fetch(&version).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_factory_rejects_bad_credentials() {
        let factory = MockConnectionFactory::new(MockArtifactSource::new("1", Vec::new()));
        let server = ServerConfig::parse(
            "https://scan.example.com",
            Credentials::encoded("ci", "%%%not-base64"),
        )
        .unwrap();

        let err = factory
            .connect_server(&server, OperatingSystemFamily::Linux)
            .unwrap_err();
        assert!(matches!(err, ScanJobError::Encryption { .. }));
        assert_eq!(factory.connection_counter().get(), 0);
    }
}
