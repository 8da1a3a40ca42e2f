//! Process execution for scanner invocations.

use crate::core::ScanJobError;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to keep draining output pipes once the process has stopped.
/// Descendants that inherited the pipes can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to launch one scanner process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanInvocation {
    /// Identifier of the scan.
    pub scan_id: String,
    /// Name of the scan target.
    pub target: String,
    /// Scanner executable.
    pub executable: PathBuf,
    /// Arguments for the executable.
    pub arguments: Vec<String>,
    /// Working directory of the process.
    pub working_directory: PathBuf,
    /// Environment variables added to the inherited environment.
    pub environment: BTreeMap<String, String>,
    /// Kill the process after this long.
    pub timeout: Option<Duration>,
}

/// Why a process stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own.
    Exited,
    /// The process was killed after its timeout.
    TimedOut,
    /// The process was killed through its cancellation token.
    Cancelled,
}

/// Captured result of a process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error.
    pub stderr: Vec<u8>,
    /// Why the process stopped.
    pub termination: Termination,
}

/// Launches scanner processes.
///
/// Implementations must kill the process when `cancel` fires or the
/// invocation's timeout expires, and must never affect other invocations.
#[async_trait]
pub trait ProcessRunner: Send + Sync + Debug {
    /// Runs one invocation to completion.
    ///
    /// # Errors
    ///
    /// Returns `ScanJobError::Execution` when the process cannot be started.
    async fn run(
        &self,
        invocation: &ScanInvocation,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, ScanJobError>;
}

/// Runs scanner processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    /// Creates a new runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        invocation: &ScanInvocation,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, ScanJobError> {
        let mut cmd = Command::new(&invocation.executable);
        cmd.args(&invocation.arguments)
            .current_dir(&invocation.working_directory)
            .envs(&invocation.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ScanJobError::execution(format!(
                "failed to launch '{}': {}",
                invocation.executable.display(),
                e
            ))
        })?;

        tracing::debug!(
            scan_id = %invocation.scan_id,
            pid = ?child.id(),
            executable = %invocation.executable.display(),
            "Scanner process started"
        );

        let stop_reading = CancellationToken::new();
        let stdout = tokio::spawn(read_all(child.stdout.take(), stop_reading.clone()));
        let stderr = tokio::spawn(read_all(child.stderr.take(), stop_reading.clone()));

        let deadline = async {
            match invocation.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        let (exit_code, termination) = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| {
                    ScanJobError::execution(format!("failed to wait for scanner: {}", e))
                })?;
                (status.code(), Termination::Exited)
            }
            _ = cancel.cancelled() => {
                kill(&mut child, &invocation.scan_id).await;
                (None, Termination::Cancelled)
            }
            _ = deadline => {
                kill(&mut child, &invocation.scan_id).await;
                (None, Termination::TimedOut)
            }
        };

        let (stdout, stderr) = drain(stdout, stderr, &stop_reading, &invocation.scan_id).await;

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
            termination,
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>, stop: CancellationToken) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return buf;
    };
    let mut chunk = [0u8; 8192];
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to read scanner output");
                    break;
                }
            },
        }
    }
    buf
}

/// Collects both readers, stopping them after [`DRAIN_GRACE`] with whatever
/// they captured so far.
async fn drain(
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
    stop: &CancellationToken,
    scan_id: &str,
) -> (Vec<u8>, Vec<u8>) {
    let timer = {
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DRAIN_GRACE).await;
            stop.cancel();
        })
    };
    let (stdout, stderr) = tokio::join!(stdout, stderr);
    timer.abort();

    if stop.is_cancelled() {
        tracing::warn!(
            scan_id = %scan_id,
            "Scanner output pipes stayed open after the process stopped"
        );
    }
    (stdout.unwrap_or_default(), stderr.unwrap_or_default())
}

async fn kill(child: &mut tokio::process::Child, scan_id: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(scan_id = %scan_id, error = %e, "Failed to kill scanner process");
    }
}
