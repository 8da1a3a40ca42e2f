//! Handles to submitted scans.

use crate::core::{ScanOutcome, ScanStatus};

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A handle to a submitted scan.
///
/// The handle is itself a future resolving to the scan's [`ScanOutcome`].
/// Dropping it does not stop the scan; call [`ScanHandle::cancel`] for that.
#[derive(Debug)]
pub struct ScanHandle {
    id: String,
    target: String,
    cancel: CancellationToken,
    join: JoinHandle<ScanOutcome>,
}

impl ScanHandle {
    pub(crate) fn new(
        id: String,
        target: String,
        cancel: CancellationToken,
        join: JoinHandle<ScanOutcome>,
    ) -> Self {
        Self {
            id,
            target,
            cancel,
            join,
        }
    }

    /// Returns the unique identifier of the scan.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the name of the scan target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Requests cancellation. A running process is killed; a queued scan
    /// never starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the scan task has finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the scan to finish.
    pub async fn wait(self) -> ScanOutcome {
        self.await
    }
}

impl Future for ScanHandle {
    type Output = ScanOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(e)) => {
                tracing::error!(scan_id = %self.id, error = %e, "Scan task did not complete");
                let mut outcome =
                    ScanOutcome::not_started(self.id.clone(), self.target.clone(), e.to_string());
                if e.is_cancelled() {
                    outcome.status = ScanStatus::Cancelled;
                }
                Poll::Ready(outcome)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
