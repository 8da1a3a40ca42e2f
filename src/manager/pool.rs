//! Bounded worker pool shared by all scans of a coordinator.

use crate::core::ScanJobError;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// A bounded pool for scan executions.
///
/// Cloning is cheap and every clone shares the same permits. Capacity is
/// fixed at construction, so the pool can never be resized while scans are
/// being submitted.
///
/// # Examples
///
/// ```rust
/// use scanjob::manager::WorkerPool;
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = WorkerPool::new(4).unwrap();
/// assert_eq!(pool.capacity(), 4);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    capacity: usize,
    permits: Arc<Semaphore>,
    active: AtomicU64,
    pending: AtomicU64,
    runtime: Handle,
}

impl WorkerPool {
    /// Creates a pool on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ScanJobError::Configuration` when called outside a runtime.
    pub fn new(capacity: usize) -> Result<Self, ScanJobError> {
        let runtime = Handle::try_current().map_err(|e| {
            ScanJobError::configuration(format!("worker pool requires a tokio runtime: {}", e))
        })?;
        Ok(Self::with_handle(runtime, capacity))
    }

    /// Creates a pool sized to the host's available parallelism.
    pub fn with_default_capacity() -> Result<Self, ScanJobError> {
        let capacity = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(capacity)
    }

    /// Creates a pool that spawns onto the given runtime.
    pub fn with_handle(runtime: Handle, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
                active: AtomicU64::new(0),
                pending: AtomicU64::new(0),
                runtime,
            }),
        }
    }

    /// Returns the maximum number of concurrent scans.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the number of scans currently holding a slot.
    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// Returns the number of scans waiting for a slot.
    pub fn pending_count(&self) -> u64 {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Returns true if every slot is taken.
    pub fn is_full(&self) -> bool {
        self.inner.permits.available_permits() == 0
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.runtime.spawn(future)
    }

    /// Registers a scan that will later wait for a slot.
    pub(crate) fn reserve(&self) -> PendingSlot {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        PendingSlot {
            pool: Arc::clone(&self.inner),
        }
    }
}

/// A scan that has been submitted but holds no slot yet.
#[derive(Debug)]
pub(crate) struct PendingSlot {
    pool: Arc<PoolInner>,
}

impl PendingSlot {
    /// Waits for a free slot.
    pub(crate) async fn acquire(self) -> Result<PoolPermit, ScanJobError> {
        let permit = Arc::clone(&self.pool.permits)
            .acquire_owned()
            .await
            .map_err(|_| ScanJobError::execution("worker pool is closed"))?;
        self.pool.active.fetch_add(1, Ordering::SeqCst);
        Ok(PoolPermit {
            pool: Arc::clone(&self.pool),
            _permit: permit,
        })
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pool.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A held pool slot, released on drop.
#[derive(Debug)]
pub(crate) struct PoolPermit {
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
    }
}
