//! Scan execution across a bounded worker pool.
//!
//! The [`ScanExecutionCoordinator`] installs the scanner once and then runs
//! every submitted target as its own process, bounded by a [`WorkerPool`].

mod coordinator;
mod handle;
mod pool;
mod runner;

pub use coordinator::{CoordinatorBuilder, CoordinatorConfig, ScanExecutionCoordinator};
pub use handle::ScanHandle;
pub use pool::WorkerPool;
pub use runner::{ProcessOutput, ProcessRunner, ScanInvocation, Termination, TokioProcessRunner};
