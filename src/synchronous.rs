use crate::error::PoolError;
use crate::executor::ExecutorService;
use crate::task::Runnable;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{info, trace, warn};

/// Runs every submission on the calling thread.
///
/// Swapping this in for a real pool turns concurrency off without touching the submitting code,
/// which makes execution order deterministic in tests.
#[derive(Debug)]
pub struct SynchronousExecutor {
  name: String,
  shutdown: AtomicBool,
  completed_tasks: AtomicU64,
}

impl SynchronousExecutor {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      shutdown: AtomicBool::new(false),
      completed_tasks: AtomicU64::new(0),
    }
  }

  pub fn completed_task_count(&self) -> u64 {
    self.completed_tasks.load(Ordering::Relaxed)
  }
}

impl ExecutorService for SynchronousExecutor {
  fn name(&self) -> &str {
    &self.name
  }

  fn execute(&self, task: Runnable) -> Result<(), PoolError> {
    if self.shutdown.load(Ordering::Acquire) {
      warn!(pool_name = %self.name, "Execute: Attempted to submit task to a synchronous executor that is shut down.");
      return Err(PoolError::PoolShuttingDown);
    }
    trace!(pool_name = %self.name, "Running task on the calling thread.");
    task();
    self.completed_tasks.fetch_add(1, Ordering::Relaxed);
    Ok(())
  }

  fn shutdown(&self) {
    if !self.shutdown.swap(true, Ordering::AcqRel) {
      info!(pool_name = %self.name, "Synchronous executor shut down.");
    }
  }

  fn shutdown_now(&self) -> usize {
    self.shutdown();
    0
  }

  fn is_shutdown(&self) -> bool {
    self.shutdown.load(Ordering::Acquire)
  }

  // Nothing ever runs in the background, so shut down means terminated.
  fn is_terminated(&self) -> bool {
    self.is_shutdown()
  }

  fn await_termination(&self, _timeout: Duration) -> bool {
    self.is_shutdown()
  }
}
