use crate::error::PoolError;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// A unit of work accepted by every executor.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

pub(crate) fn next_task_id() -> u64 {
  NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

/// Runs `callable`, turning a panic into [`PoolError::TaskPanicked`].
pub(crate) fn run_catching<R>(callable: impl FnOnce() -> R) -> Result<R, PoolError> {
  panic::catch_unwind(AssertUnwindSafe(callable)).map_err(|payload| PoolError::TaskPanicked(panic_message(&*payload)))
}

/// Internal representation of a value-producing task submitted to an executor.
///
/// If the runnable built from it is dropped without running (discard policies, `shutdown_now`)
/// the result sender is dropped too, which the handle reports as [`PoolError::TaskDiscarded`].
pub(crate) struct ManagedTask<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) pool_name: Arc<str>,
  pub(crate) callable: Box<dyn FnOnce() -> R + Send + 'static>,
  pub(crate) token: CancellationToken,
  pub(crate) result_sender: Option<oneshot::Sender<Result<R, PoolError>>>,
}

impl<R: Send + 'static> ManagedTask<R> {
  pub(crate) fn into_runnable(self) -> Runnable {
    Box::new(move || self.run())
  }

  fn run(mut self) {
    let task_id = self.task_id;
    let outcome = if self.token.is_cancelled() {
      debug!(pool_name = %self.pool_name, %task_id, "Task cancelled before it started.");
      Err(PoolError::TaskCancelled)
    } else {
      match run_catching(self.callable) {
        Ok(value) => {
          trace!(pool_name = %self.pool_name, %task_id, "Task executed successfully.");
          Ok(value)
        }
        Err(e) => {
          error!(pool_name = %self.pool_name, %task_id, "Task panicked during execution: {}", e);
          Err(e)
        }
      }
    };

    if let Some(tx) = self.result_sender.take() {
      if tx.send(outcome).is_err() {
        debug!(pool_name = %self.pool_name, %task_id, "Result receiver for task was dropped. Task outcome discarded.");
      }
    }
  }
}
