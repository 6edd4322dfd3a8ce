use crate::error::PoolError;

use std::time::Duration;

use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing;

/// A handle to a task submitted to an executor.
///
/// Allows requesting cancellation of the task and retrieving its result, either by blocking
/// the current thread or by awaiting.
#[derive(Debug)]
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) cancellation_token: CancellationToken,
  pub(crate) result_receiver: Option<oneshot::Receiver<Result<R, PoolError>>>,
}

impl<R: Send + 'static> TaskHandle<R> {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// Checks if cancellation has been requested for this task.
  pub fn is_cancellation_requested(&self) -> bool {
    self.cancellation_token.is_cancelled()
  }

  /// Requests cancellation of this task.
  ///
  /// A task that has not started yet will never run and resolves to
  /// [`PoolError::TaskCancelled`]. A task that is already running keeps running.
  pub fn cancel(&self) {
    tracing::debug!(task_id = %self.task_id, "TaskHandle: Cancellation requested.");
    self.cancellation_token.cancel();
  }

  /// Blocks the current thread until the task has finished and returns its result.
  ///
  /// Must not be called from within an asynchronous execution context; use
  /// [`await_result`](Self::await_result) there.
  ///
  /// # Errors
  /// Returns `PoolError::TaskPanicked` if the task panicked during execution.
  /// Returns `PoolError::TaskCancelled` if the task was cancelled before it started.
  /// Returns `PoolError::TaskDiscarded` if the executor dropped the task without running it.
  /// Returns `PoolError::ResultUnavailable` if the result has already been taken.
  pub fn get(mut self) -> Result<R, PoolError> {
    match self.result_receiver.take() {
      Some(rx) => rx.blocking_recv().unwrap_or_else(|_| self.discarded()),
      None => Err(PoolError::ResultUnavailable),
    }
  }

  /// Awaits the completion of the task and returns its result.
  ///
  /// Errors are the same as for [`get`](Self::get).
  pub async fn await_result(mut self) -> Result<R, PoolError> {
    match self.result_receiver.take() {
      Some(rx) => rx.await.unwrap_or_else(|_| self.discarded()),
      None => Err(PoolError::ResultUnavailable),
    }
  }

  /// Awaits the result for at most `timeout`. Returns `None` if the task has not finished in time,
  /// in which case the handle stays usable.
  pub async fn await_result_timeout(&mut self, timeout: Duration) -> Option<Result<R, PoolError>> {
    let rx = self.result_receiver.as_mut()?;
    match tokio::time::timeout(timeout, rx).await {
      Ok(received) => {
        self.result_receiver = None;
        Some(received.unwrap_or_else(|_| self.discarded()))
      }
      Err(_elapsed) => None,
    }
  }

  /// Returns the result if the task has already finished, without blocking.
  pub fn try_result(&mut self) -> Option<Result<R, PoolError>> {
    let rx = self.result_receiver.as_mut()?;
    match rx.try_recv() {
      Ok(outcome) => {
        self.result_receiver = None;
        Some(outcome)
      }
      Err(TryRecvError::Empty) => None,
      Err(TryRecvError::Closed) => {
        self.result_receiver = None;
        Some(self.discarded())
      }
    }
  }

  fn discarded(&self) -> Result<R, PoolError> {
    // The sender side was dropped without sending, so the task never ran.
    tracing::debug!(task_id = %self.task_id, "Result channel closed without a value.");
    if self.cancellation_token.is_cancelled() {
      Err(PoolError::TaskCancelled)
    } else {
      Err(PoolError::TaskDiscarded)
    }
  }
}
