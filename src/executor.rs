use crate::error::PoolError;
use crate::handle::TaskHandle;
use crate::task::{next_task_id, ManagedTask, Runnable};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shared reference to a running executor.
pub type ExecutorHandle = Arc<dyn ExecutorService>;

/// Shared reference to a running executor that can run delayed and periodic work.
pub type ScheduledExecutorHandle = Arc<dyn ScheduledExecutorService>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum RunState {
  Running,
  Shutdown,
  Stop,
  Terminated,
}

/// Task submission and lifecycle surface exposed by every executor.
pub trait ExecutorService: Send + Sync + fmt::Debug {
  /// The name worker threads of this executor are derived from.
  fn name(&self) -> &str;

  /// Hands `task` to the executor. What happens when the executor is saturated depends on its
  /// rejection policy.
  fn execute(&self, task: Runnable) -> Result<(), PoolError>;

  /// Stops accepting new tasks. Already accepted tasks still run.
  fn shutdown(&self);

  /// Stops accepting new tasks and drops everything still queued. Returns the number of tasks
  /// that were dropped. Running tasks are not interrupted.
  fn shutdown_now(&self) -> usize;

  fn is_shutdown(&self) -> bool;

  fn is_terminated(&self) -> bool;

  /// Blocks until the executor has terminated or `timeout` has elapsed.
  /// Returns `true` if the executor terminated.
  fn await_termination(&self, timeout: Duration) -> bool;

  /// Returns this executor as a schedule-capable handle, if it is one.
  fn as_scheduled(self: Arc<Self>) -> Option<ScheduledExecutorHandle> {
    None
  }
}

/// How a periodic task is re-armed after each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
  /// Runs are spaced `period` apart measured from the previous scheduled start.
  FixedRate(Duration),
  /// Runs are spaced `delay` apart measured from the end of the previous run.
  FixedDelay(Duration),
}

/// An executor that can run work after a delay or periodically.
pub trait ScheduledExecutorService: ExecutorService {
  /// Runs `task` once after `delay`, unless `token` is cancelled first.
  fn schedule_runnable(&self, delay: Duration, task: Runnable, token: CancellationToken) -> Result<(), PoolError>;

  /// Runs `task` repeatedly until `token` is cancelled, the task panics or the executor shuts down.
  fn schedule_periodic(
    &self,
    initial_delay: Duration,
    period: Period,
    task: Box<dyn FnMut() + Send + 'static>,
    token: CancellationToken,
  ) -> Result<(), PoolError>;
}

/// Value-returning submission for any executor.
pub trait SubmitExt: ExecutorService {
  /// Submits `callable` and returns a handle to its eventual result.
  fn submit<R, F>(&self, callable: F) -> Result<TaskHandle<R>, PoolError>
  where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
  {
    let (task, handle) = managed_task(self.name(), callable);
    debug!(pool_name = %self.name(), task_id = handle.task_id, "Submitting task.");
    self.execute(task.into_runnable())?;
    Ok(handle)
  }
}

impl<E: ExecutorService + ?Sized> SubmitExt for E {}

/// A handle to a periodic task.
#[derive(Debug, Clone)]
pub struct ScheduledHandle {
  task_id: u64,
  token: CancellationToken,
}

impl ScheduledHandle {
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// Prevents any further runs. A run already in progress completes.
  pub fn cancel(&self) {
    debug!(task_id = %self.task_id, "ScheduledHandle: Cancellation requested.");
    self.token.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }
}

/// Delayed and periodic submission for schedule-capable executors.
pub trait ScheduleExt: ScheduledExecutorService {
  /// Runs `callable` once after `delay`.
  ///
  /// Cancelling the returned handle before the delay elapses prevents the run; the handle then
  /// resolves to [`PoolError::TaskCancelled`] no later than the original deadline.
  fn schedule<R, F>(&self, delay: Duration, callable: F) -> Result<TaskHandle<R>, PoolError>
  where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
  {
    let (task, handle) = managed_task(self.name(), callable);
    debug!(pool_name = %self.name(), task_id = handle.task_id, ?delay, "Scheduling delayed task.");
    let token = handle.cancellation_token.clone();
    self.schedule_runnable(delay, task.into_runnable(), token)?;
    Ok(handle)
  }

  fn schedule_at_fixed_rate<F>(&self, initial_delay: Duration, period: Duration, task: F) -> Result<ScheduledHandle, PoolError>
  where
    F: FnMut() + Send + 'static,
  {
    schedule_periodic_task(self, initial_delay, Period::FixedRate(period), task)
  }

  fn schedule_with_fixed_delay<F>(&self, initial_delay: Duration, delay: Duration, task: F) -> Result<ScheduledHandle, PoolError>
  where
    F: FnMut() + Send + 'static,
  {
    schedule_periodic_task(self, initial_delay, Period::FixedDelay(delay), task)
  }
}

impl<E: ScheduledExecutorService + ?Sized> ScheduleExt for E {}

fn schedule_periodic_task<E, F>(executor: &E, initial_delay: Duration, period: Period, task: F) -> Result<ScheduledHandle, PoolError>
where
  E: ScheduledExecutorService + ?Sized,
  F: FnMut() + Send + 'static,
{
  let handle = ScheduledHandle {
    task_id: next_task_id(),
    token: CancellationToken::new(),
  };
  debug!(pool_name = %executor.name(), task_id = handle.task_id, ?initial_delay, ?period, "Scheduling periodic task.");
  executor.schedule_periodic(initial_delay, period, Box::new(task), handle.token.clone())?;
  Ok(handle)
}

fn managed_task<R, F>(pool_name: &str, callable: F) -> (ManagedTask<R>, TaskHandle<R>)
where
  R: Send + 'static,
  F: FnOnce() -> R + Send + 'static,
{
  let task_id = next_task_id();
  let token = CancellationToken::new();
  let (result_tx, result_rx) = oneshot::channel::<Result<R, PoolError>>();

  let task = ManagedTask {
    task_id,
    pool_name: Arc::from(pool_name),
    callable: Box::new(callable),
    token: token.clone(),
    result_sender: Some(result_tx),
  };
  let handle = TaskHandle {
    task_id,
    cancellation_token: token,
    result_receiver: Some(result_rx),
  };
  (task, handle)
}

/// Compares two executor handles by identity.
pub fn same_executor(a: &ExecutorHandle, b: &ExecutorHandle) -> bool {
  std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
