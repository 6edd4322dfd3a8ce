use crate::error::PoolError;
use crate::executor::{ExecutorService, RunState};
use crate::profile::{QueueDiscipline, RejectionPolicy};
use crate::task::{run_catching, Runnable};
use crate::task_queue::WorkQueue;
use crate::thread_factory::NamedThreadFactory;

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, trace, warn};

/// Fully resolved construction parameters of a [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
  pub core_pool_size: usize,
  pub max_pool_size: usize,
  pub keep_alive: Duration,
  pub allow_core_thread_timeout: bool,
  pub queue: QueueDiscipline,
  pub rejection_policy: RejectionPolicy,
  pub thread_factory: NamedThreadFactory,
}

/// A pool of named worker threads with a work queue and a rejection policy.
///
/// Tasks go to a new worker while fewer than `core_pool_size` workers exist, then to the queue,
/// then to a new worker up to `max_pool_size`, and are finally handed to the rejection policy.
/// Workers above the core size exit after `keep_alive` without work.
///
/// Dropping the pool shuts it down. Non-daemon workers are joined on drop.
pub struct ThreadPool {
  inner: Arc<PoolInner>,
}

struct PoolInner {
  pool_name: Arc<str>,
  factory: NamedThreadFactory,
  keep_alive: Duration,
  rejection_policy: RejectionPolicy,
  state: Mutex<PoolState>,
  work_available: Condvar,
  terminated: Condvar,
  active_tasks: AtomicUsize,
  completed_tasks: AtomicU64,
}

struct PoolState {
  core_pool_size: usize,
  max_pool_size: usize,
  allow_core_thread_timeout: bool,
  queue: WorkQueue,
  workers: usize,
  largest_pool_size: usize,
  run_state: RunState,
  join_handles: Vec<JoinHandle<()>>,
}

impl fmt::Debug for ThreadPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.lock();
    f.debug_struct("ThreadPool")
      .field("name", &self.inner.pool_name)
      .field("core_pool_size", &state.core_pool_size)
      .field("max_pool_size", &state.max_pool_size)
      .field("workers", &state.workers)
      .field("queue", &state.queue)
      .field("run_state", &state.run_state)
      .field("rejection_policy", &self.inner.rejection_policy)
      .finish()
  }
}

impl ThreadPool {
  /// Creates a pool. Sizes are taken as given; validation is the job of
  /// [`ThreadPoolBuilder`](crate::ThreadPoolBuilder).
  pub fn new(config: ThreadPoolConfig) -> Self {
    let pool_name: Arc<str> = Arc::from(config.thread_factory.name());
    info!(
      pool_name = %pool_name,
      core_pool_size = config.core_pool_size,
      max_pool_size = config.max_pool_size,
      queue = ?config.queue,
      rejection_policy = ?config.rejection_policy,
      "Created thread pool."
    );

    Self {
      inner: Arc::new(PoolInner {
        pool_name,
        factory: config.thread_factory,
        keep_alive: config.keep_alive,
        rejection_policy: config.rejection_policy,
        state: Mutex::new(PoolState {
          core_pool_size: config.core_pool_size,
          max_pool_size: config.max_pool_size,
          allow_core_thread_timeout: config.allow_core_thread_timeout,
          queue: WorkQueue::new(config.queue),
          workers: 0,
          largest_pool_size: 0,
          run_state: RunState::Running,
          join_handles: Vec::new(),
        }),
        work_available: Condvar::new(),
        terminated: Condvar::new(),
        active_tasks: AtomicUsize::new(0),
        completed_tasks: AtomicU64::new(0),
      }),
    }
  }

  pub fn core_pool_size(&self) -> usize {
    self.inner.state.lock().core_pool_size
  }

  pub fn max_pool_size(&self) -> usize {
    self.inner.state.lock().max_pool_size
  }

  pub fn keep_alive(&self) -> Duration {
    self.inner.keep_alive
  }

  pub fn queue_discipline(&self) -> QueueDiscipline {
    self.inner.state.lock().queue.discipline()
  }

  pub fn rejection_policy(&self) -> RejectionPolicy {
    self.inner.rejection_policy
  }

  pub fn is_daemon(&self) -> bool {
    self.inner.factory.is_daemon()
  }

  /// Current number of worker threads.
  pub fn pool_size(&self) -> usize {
    self.inner.state.lock().workers
  }

  pub fn largest_pool_size(&self) -> usize {
    self.inner.state.lock().largest_pool_size
  }

  /// Number of workers currently running a task.
  pub fn active_count(&self) -> usize {
    self.inner.active_tasks.load(Ordering::Relaxed)
  }

  pub fn queue_size(&self) -> usize {
    self.inner.state.lock().queue.len()
  }

  /// `None` for unbounded queues.
  pub fn queue_remaining_capacity(&self) -> Option<usize> {
    self.inner.state.lock().queue.remaining_capacity()
  }

  pub fn completed_task_count(&self) -> u64 {
    self.inner.completed_tasks.load(Ordering::Relaxed)
  }
}

impl ExecutorService for ThreadPool {
  fn name(&self) -> &str {
    &self.inner.pool_name
  }

  fn execute(&self, task: Runnable) -> Result<(), PoolError> {
    self.inner.execute(task)
  }

  fn shutdown(&self) {
    self.inner.shutdown();
  }

  fn shutdown_now(&self) -> usize {
    self.inner.shutdown_now()
  }

  fn is_shutdown(&self) -> bool {
    self.inner.state.lock().run_state != RunState::Running
  }

  fn is_terminated(&self) -> bool {
    self.inner.state.lock().run_state == RunState::Terminated
  }

  fn await_termination(&self, timeout: Duration) -> bool {
    self.inner.await_termination(timeout)
  }
}

impl Drop for ThreadPool {
  fn drop(&mut self) {
    let handles = {
      let mut state = self.inner.state.lock();
      if state.run_state == RunState::Running {
        info!(pool_name = %self.inner.pool_name, "ThreadPool dropped. Initiating implicit shutdown.");
      }
      std::mem::take(&mut state.join_handles)
    };
    self.inner.shutdown();

    let current = thread::current().id();
    for handle in handles {
      if handle.thread().id() == current {
        continue;
      }
      if handle.join().is_err() {
        error!(pool_name = %self.inner.pool_name, "Error joining worker thread during drop.");
      }
    }
  }
}

impl PoolInner {
  fn execute(self: &Arc<Self>, task: Runnable) -> Result<(), PoolError> {
    let mut state = self.state.lock();
    if state.run_state != RunState::Running {
      warn!(pool_name = %self.pool_name, "Execute: Attempted to submit task to a pool that is shutting down.");
      return Err(PoolError::PoolShuttingDown);
    }

    if state.workers < state.core_pool_size {
      return self.add_worker(&mut state, Some(task));
    }

    let task = match state.queue.offer(task) {
      Ok(()) => {
        if state.workers == 0 {
          self.add_worker(&mut state, None)?;
        }
        self.work_available.notify_one();
        return Ok(());
      }
      Err(task) => task,
    };

    if state.workers < state.max_pool_size {
      return self.add_worker(&mut state, Some(task));
    }

    self.reject(state, task)
  }

  fn add_worker(self: &Arc<Self>, state: &mut MutexGuard<'_, PoolState>, first_task: Option<Runnable>) -> Result<(), PoolError> {
    state.workers += 1;
    state.largest_pool_size = state.largest_pool_size.max(state.workers);

    let inner = self.clone();
    match self.factory.new_thread(move || inner.run_worker(first_task)) {
      Ok(worker) => {
        trace!(pool_name = %self.pool_name, thread_name = %worker.name(), workers = state.workers, "Added worker.");
        if let Some(handle) = worker.into_join_handle() {
          state.join_handles.retain(|h| !h.is_finished());
          state.join_handles.push(handle);
        }
        Ok(())
      }
      Err(e) => {
        state.workers -= 1;
        error!(pool_name = %self.pool_name, "Failed to add worker: {}", e);
        Err(e)
      }
    }
  }

  fn reject(&self, mut state: MutexGuard<'_, PoolState>, task: Runnable) -> Result<(), PoolError> {
    match self.rejection_policy {
      RejectionPolicy::CallerRuns => {
        drop(state);
        debug!(pool_name = %self.pool_name, "Pool saturated. Running task on the calling thread.");
        task();
        Ok(())
      }
      RejectionPolicy::Abort => {
        drop(state);
        drop(task);
        warn!(pool_name = %self.pool_name, "Pool saturated. Task rejected.");
        Err(PoolError::Rejected {
          pool_name: self.pool_name.to_string(),
        })
      }
      RejectionPolicy::Discard => {
        drop(state);
        debug!(pool_name = %self.pool_name, "Pool saturated. Task discarded.");
        drop(task);
        Ok(())
      }
      RejectionPolicy::DiscardOldest => {
        let oldest = state.queue.poll();
        let refused = match state.queue.offer(task) {
          Ok(()) => {
            self.work_available.notify_one();
            None
          }
          Err(task) => Some(task),
        };
        drop(state);
        // Discarded tasks settle their results in drop glue, which must not run under the pool lock.
        match refused {
          None => debug!(pool_name = %self.pool_name, "Pool saturated. Discarded oldest queued task."),
          Some(_) => debug!(pool_name = %self.pool_name, "Pool saturated and nothing to evict. Task discarded."),
        }
        drop(oldest);
        drop(refused);
        Ok(())
      }
    }
  }

  fn run_worker(self: Arc<Self>, first_task: Option<Runnable>) {
    let mut next = first_task;
    loop {
      let task = match next.take() {
        Some(task) => task,
        None => match self.next_task() {
          Some(task) => task,
          None => break,
        },
      };

      self.active_tasks.fetch_add(1, Ordering::Relaxed);
      if let Err(e) = run_catching(task) {
        error!(pool_name = %self.pool_name, "Task panicked on worker thread: {}", e);
      }
      self.active_tasks.fetch_sub(1, Ordering::Relaxed);
      self.completed_tasks.fetch_add(1, Ordering::Relaxed);
    }
    trace!(pool_name = %self.pool_name, "Worker exiting.");
  }

  /// Blocks for the next task. Returns `None` when the calling worker should exit, in which case
  /// it has already been removed from the worker count.
  fn next_task(&self) -> Option<Runnable> {
    let mut state = self.state.lock();
    loop {
      let stopping = state.run_state >= RunState::Stop;
      let drained = state.run_state == RunState::Shutdown && state.queue.is_empty();
      if stopping || drained {
        self.worker_exit(&mut state);
        return None;
      }

      if let Some(task) = state.queue.poll() {
        return Some(task);
      }

      let timed = state.allow_core_thread_timeout || state.workers > state.core_pool_size;
      state.queue.taker_parked();
      let timed_out = if timed {
        self.work_available.wait_for(&mut state, self.keep_alive).timed_out()
      } else {
        self.work_available.wait(&mut state);
        false
      };
      state.queue.taker_unparked();

      // Another worker may have timed out meanwhile, so the core size is checked again.
      let may_exit = state.allow_core_thread_timeout || state.workers > state.core_pool_size;
      if timed_out && may_exit && state.queue.is_empty() && state.run_state == RunState::Running {
        trace!(pool_name = %self.pool_name, "Worker idle for keep-alive period.");
        self.worker_exit(&mut state);
        return None;
      }
    }
  }

  fn worker_exit(&self, state: &mut MutexGuard<'_, PoolState>) {
    state.workers -= 1;
    self.try_terminate(state);
  }

  fn try_terminate(&self, state: &mut MutexGuard<'_, PoolState>) {
    let finished = match state.run_state {
      RunState::Shutdown => state.queue.is_empty() && state.workers == 0,
      RunState::Stop => state.workers == 0,
      RunState::Running | RunState::Terminated => false,
    };
    if finished {
      state.run_state = RunState::Terminated;
      info!(pool_name = %self.pool_name, "Thread pool terminated.");
      self.terminated.notify_all();
    }
  }

  fn shutdown(&self) {
    let mut state = self.state.lock();
    if state.run_state == RunState::Running {
      info!(pool_name = %self.pool_name, "Initiating pool shutdown.");
      state.run_state = RunState::Shutdown;
    }
    self.work_available.notify_all();
    self.try_terminate(&mut state);
  }

  fn shutdown_now(&self) -> usize {
    let dropped = {
      let mut state = self.state.lock();
      if state.run_state < RunState::Stop {
        info!(pool_name = %self.pool_name, "Initiating forceful pool shutdown.");
        state.run_state = RunState::Stop;
      }
      let dropped = state.queue.drain();
      self.work_available.notify_all();
      self.try_terminate(&mut state);
      dropped
    };
    // Dropping outside the lock: the tasks' drop glue may notify waiters.
    let count = dropped.len();
    drop(dropped);
    debug!(pool_name = %self.pool_name, dropped = count, "Dropped queued tasks.");
    count
  }

  fn await_termination(&self, timeout: Duration) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    let mut state = self.state.lock();
    while state.run_state != RunState::Terminated {
      match deadline {
        Some(deadline) => {
          if self.terminated.wait_until(&mut state, deadline).timed_out() {
            return state.run_state == RunState::Terminated;
          }
        }
        None => self.terminated.wait(&mut state),
      }
    }
    true
  }
}
