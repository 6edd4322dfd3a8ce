use crate::error::PoolError;
use crate::executor::{ExecutorService, Period, RunState, ScheduledExecutorHandle, ScheduledExecutorService};
use crate::task::{run_catching, Runnable};
use crate::thread_factory::NamedThreadFactory;

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

// Stand-in for delays too large to express as an instant. Never comes due in practice.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(from: Instant, delay: Duration) -> Instant {
  from
    .checked_add(delay)
    .or_else(|| from.checked_add(FAR_FUTURE))
    .unwrap_or(from)
}

enum Job {
  Once(Runnable),
  Periodic {
    task: Box<dyn FnMut() + Send + 'static>,
    period: Period,
  },
}

struct DelayedEntry {
  deadline: Instant,
  seq: u64,
  token: CancellationToken,
  job: Job,
}

impl DelayedEntry {
  fn is_periodic(&self) -> bool {
    matches!(self.job, Job::Periodic { .. })
  }
}

// Ordered so that the max-heap yields the earliest deadline first, ties broken by submission order.
impl Ord for DelayedEntry {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    other.deadline.cmp(&self.deadline).then_with(|| other.seq.cmp(&self.seq))
  }
}

impl PartialOrd for DelayedEntry {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for DelayedEntry {
  fn eq(&self, other: &Self) -> bool {
    self.seq == other.seq
  }
}

impl Eq for DelayedEntry {}

/// A fixed-size pool of named workers sharing a delay queue.
///
/// After [`shutdown`](ExecutorService::shutdown) pending one-shot tasks still run when due while
/// periodic tasks are cancelled.
pub struct ScheduledThreadPool {
  inner: Arc<ScheduledInner>,
}

struct ScheduledInner {
  pool_name: Arc<str>,
  factory: NamedThreadFactory,
  core_pool_size: usize,
  state: Mutex<ScheduledState>,
  wakeup: Condvar,
  terminated: Condvar,
  next_seq: AtomicU64,
  active_tasks: AtomicUsize,
  completed_tasks: AtomicU64,
}

struct ScheduledState {
  delay_queue: BinaryHeap<DelayedEntry>,
  workers: usize,
  run_state: RunState,
  join_handles: Vec<JoinHandle<()>>,
}

impl fmt::Debug for ScheduledThreadPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.lock();
    f.debug_struct("ScheduledThreadPool")
      .field("name", &self.inner.pool_name)
      .field("core_pool_size", &self.inner.core_pool_size)
      .field("workers", &state.workers)
      .field("scheduled", &state.delay_queue.len())
      .field("run_state", &state.run_state)
      .finish()
  }
}

impl ScheduledThreadPool {
  pub fn new(core_pool_size: usize, thread_factory: NamedThreadFactory) -> Self {
    let core_pool_size = core_pool_size.max(1);
    let pool_name: Arc<str> = Arc::from(thread_factory.name());
    info!(pool_name = %pool_name, core_pool_size, "Created scheduled thread pool.");

    Self {
      inner: Arc::new(ScheduledInner {
        pool_name,
        factory: thread_factory,
        core_pool_size,
        state: Mutex::new(ScheduledState {
          delay_queue: BinaryHeap::new(),
          workers: 0,
          run_state: RunState::Running,
          join_handles: Vec::new(),
        }),
        wakeup: Condvar::new(),
        terminated: Condvar::new(),
        next_seq: AtomicU64::new(0),
        active_tasks: AtomicUsize::new(0),
        completed_tasks: AtomicU64::new(0),
      }),
    }
  }

  pub fn core_pool_size(&self) -> usize {
    self.inner.core_pool_size
  }

  pub fn pool_size(&self) -> usize {
    self.inner.state.lock().workers
  }

  pub fn active_count(&self) -> usize {
    self.inner.active_tasks.load(Ordering::Relaxed)
  }

  /// Number of entries waiting in the delay queue, cancelled ones included.
  pub fn queue_size(&self) -> usize {
    self.inner.state.lock().delay_queue.len()
  }

  pub fn completed_task_count(&self) -> u64 {
    self.inner.completed_tasks.load(Ordering::Relaxed)
  }
}

impl ExecutorService for ScheduledThreadPool {
  fn name(&self) -> &str {
    &self.inner.pool_name
  }

  fn execute(&self, task: Runnable) -> Result<(), PoolError> {
    self.inner.enqueue(Duration::ZERO, Job::Once(task), CancellationToken::new())
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
    let deadline = Instant::now().checked_add(timeout);
    let mut state = self.inner.state.lock();
    while state.run_state != RunState::Terminated {
      match deadline {
        Some(deadline) => {
          if self.inner.terminated.wait_until(&mut state, deadline).timed_out() {
            return state.run_state == RunState::Terminated;
          }
        }
        None => self.inner.terminated.wait(&mut state),
      }
    }
    true
  }

  fn as_scheduled(self: Arc<Self>) -> Option<ScheduledExecutorHandle> {
    Some(self)
  }
}

impl ScheduledExecutorService for ScheduledThreadPool {
  fn schedule_runnable(&self, delay: Duration, task: Runnable, token: CancellationToken) -> Result<(), PoolError> {
    self.inner.enqueue(delay, Job::Once(task), token)
  }

  fn schedule_periodic(
    &self,
    initial_delay: Duration,
    period: Period,
    task: Box<dyn FnMut() + Send + 'static>,
    token: CancellationToken,
  ) -> Result<(), PoolError> {
    self.inner.enqueue(initial_delay, Job::Periodic { task, period }, token)
  }
}

impl Drop for ScheduledThreadPool {
  fn drop(&mut self) {
    let handles = std::mem::take(&mut self.inner.state.lock().join_handles);
    self.inner.shutdown();

    let current = thread::current().id();
    for handle in handles {
      if handle.thread().id() != current && handle.join().is_err() {
        error!(pool_name = %self.inner.pool_name, "Error joining scheduler worker during drop.");
      }
    }
  }
}

impl ScheduledInner {
  fn enqueue(self: &Arc<Self>, delay: Duration, job: Job, token: CancellationToken) -> Result<(), PoolError> {
    let mut state = self.state.lock();
    if state.run_state != RunState::Running {
      warn!(pool_name = %self.pool_name, "Schedule: Attempted to schedule task on a pool that is shutting down.");
      return Err(PoolError::PoolShuttingDown);
    }

    let entry = DelayedEntry {
      deadline: deadline_after(Instant::now(), delay),
      seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
      token,
      job,
    };
    trace!(pool_name = %self.pool_name, seq = entry.seq, ?delay, "Enqueued delayed entry.");
    state.delay_queue.push(entry);

    if state.workers < self.core_pool_size {
      self.add_worker(&mut state)?;
    }
    self.wakeup.notify_one();
    Ok(())
  }

  fn add_worker(self: &Arc<Self>, state: &mut MutexGuard<'_, ScheduledState>) -> Result<(), PoolError> {
    state.workers += 1;
    let inner = self.clone();
    match self.factory.new_thread(move || inner.run_worker()) {
      Ok(worker) => {
        if let Some(handle) = worker.into_join_handle() {
          state.join_handles.push(handle);
        }
        Ok(())
      }
      Err(e) => {
        state.workers -= 1;
        error!(pool_name = %self.pool_name, "Failed to add scheduler worker: {}", e);
        Err(e)
      }
    }
  }

  fn run_worker(self: Arc<Self>) {
    while let Some(entry) = self.next_due() {
      self.active_tasks.fetch_add(1, Ordering::Relaxed);
      self.run_entry(entry);
      self.active_tasks.fetch_sub(1, Ordering::Relaxed);
      self.completed_tasks.fetch_add(1, Ordering::Relaxed);
    }
    trace!(pool_name = %self.pool_name, "Scheduler worker exiting.");
  }

  /// Blocks until the earliest entry is due. Cancelled entries count as due so they leave the
  /// queue promptly once they reach its head.
  fn next_due(&self) -> Option<DelayedEntry> {
    let mut state = self.state.lock();
    loop {
      let stopping = state.run_state >= RunState::Stop;
      let drained = state.run_state == RunState::Shutdown && state.delay_queue.is_empty();
      if stopping || drained {
        state.workers -= 1;
        self.try_terminate(&mut state);
        return None;
      }

      let now = Instant::now();
      let head = state
        .delay_queue
        .peek()
        .map(|head| (head.deadline, head.deadline <= now || head.token.is_cancelled()));

      match head {
        Some((_, true)) => return state.delay_queue.pop(),
        Some((deadline, false)) => {
          self.wakeup.wait_until(&mut state, deadline);
        }
        None => self.wakeup.wait(&mut state),
      }
    }
  }

  fn run_entry(&self, entry: DelayedEntry) {
    let DelayedEntry { deadline, seq, token, job } = entry;
    match job {
      Job::Once(task) => {
        // A cancelled one-shot entry is dropped here; its handle reports the cancellation.
        if token.is_cancelled() {
          debug!(pool_name = %self.pool_name, seq, "Dropping cancelled delayed task.");
          return;
        }
        if let Err(e) = run_catching(task) {
          error!(pool_name = %self.pool_name, seq, "Delayed task panicked: {}", e);
        }
      }
      Job::Periodic { mut task, period } => {
        if token.is_cancelled() {
          debug!(pool_name = %self.pool_name, seq, "Periodic task cancelled.");
          return;
        }
        if let Err(e) = run_catching(&mut task) {
          error!(pool_name = %self.pool_name, seq, "Periodic task panicked, suppressing further runs: {}", e);
          token.cancel();
          return;
        }
        if token.is_cancelled() {
          return;
        }

        let next_deadline = match period {
          Period::FixedRate(rate) => deadline_after(deadline, rate),
          Period::FixedDelay(delay) => deadline_after(Instant::now(), delay),
        };
        let mut state = self.state.lock();
        if state.run_state != RunState::Running {
          debug!(pool_name = %self.pool_name, seq, "Pool shutting down, periodic task not re-armed.");
          return;
        }
        state.delay_queue.push(DelayedEntry {
          deadline: next_deadline,
          seq,
          token,
          job: Job::Periodic { task, period },
        });
        self.wakeup.notify_one();
      }
    }
  }

  fn try_terminate(&self, state: &mut MutexGuard<'_, ScheduledState>) {
    let finished = match state.run_state {
      RunState::Shutdown => state.delay_queue.is_empty() && state.workers == 0,
      RunState::Stop => state.workers == 0,
      RunState::Running | RunState::Terminated => false,
    };
    if finished {
      state.run_state = RunState::Terminated;
      info!(pool_name = %self.pool_name, "Scheduled thread pool terminated.");
      self.terminated.notify_all();
    }
  }

  fn shutdown(&self) {
    let cancelled: Vec<DelayedEntry> = {
      let mut state = self.state.lock();
      if state.run_state == RunState::Running {
        info!(pool_name = %self.pool_name, "Initiating scheduled pool shutdown.");
        state.run_state = RunState::Shutdown;
      }
      let (periodic, once): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delay_queue).into_iter().partition(DelayedEntry::is_periodic);
      state.delay_queue = once.into_iter().collect();
      self.wakeup.notify_all();
      self.try_terminate(&mut state);
      periodic
    };
    for entry in &cancelled {
      entry.token.cancel();
    }
  }

  fn shutdown_now(&self) -> usize {
    let dropped: Vec<DelayedEntry> = {
      let mut state = self.state.lock();
      if state.run_state < RunState::Stop {
        info!(pool_name = %self.pool_name, "Initiating forceful scheduled pool shutdown.");
        state.run_state = RunState::Stop;
      }
      let dropped = std::mem::take(&mut state.delay_queue).into_vec();
      self.wakeup.notify_all();
      self.try_terminate(&mut state);
      dropped
    };
    let count = dropped.len();
    for entry in &dropped {
      if entry.is_periodic() {
        entry.token.cancel();
      }
    }
    count
  }
}
