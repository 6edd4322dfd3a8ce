//! Ordered delivery of results computed on an executor.
//!
//! Tasks run on whatever executor backs the service and may finish in any order, but results are
//! handed out strictly in submission order. Results that finish early are buffered until their
//! turn comes. The buffer is only bounded by the number of outstanding submissions, so callers
//! should submit only as many tasks as they intend to drain promptly, or set a limit with
//! [`OrderedCompletionService::with_max_outstanding`].

use crate::error::PoolError;
use crate::executor::ExecutorHandle;
use crate::task::{run_catching, Runnable};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Position of a task in submission order.
pub type SlotId = u64;

/// What a retrieval yields for the oldest undelivered slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<R> {
  /// The task finished, successfully or not.
  Ready(Result<R, PoolError>),
  /// The task had not finished when the service was told to time out the remaining work.
  TimedOut,
}

impl<R> Completion<R> {
  pub fn is_timed_out(&self) -> bool {
    matches!(self, Completion::TimedOut)
  }

  /// The task outcome, or `None` for a timed out slot.
  pub fn into_result(self) -> Option<Result<R, PoolError>> {
    match self {
      Completion::Ready(result) => Some(result),
      Completion::TimedOut => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
  Open,
  /// `timeout_task` was called. Unfinished slots are delivered as timed out.
  Draining,
  /// No more submissions are accepted.
  Closed,
}

struct Slot<R> {
  // Set once the delegate executor accepted the task. Unconfirmed slots are only delivered once
  // draining, and then as timed out, since their submission may still fail and be withdrawn.
  confirmed: bool,
  outcome: Option<Result<R, PoolError>>,
}

struct OrderedState<R> {
  slots: BTreeMap<SlotId, Slot<R>>,
  next_slot: SlotId,
  closed: bool,
  delivered: u64,
}

struct Shared<R> {
  name: Arc<str>,
  state: Mutex<OrderedState<R>>,
  changed: Condvar,
  changed_async: Notify,
  draining: CancellationToken,
}

impl<R> Shared<R> {
  fn wake_all(&self) {
    self.changed.notify_all();
    self.changed_async.notify_waiters();
  }

  fn complete(&self, slot: SlotId, outcome: Result<R, PoolError>) {
    {
      let mut state = self.state.lock();
      match state.slots.get_mut(&slot) {
        Some(entry) => entry.outcome = Some(outcome),
        None => {
          trace!(service = %self.name, slot, "Late result for a slot that is no longer outstanding. Discarded.");
          return;
        }
      }
    }
    trace!(service = %self.name, slot, "Slot completed.");
    self.wake_all();
  }

  fn is_draining(&self) -> bool {
    self.draining.is_cancelled()
  }

  /// Removes and returns the head slot if it can be delivered now.
  fn try_deliver(&self, state: &mut MutexGuard<'_, OrderedState<R>>) -> Option<Completion<R>> {
    let mut head = state.slots.first_entry()?;
    let slot_id = *head.key();
    let draining = self.is_draining();
    let completion = if !head.get().confirmed {
      // Still inside the delegate's execute, possibly running inline on the submitting thread.
      if !draining {
        return None;
      }
      Completion::TimedOut
    } else {
      match head.get_mut().outcome.take() {
        Some(outcome) => Completion::Ready(outcome),
        None if draining => Completion::TimedOut,
        None => return None,
      }
    };
    head.remove();
    state.delivered += 1;
    trace!(service = %self.name, slot = slot_id, timed_out = completion.is_timed_out(), "Delivered slot.");
    Some(completion)
  }

  /// `true` once nothing is outstanding and nothing more can arrive.
  fn exhausted(&self, state: &OrderedState<R>) -> bool {
    state.slots.is_empty() && (state.closed || self.is_draining())
  }
}

/// Settles a slot exactly once: with the task outcome when it ran, or as discarded when the
/// executor dropped the task without running it.
struct SlotCompleter<R> {
  slot: SlotId,
  shared: Arc<Shared<R>>,
  completed: bool,
}

impl<R> SlotCompleter<R> {
  fn complete(mut self, outcome: Result<R, PoolError>) {
    self.completed = true;
    self.shared.complete(self.slot, outcome);
  }
}

impl<R> Drop for SlotCompleter<R> {
  fn drop(&mut self) {
    if !self.completed {
      self.shared.complete(self.slot, Err(PoolError::TaskDiscarded));
    }
  }
}

/// Submits work to an executor and hands results back in submission order.
///
/// Cloning yields another handle to the same stream, so one thread can call
/// [`timeout_task`](Self::timeout_task) while another is blocked in [`take`](Self::take).
pub struct OrderedCompletionService<R: Send + 'static> {
  executor: ExecutorHandle,
  shared: Arc<Shared<R>>,
  max_outstanding: Option<usize>,
}

impl<R: Send + 'static> Clone for OrderedCompletionService<R> {
  fn clone(&self) -> Self {
    Self {
      executor: self.executor.clone(),
      shared: self.shared.clone(),
      max_outstanding: self.max_outstanding,
    }
  }
}

impl<R: Send + 'static> fmt::Debug for OrderedCompletionService<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.shared.state.lock();
    f.debug_struct("OrderedCompletionService")
      .field("name", &self.shared.name)
      .field("executor", &self.executor.name())
      .field("outstanding", &state.slots.len())
      .field("delivered", &state.delivered)
      .field("draining", &self.shared.is_draining())
      .field("closed", &state.closed)
      .finish()
  }
}

impl<R: Send + 'static> OrderedCompletionService<R> {
  pub fn new(executor: ExecutorHandle) -> Self {
    let name: Arc<str> = Arc::from(executor.name());
    Self {
      executor,
      shared: Arc::new(Shared {
        name,
        state: Mutex::new(OrderedState {
          slots: BTreeMap::new(),
          next_slot: 0,
          closed: false,
          delivered: 0,
        }),
        changed: Condvar::new(),
        changed_async: Notify::new(),
        draining: CancellationToken::new(),
      }),
      max_outstanding: None,
    }
  }

  /// Caps the number of undelivered results. Submissions beyond the cap fail with
  /// [`PoolError::OutstandingLimitReached`] instead of blocking.
  pub fn with_max_outstanding(mut self, limit: usize) -> Self {
    self.max_outstanding = Some(limit.max(1));
    self
  }

  pub fn executor(&self) -> &ExecutorHandle {
    &self.executor
  }

  pub fn state(&self) -> StreamState {
    if self.shared.state.lock().closed {
      StreamState::Closed
    } else if self.shared.is_draining() {
      StreamState::Draining
    } else {
      StreamState::Open
    }
  }

  /// Number of submitted results not yet handed out.
  pub fn outstanding(&self) -> usize {
    self.shared.state.lock().slots.len()
  }

  pub fn delivered(&self) -> u64 {
    self.shared.state.lock().delivered
  }

  /// Submits `callable` to the delegate executor. Never blocks, apart from a delegate that runs
  /// rejected work on the calling thread.
  ///
  /// # Errors
  /// Returns `PoolError::CompletionServiceClosed` after [`timeout_task`](Self::timeout_task) or
  /// [`close`](Self::close), `PoolError::OutstandingLimitReached` when the configured cap is hit,
  /// and whatever the delegate executor returns when it refuses the task.
  pub fn submit<F>(&self, callable: F) -> Result<SlotId, PoolError>
  where
    F: FnOnce() -> R + Send + 'static,
  {
    let slot = {
      let mut state = self.shared.state.lock();
      if state.closed || self.shared.is_draining() {
        return Err(PoolError::CompletionServiceClosed);
      }
      if let Some(limit) = self.max_outstanding {
        if state.slots.len() >= limit {
          return Err(PoolError::OutstandingLimitReached { limit });
        }
      }
      let slot = state.next_slot;
      state.next_slot += 1;
      state.slots.insert(slot, Slot { confirmed: false, outcome: None });
      slot
    };

    let completer = SlotCompleter {
      slot,
      shared: self.shared.clone(),
      completed: false,
    };
    let runnable: Runnable = Box::new(move || {
      let outcome = run_catching(callable);
      completer.complete(outcome);
    });

    debug!(service = %self.shared.name, slot, "Submitting ordered task.");
    let accepted = self.executor.execute(runnable);

    {
      let mut state = self.shared.state.lock();
      match &accepted {
        Ok(()) => {
          if let Some(entry) = state.slots.get_mut(&slot) {
            entry.confirmed = true;
          }
        }
        Err(_) => {
          state.slots.remove(&slot);
        }
      }
    }
    self.shared.wake_all();

    accepted.map(|()| slot)
  }

  /// Blocks until the oldest undelivered slot can be delivered.
  ///
  /// Returns `None` once nothing is outstanding and the service is draining or closed. While the
  /// service is open and empty, waits for the next submission.
  pub fn take(&self) -> Option<Completion<R>> {
    let mut state = self.shared.state.lock();
    loop {
      if let Some(completion) = self.shared.try_deliver(&mut state) {
        return Some(completion);
      }
      if self.shared.exhausted(&state) {
        return None;
      }
      self.shared.changed.wait(&mut state);
    }
  }

  /// Delivers the oldest slot if it is deliverable right now.
  pub fn poll(&self) -> Option<Completion<R>> {
    let mut state = self.shared.state.lock();
    self.shared.try_deliver(&mut state)
  }

  /// Like [`take`](Self::take) but gives up after `timeout`, returning `None`.
  pub fn poll_timeout(&self, timeout: Duration) -> Option<Completion<R>> {
    // A timeout too large to express as an instant waits like `take`.
    let deadline = Instant::now().checked_add(timeout);
    let mut state = self.shared.state.lock();
    loop {
      if let Some(completion) = self.shared.try_deliver(&mut state) {
        return Some(completion);
      }
      if self.shared.exhausted(&state) {
        return None;
      }
      match deadline {
        Some(deadline) => {
          if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
            return self.shared.try_deliver(&mut state);
          }
        }
        None => self.shared.changed.wait(&mut state),
      }
    }
  }

  /// Asynchronous counterpart of [`take`](Self::take).
  pub async fn take_async(&self) -> Option<Completion<R>> {
    loop {
      let notified = self.shared.changed_async.notified();
      {
        let mut state = self.shared.state.lock();
        if let Some(completion) = self.shared.try_deliver(&mut state) {
          return Some(completion);
        }
        if self.shared.exhausted(&state) {
          return None;
        }
      }
      tokio::select! {
        _ = notified => {}
        _ = self.shared.draining.cancelled() => {}
      }
    }
  }

  /// Stops waiting for unfinished work. From now on a pending head slot is delivered as
  /// [`Completion::TimedOut`] instead of blocking, while finished slots are still delivered in
  /// order. Tasks that are already running are not interrupted. Irreversible.
  pub fn timeout_task(&self) {
    // The latch flips under the state lock so a taker cannot check it and then miss the wakeup.
    let outstanding = {
      let state = self.shared.state.lock();
      if self.shared.is_draining() {
        return;
      }
      self.shared.draining.cancel();
      state.slots.len()
    };
    info!(service = %self.shared.name, outstanding, "Timing out remaining ordered tasks.");
    self.shared.wake_all();
  }

  /// Completes once [`timeout_task`](Self::timeout_task) has been called.
  pub async fn draining(&self) {
    self.shared.draining.cancelled().await
  }

  /// Rejects further submissions. Results already submitted can still be taken.
  pub fn close(&self) {
    {
      let mut state = self.shared.state.lock();
      if state.closed {
        return;
      }
      state.closed = true;
    }
    debug!(service = %self.shared.name, "Ordered completion service closed.");
    self.shared.wake_all();
  }
}
