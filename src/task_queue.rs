use crate::profile::QueueDiscipline;
use crate::task::Runnable;

use std::collections::VecDeque;
use std::fmt;

/// The work queue of a [`ThreadPool`](crate::ThreadPool).
///
/// The queue is not synchronized on its own; it lives inside the pool state and is only touched
/// while the pool lock is held. That lets a synchronous queue see how many workers are currently
/// parked waiting for work, which is what decides whether a direct hand-off can succeed.
pub(crate) struct WorkQueue {
  discipline: QueueDiscipline,
  items: VecDeque<Runnable>,
  waiting_takers: usize,
}

impl fmt::Debug for WorkQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkQueue")
      .field("discipline", &self.discipline)
      .field("len", &self.items.len())
      .field("waiting_takers", &self.waiting_takers)
      .finish()
  }
}

impl WorkQueue {
  pub(crate) fn new(discipline: QueueDiscipline) -> Self {
    Self {
      discipline,
      items: VecDeque::new(),
      waiting_takers: 0,
    }
  }

  pub(crate) fn discipline(&self) -> QueueDiscipline {
    self.discipline
  }

  /// Offers a task without blocking. The task is handed back when the queue cannot take it.
  pub(crate) fn offer(&mut self, task: Runnable) -> Result<(), Runnable> {
    let accepted = match self.discipline {
      // Every queued item of a synchronous queue is already promised to a parked worker.
      QueueDiscipline::Synchronous => self.waiting_takers > self.items.len(),
      QueueDiscipline::Unbounded => true,
      QueueDiscipline::Bounded(capacity) => self.items.len() < capacity,
    };
    if accepted {
      self.items.push_back(task);
      Ok(())
    } else {
      Err(task)
    }
  }

  pub(crate) fn poll(&mut self) -> Option<Runnable> {
    self.items.pop_front()
  }

  /// Removes everything still queued.
  pub(crate) fn drain(&mut self) -> Vec<Runnable> {
    self.items.drain(..).collect()
  }

  pub(crate) fn len(&self) -> usize {
    self.items.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub(crate) fn remaining_capacity(&self) -> Option<usize> {
    match self.discipline {
      QueueDiscipline::Synchronous => Some(0),
      QueueDiscipline::Unbounded => None,
      QueueDiscipline::Bounded(capacity) => Some(capacity.saturating_sub(self.items.len())),
    }
  }

  /// Registers a worker that is about to park waiting for work.
  pub(crate) fn taker_parked(&mut self) {
    self.waiting_takers += 1;
  }

  pub(crate) fn taker_unparked(&mut self) {
    self.waiting_takers = self.waiting_takers.saturating_sub(1);
  }
}
