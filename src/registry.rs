use crate::executor::{ExecutorHandle, ScheduledExecutorHandle};

use std::fmt;

use dashmap::DashMap;
use tracing::debug;

/// Name based lookup of executors that were configured outside of the manager.
pub trait Registry: Send + Sync {
  fn lookup(&self, name: &str) -> Option<ExecutorHandle>;

  /// Looks up `name` and returns it only if the executor can schedule work.
  fn lookup_scheduled(&self, name: &str) -> Option<ScheduledExecutorHandle> {
    self.lookup(name).and_then(|executor| executor.as_scheduled())
  }
}

/// A [`Registry`] kept in memory.
#[derive(Default)]
pub struct InMemoryRegistry {
  entries: DashMap<String, ExecutorHandle>,
}

impl fmt::Debug for InMemoryRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
    f.debug_struct("InMemoryRegistry").field("names", &names).finish()
  }
}

impl InMemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Binds `executor` under `name`, returning whatever was bound there before.
  pub fn bind(&self, name: &str, executor: ExecutorHandle) -> Option<ExecutorHandle> {
    debug!(name = %name, executor = %executor.name(), "Binding executor in registry.");
    self.entries.insert(name.to_string(), executor)
  }

  pub fn unbind(&self, name: &str) -> Option<ExecutorHandle> {
    self.entries.remove(name).map(|(_, executor)| executor)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl Registry for InMemoryRegistry {
  fn lookup(&self, name: &str) -> Option<ExecutorHandle> {
    self.entries.get(name).map(|entry| entry.value().clone())
  }
}
