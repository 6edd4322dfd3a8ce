use crate::error::PoolError;
use crate::executor::{ExecutorHandle, ScheduledExecutorHandle};
use crate::manager::ExecutorServiceManager;
use crate::registry::Registry;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

/// Implemented by work definitions that can declare which executor they want to run on.
pub trait ExecutorServiceAware {
  /// An executor instance configured directly on the definition.
  fn executor_service(&self) -> Option<ExecutorHandle>;

  /// The name of an executor in the registry, or the id of a thread pool profile.
  fn executor_service_ref(&self) -> Option<&str>;
}

/// Plain executor preferences of a work definition.
#[derive(Debug, Clone, Default)]
pub struct ExecutorPreferences {
  pub executor_service: Option<ExecutorHandle>,
  pub executor_service_ref: Option<String>,
}

impl ExecutorPreferences {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_executor_service(mut self, executor: ExecutorHandle) -> Self {
    self.executor_service = Some(executor);
    self
  }

  pub fn with_executor_service_ref(mut self, reference: &str) -> Self {
    self.executor_service_ref = Some(reference.to_string());
    self
  }
}

impl ExecutorServiceAware for ExecutorPreferences {
  fn executor_service(&self) -> Option<ExecutorHandle> {
    self.executor_service.clone()
  }

  fn executor_service_ref(&self) -> Option<&str> {
    self.executor_service_ref.as_deref()
  }
}

fn non_empty_ref<D: ExecutorServiceAware + ?Sized>(definition: &D) -> Option<&str> {
  definition.executor_service_ref().filter(|reference| !reference.is_empty())
}

/// Decides which executor a work definition runs on.
///
/// An executor configured on the definition wins. Next comes a reference, looked up in the
/// registry first and then as a profile id. Without either, the caller gets the manager's default
/// profile pool if it asked for one, or `None`.
pub struct ProfileResolver {
  manager: Arc<ExecutorServiceManager>,
  registry: Arc<dyn Registry>,
}

impl fmt::Debug for ProfileResolver {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProfileResolver").field("manager", &self.manager).finish_non_exhaustive()
  }
}

impl ProfileResolver {
  pub fn new(manager: Arc<ExecutorServiceManager>, registry: Arc<dyn Registry>) -> Self {
    Self { manager, registry }
  }

  pub fn manager(&self) -> &Arc<ExecutorServiceManager> {
    &self.manager
  }

  /// Returns `true` if resolving `definition` would create a pool that nobody else shares.
  pub fn will_create_new_thread_pool<D: ExecutorServiceAware + ?Sized>(&self, definition: &D, use_default: bool) -> bool {
    if definition.executor_service().is_some() {
      false
    } else if let Some(reference) = non_empty_ref(definition) {
      self.registry.lookup(reference).is_none() && !self.manager.has_profile_pool(reference)
    } else {
      use_default
    }
  }

  /// Looks `executor_ref` up in the registry, then as a profile id. `None` if it is neither.
  pub fn lookup_executor_ref(&self, name: &str, source: &str, executor_ref: &str) -> Result<Option<ExecutorHandle>, PoolError> {
    if let Some(executor) = self.registry.lookup(executor_ref) {
      trace!(reference = %executor_ref, source = %source, "Found executor in registry.");
      return Ok(Some(executor));
    }
    self.manager.pool_for_profile(source, name, executor_ref)
  }

  /// Scheduled counterpart of [`lookup_executor_ref`](Self::lookup_executor_ref).
  pub fn lookup_scheduled_executor_ref(
    &self,
    name: &str,
    source: &str,
    executor_ref: &str,
  ) -> Result<Option<ScheduledExecutorHandle>, PoolError> {
    if let Some(executor) = self.registry.lookup_scheduled(executor_ref) {
      trace!(reference = %executor_ref, source = %source, "Found scheduled executor in registry.");
      return Ok(Some(executor));
    }
    self.manager.scheduled_pool_for_profile(source, name, executor_ref)
  }

  /// Resolves the executor for `definition`.
  ///
  /// `name` is used for the worker threads when a pool has to be created.
  ///
  /// # Errors
  /// Returns `PoolError::ExecutorRefNotFound` if the definition names a reference that is neither
  /// in the registry nor a known profile.
  pub fn configured_executor<D: ExecutorServiceAware + ?Sized>(
    &self,
    name: &str,
    definition: &D,
    use_default: bool,
  ) -> Result<Option<ExecutorHandle>, PoolError> {
    if let Some(executor) = definition.executor_service() {
      debug!(name = %name, executor = %executor.name(), "Using executor configured on definition.");
      return Ok(Some(executor));
    }

    if let Some(reference) = non_empty_ref(definition) {
      return match self.lookup_executor_ref(name, name, reference)? {
        Some(executor) => {
          debug!(name = %name, reference = %reference, "Resolved executor reference.");
          Ok(Some(executor))
        }
        None => Err(PoolError::ExecutorRefNotFound {
          reference: reference.to_string(),
          kind: "ExecutorService",
        }),
      };
    }

    if use_default {
      debug!(name = %name, "No executor configured. Creating pool from default profile.");
      return self.manager.new_default_thread_pool(name, name).map(Some);
    }
    Ok(None)
  }

  /// Resolves a schedule-capable executor for `definition`.
  ///
  /// # Errors
  /// Returns `PoolError::NotSchedulable` if the executor configured on the definition cannot
  /// schedule work, and `PoolError::ExecutorRefNotFound` for references that cannot be resolved.
  pub fn configured_scheduled_executor<D: ExecutorServiceAware + ?Sized>(
    &self,
    name: &str,
    definition: &D,
    use_default: bool,
  ) -> Result<Option<ScheduledExecutorHandle>, PoolError> {
    if let Some(executor) = definition.executor_service() {
      let reference = executor.name().to_string();
      return match executor.as_scheduled() {
        Some(scheduled) => Ok(Some(scheduled)),
        None => Err(PoolError::NotSchedulable { reference }),
      };
    }

    if let Some(reference) = non_empty_ref(definition) {
      return match self.lookup_scheduled_executor_ref(name, name, reference)? {
        Some(executor) => Ok(Some(executor)),
        None => Err(PoolError::ExecutorRefNotFound {
          reference: reference.to_string(),
          kind: "ScheduledExecutorService",
        }),
      };
    }

    if use_default {
      debug!(name = %name, "No executor configured. Creating scheduled pool from default profile.");
      return self.manager.new_default_scheduled_thread_pool(name, name).map(Some);
    }
    Ok(None)
  }
}
