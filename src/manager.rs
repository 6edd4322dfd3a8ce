use crate::builder::ThreadPoolBuilder;
use crate::error::PoolError;
use crate::executor::{same_executor, ExecutorHandle, ScheduledExecutorHandle};
use crate::profile::ThreadPoolProfile;
use crate::thread_factory::{validate_thread_name_pattern, DEFAULT_THREAD_NAME_PATTERN};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

/// Settings a manager starts from.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
  pub thread_name_pattern: String,
  pub default_profile: ThreadPoolProfile,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    Self {
      thread_name_pattern: DEFAULT_THREAD_NAME_PATTERN.to_string(),
      default_profile: ThreadPoolProfile::default(),
    }
  }
}

/// Creates executors from profiles and keeps track of every executor it created, so they can be
/// shut down together when the owning context is torn down.
pub struct ExecutorServiceManager {
  thread_name_pattern: RwLock<Arc<str>>,
  default_profile: RwLock<ThreadPoolProfile>,
  profiles: DashMap<String, ThreadPoolProfile>,
  profile_pools: DashMap<String, ExecutorHandle>,
  profile_scheduled_pools: DashMap<String, ScheduledExecutorHandle>,
  owned_pools: Mutex<Vec<ExecutorHandle>>,
}

impl fmt::Debug for ExecutorServiceManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutorServiceManager")
      .field("thread_name_pattern", &*self.thread_name_pattern.read())
      .field("profiles", &self.profiles.len())
      .field("owned_pools", &self.owned_pools.lock().len())
      .finish()
  }
}

impl ExecutorServiceManager {
  pub fn new(config: ManagerConfig) -> Result<Arc<Self>, PoolError> {
    validate_thread_name_pattern(&config.thread_name_pattern)?;
    let mut default_profile = config.default_profile;
    default_profile.default_profile = true;
    info!(pattern = %config.thread_name_pattern, default_profile = %default_profile.id, "Created executor service manager.");

    Ok(Arc::new(Self {
      thread_name_pattern: RwLock::new(Arc::from(config.thread_name_pattern.as_str())),
      default_profile: RwLock::new(default_profile),
      profiles: DashMap::new(),
      profile_pools: DashMap::new(),
      profile_scheduled_pools: DashMap::new(),
      owned_pools: Mutex::new(Vec::new()),
    }))
  }

  pub fn with_defaults() -> Arc<Self> {
    Arc::new(Self {
      thread_name_pattern: RwLock::new(Arc::from(DEFAULT_THREAD_NAME_PATTERN)),
      default_profile: RwLock::new(ThreadPoolProfile::default()),
      profiles: DashMap::new(),
      profile_pools: DashMap::new(),
      profile_scheduled_pools: DashMap::new(),
      owned_pools: Mutex::new(Vec::new()),
    })
  }

  pub fn thread_name_pattern(&self) -> String {
    self.thread_name_pattern.read().to_string()
  }

  /// Replaces the pattern used for threads of pools created from now on.
  ///
  /// # Errors
  /// Returns `PoolError::InvalidThreadNamePattern` if the pattern would leave placeholders behind.
  pub fn set_thread_name_pattern(&self, pattern: &str) -> Result<(), PoolError> {
    validate_thread_name_pattern(pattern)?;
    *self.thread_name_pattern.write() = Arc::from(pattern);
    Ok(())
  }

  fn builder(&self) -> ThreadPoolBuilder {
    ThreadPoolBuilder::with_validated_pattern(self.thread_name_pattern.read().clone())
  }

  /// Registers `profile`. A profile flagged as default replaces the default profile.
  pub fn register_profile(&self, profile: ThreadPoolProfile) {
    if profile.default_profile {
      self.set_default_profile(profile);
      return;
    }
    debug!(profile = %profile.id, "Registering thread pool profile.");
    self.profiles.insert(profile.id.clone(), profile);
  }

  /// Returns the profile with the given id, the default profile included.
  pub fn profile(&self, id: &str) -> Option<ThreadPoolProfile> {
    {
      let default_profile = self.default_profile.read();
      if default_profile.id == id {
        return Some(default_profile.clone());
      }
    }
    self.profiles.get(id).map(|entry| entry.value().clone())
  }

  pub fn default_profile(&self) -> ThreadPoolProfile {
    self.default_profile.read().clone()
  }

  pub fn set_default_profile(&self, mut profile: ThreadPoolProfile) {
    profile.default_profile = true;
    info!(profile = %profile.id, "Using new default thread pool profile.");
    *self.default_profile.write() = profile;
  }

  fn track(&self, source: &str, executor: ExecutorHandle) {
    trace!(source = %source, pool_name = %executor.name(), "Tracking created executor.");
    self.owned_pools.lock().push(executor);
  }

  /// Number of executors created by this manager and not yet shut down through it.
  pub fn owned_pool_count(&self) -> usize {
    self.owned_pools.lock().len()
  }

  /// Creates a new pool from the profile with the given id, or `None` if no such profile exists.
  pub fn new_thread_pool(&self, source: &str, name: &str, profile_id: &str) -> Result<Option<ExecutorHandle>, PoolError> {
    match self.profile(profile_id) {
      Some(profile) => self.new_thread_pool_from_profile(source, name, &profile).map(Some),
      None => {
        debug!(source = %source, profile = %profile_id, "No thread pool profile found.");
        Ok(None)
      }
    }
  }

  pub fn new_thread_pool_from_profile(&self, source: &str, name: &str, profile: &ThreadPoolProfile) -> Result<ExecutorHandle, PoolError> {
    let pool: ExecutorHandle = self.builder().build_custom(name, profile)?;
    debug!(source = %source, pool_name = %name, profile = %profile.id, "Created thread pool from profile.");
    self.track(source, pool.clone());
    Ok(pool)
  }

  pub fn new_default_thread_pool(&self, source: &str, name: &str) -> Result<ExecutorHandle, PoolError> {
    let profile = self.default_profile();
    self.new_thread_pool_from_profile(source, name, &profile)
  }

  pub fn new_fixed_thread_pool(&self, source: &str, name: &str, pool_size: usize) -> ExecutorHandle {
    let pool: ExecutorHandle = self.builder().fixed(name, pool_size);
    self.track(source, pool.clone());
    pool
  }

  pub fn new_single_thread_executor(&self, source: &str, name: &str) -> ExecutorHandle {
    let pool: ExecutorHandle = self.builder().single(name);
    self.track(source, pool.clone());
    pool
  }

  pub fn new_cached_thread_pool(&self, source: &str, name: &str) -> ExecutorHandle {
    let pool: ExecutorHandle = self.builder().cached(name);
    self.track(source, pool.clone());
    pool
  }

  pub fn new_synchronous_executor(&self, source: &str, name: &str) -> ExecutorHandle {
    let executor: ExecutorHandle = self.builder().synchronous(name);
    self.track(source, executor.clone());
    executor
  }

  /// Creates a new scheduled pool from the profile with the given id, or `None` if no such
  /// profile exists.
  pub fn new_scheduled_thread_pool(&self, source: &str, name: &str, profile_id: &str) -> Result<Option<ScheduledExecutorHandle>, PoolError> {
    match self.profile(profile_id) {
      Some(profile) => self.new_scheduled_thread_pool_from_profile(source, name, &profile).map(Some),
      None => {
        debug!(source = %source, profile = %profile_id, "No thread pool profile found for scheduled pool.");
        Ok(None)
      }
    }
  }

  pub fn new_scheduled_thread_pool_from_profile(
    &self,
    source: &str,
    name: &str,
    profile: &ThreadPoolProfile,
  ) -> Result<ScheduledExecutorHandle, PoolError> {
    let pool = self.builder().build_scheduled(name, profile)?;
    self.track(source, pool.clone());
    let pool: ScheduledExecutorHandle = pool;
    Ok(pool)
  }

  pub fn new_scheduled_thread_pool_sized(&self, source: &str, name: &str, pool_size: usize) -> ScheduledExecutorHandle {
    let pool = self.builder().scheduled(name, pool_size);
    self.track(source, pool.clone());
    pool as ScheduledExecutorHandle
  }

  pub fn new_default_scheduled_thread_pool(&self, source: &str, name: &str) -> Result<ScheduledExecutorHandle, PoolError> {
    let profile = self.default_profile();
    self.new_scheduled_thread_pool_from_profile(source, name, &profile)
  }

  /// Returns the pool created for `profile_id`, creating it on first use.
  pub fn pool_for_profile(&self, source: &str, name: &str, profile_id: &str) -> Result<Option<ExecutorHandle>, PoolError> {
    if let Some(existing) = self.profile_pools.get(profile_id) {
      return Ok(Some(existing.value().clone()));
    }
    let profile = match self.profile(profile_id) {
      Some(profile) => profile,
      None => return Ok(None),
    };

    match self.profile_pools.entry(profile_id.to_string()) {
      Entry::Occupied(occupied) => Ok(Some(occupied.get().clone())),
      Entry::Vacant(vacant) => {
        let pool = self.new_thread_pool_from_profile(source, name, &profile)?;
        vacant.insert(pool.clone());
        Ok(Some(pool))
      }
    }
  }

  /// Scheduled counterpart of [`pool_for_profile`](Self::pool_for_profile).
  pub fn scheduled_pool_for_profile(&self, source: &str, name: &str, profile_id: &str) -> Result<Option<ScheduledExecutorHandle>, PoolError> {
    if let Some(existing) = self.profile_scheduled_pools.get(profile_id) {
      return Ok(Some(existing.value().clone()));
    }
    let profile = match self.profile(profile_id) {
      Some(profile) => profile,
      None => return Ok(None),
    };

    match self.profile_scheduled_pools.entry(profile_id.to_string()) {
      Entry::Occupied(occupied) => Ok(Some(occupied.get().clone())),
      Entry::Vacant(vacant) => {
        let pool = self.new_scheduled_thread_pool_from_profile(source, name, &profile)?;
        vacant.insert(pool.clone());
        Ok(Some(pool))
      }
    }
  }

  /// Returns `true` if a pool for `profile_id` has already been created.
  pub fn has_profile_pool(&self, profile_id: &str) -> bool {
    self.profile_pools.contains_key(profile_id) || self.profile_scheduled_pools.contains_key(profile_id)
  }

  fn forget(&self, executor: &ExecutorHandle) {
    self.owned_pools.lock().retain(|owned| !same_executor(owned, executor));
    self.profile_pools.retain(|_, pool| !same_executor(pool, executor));
    self
      .profile_scheduled_pools
      .retain(|_, pool| !std::ptr::eq(Arc::as_ptr(pool) as *const (), Arc::as_ptr(executor) as *const ()));
  }

  pub fn shutdown(&self, executor: &ExecutorHandle) {
    info!(pool_name = %executor.name(), "Shutting down executor.");
    executor.shutdown();
    self.forget(executor);
  }

  /// Returns the number of queued tasks that were dropped.
  pub fn shutdown_now(&self, executor: &ExecutorHandle) -> usize {
    info!(pool_name = %executor.name(), "Forcefully shutting down executor.");
    let dropped = executor.shutdown_now();
    self.forget(executor);
    dropped
  }

  /// Shuts down `executor` and waits up to `timeout` for it to finish its work. If it does not,
  /// its queue is dropped. Returns whether it terminated within the timeout.
  pub fn shutdown_graceful(&self, executor: &ExecutorHandle, timeout: Duration) -> bool {
    executor.shutdown();
    let terminated = executor.await_termination(timeout);
    if !terminated {
      warn!(pool_name = %executor.name(), ?timeout, "Executor did not terminate in time. Forcing shutdown.");
      executor.shutdown_now();
    }
    self.forget(executor);
    terminated
  }

  /// Shuts down every executor this manager created.
  pub fn shutdown_all(&self) {
    let owned = std::mem::take(&mut *self.owned_pools.lock());
    self.profile_pools.clear();
    self.profile_scheduled_pools.clear();
    if owned.is_empty() {
      return;
    }
    info!(count = owned.len(), "Shutting down all managed executors.");
    for executor in owned {
      executor.shutdown();
    }
  }
}

impl Drop for ExecutorServiceManager {
  fn drop(&mut self) {
    self.shutdown_all();
  }
}
