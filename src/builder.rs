use crate::error::PoolError;
use crate::pool::{ThreadPool, ThreadPoolConfig};
use crate::profile::{QueueDiscipline, RejectionPolicy, ThreadPoolProfile};
use crate::scheduled::ScheduledThreadPool;
use crate::synchronous::SynchronousExecutor;
use crate::thread_factory::{validate_thread_name_pattern, NamedThreadFactory, DEFAULT_THREAD_NAME_PATTERN};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

const CACHED_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Sizes and queue a custom pool ends up with after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPlan {
  pub core_pool_size: usize,
  pub max_pool_size: usize,
  pub queue: QueueDiscipline,
}

/// Validates the sizing of `profile` and derives its queue discipline.
///
/// A core size of `0` without a queue becomes a direct hand-off pool with exactly one thread,
/// since a hand-off needs at least one worker to receive it.
pub fn plan_pool(profile: &ThreadPoolProfile) -> Result<PoolPlan, PoolError> {
  if profile.max_pool_size < profile.pool_size {
    return Err(PoolError::InvalidPoolSize {
      core_pool_size: profile.pool_size,
      max_pool_size: profile.max_pool_size,
    });
  }

  let plan = if profile.pool_size == 0 && profile.max_queue_size <= 0 {
    PoolPlan {
      core_pool_size: 1,
      max_pool_size: 1,
      queue: QueueDiscipline::Synchronous,
    }
  } else if profile.max_queue_size <= 0 {
    PoolPlan {
      core_pool_size: profile.pool_size,
      max_pool_size: profile.max_pool_size,
      queue: QueueDiscipline::Unbounded,
    }
  } else {
    PoolPlan {
      core_pool_size: profile.pool_size,
      max_pool_size: profile.max_pool_size,
      // Positive i32 always fits in usize on supported targets.
      queue: QueueDiscipline::Bounded(profile.max_queue_size as usize),
    }
  };
  Ok(plan)
}

/// Builds executors whose worker threads are named from a shared pattern.
#[derive(Debug, Clone)]
pub struct ThreadPoolBuilder {
  thread_name_pattern: Arc<str>,
  daemon: bool,
}

impl Default for ThreadPoolBuilder {
  fn default() -> Self {
    Self {
      thread_name_pattern: Arc::from(DEFAULT_THREAD_NAME_PATTERN),
      daemon: true,
    }
  }
}

impl ThreadPoolBuilder {
  pub fn new(thread_name_pattern: &str) -> Result<Self, PoolError> {
    validate_thread_name_pattern(thread_name_pattern)?;
    Ok(Self {
      thread_name_pattern: Arc::from(thread_name_pattern),
      daemon: true,
    })
  }

  /// For patterns that were validated when they were stored.
  pub(crate) fn with_validated_pattern(thread_name_pattern: Arc<str>) -> Self {
    Self {
      thread_name_pattern,
      daemon: true,
    }
  }

  /// Daemon flag for the convenience constructors. Custom pools take it from their profile.
  pub fn with_daemon(mut self, daemon: bool) -> Self {
    self.daemon = daemon;
    self
  }

  pub fn thread_name_pattern(&self) -> &str {
    &self.thread_name_pattern
  }

  fn factory(&self, name: &str, daemon: bool) -> NamedThreadFactory {
    NamedThreadFactory::new(&self.thread_name_pattern, name, daemon)
  }

  /// `pool_size` threads working off an unbounded queue.
  pub fn fixed(&self, name: &str, pool_size: usize) -> Arc<ThreadPool> {
    let pool_size = pool_size.max(1);
    Arc::new(ThreadPool::new(ThreadPoolConfig {
      core_pool_size: pool_size,
      max_pool_size: pool_size,
      keep_alive: Duration::ZERO,
      allow_core_thread_timeout: false,
      queue: QueueDiscipline::Unbounded,
      rejection_policy: RejectionPolicy::CallerRuns,
      thread_factory: self.factory(name, self.daemon),
    }))
  }

  pub fn single(&self, name: &str) -> Arc<ThreadPool> {
    self.fixed(name, 1)
  }

  /// Grows on demand with direct hand-off; idle threads go away after a minute.
  pub fn cached(&self, name: &str) -> Arc<ThreadPool> {
    Arc::new(ThreadPool::new(ThreadPoolConfig {
      core_pool_size: 0,
      max_pool_size: usize::MAX,
      keep_alive: CACHED_KEEP_ALIVE,
      allow_core_thread_timeout: false,
      queue: QueueDiscipline::Synchronous,
      rejection_policy: RejectionPolicy::CallerRuns,
      thread_factory: self.factory(name, self.daemon),
    }))
  }

  pub fn scheduled(&self, name: &str, core_pool_size: usize) -> Arc<ScheduledThreadPool> {
    Arc::new(ScheduledThreadPool::new(core_pool_size, self.factory(name, self.daemon)))
  }

  pub fn synchronous(&self, name: &str) -> Arc<SynchronousExecutor> {
    Arc::new(SynchronousExecutor::new(name))
  }

  /// Builds a pool from a fully custom profile.
  ///
  /// # Errors
  /// Returns `PoolError::InvalidPoolSize` if the maximum pool size is below the core size.
  pub fn build_custom(&self, name: &str, profile: &ThreadPoolProfile) -> Result<Arc<ThreadPool>, PoolError> {
    let plan = plan_pool(profile)?;
    if plan.core_pool_size != profile.pool_size {
      debug!(
        pool_name = %name,
        requested_core = profile.pool_size,
        requested_max = profile.max_pool_size,
        "No queue and zero core threads requested. Using a single-thread direct hand-off pool."
      );
    }

    Ok(Arc::new(ThreadPool::new(ThreadPoolConfig {
      core_pool_size: plan.core_pool_size,
      max_pool_size: plan.max_pool_size,
      keep_alive: profile.keep_alive,
      allow_core_thread_timeout: profile.allow_core_thread_timeout,
      queue: plan.queue,
      rejection_policy: profile.rejection_policy,
      thread_factory: self.factory(name, profile.daemon),
    })))
  }

  /// Builds a scheduled pool sized by the profile's core size. Scheduled pools always queue
  /// without bound, so the profile's queue and rejection settings do not apply.
  pub fn build_scheduled(&self, name: &str, profile: &ThreadPoolProfile) -> Result<Arc<ScheduledThreadPool>, PoolError> {
    if profile.max_pool_size < profile.pool_size {
      return Err(PoolError::InvalidPoolSize {
        core_pool_size: profile.pool_size,
        max_pool_size: profile.max_pool_size,
      });
    }
    if profile.pool_size == 0 {
      warn!(pool_name = %name, profile = %profile.id, "Scheduled pool needs at least one core thread. Using 1.");
    }
    Ok(Arc::new(ScheduledThreadPool::new(profile.pool_size, self.factory(name, profile.daemon))))
  }
}
