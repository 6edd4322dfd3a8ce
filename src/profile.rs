use std::time::Duration;

/// The id of the profile every manager starts with.
pub const DEFAULT_PROFILE_ID: &str = "defaultThreadPoolProfile";

/// What a saturated pool does with a task it cannot accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RejectionPolicy {
  /// Run the task on the submitting thread.
  #[default]
  CallerRuns,
  /// Fail the submission with [`PoolError::Rejected`](crate::PoolError::Rejected).
  Abort,
  /// Evict the oldest queued task to make room.
  DiscardOldest,
  /// Silently drop the task.
  Discard,
}

/// How a pool buffers tasks no worker is free to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueDiscipline {
  /// Zero capacity. A task is only accepted when an idle worker takes it directly.
  Synchronous,
  Unbounded,
  Bounded(usize),
}

impl QueueDiscipline {
  pub fn capacity(&self) -> Option<usize> {
    match self {
      QueueDiscipline::Synchronous => Some(0),
      QueueDiscipline::Unbounded => None,
      QueueDiscipline::Bounded(capacity) => Some(*capacity),
    }
  }
}

/// A named, reusable description of a thread pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPoolProfile {
  pub id: String,
  pub default_profile: bool,
  /// Core pool size.
  pub pool_size: usize,
  pub max_pool_size: usize,
  pub keep_alive: Duration,
  /// `<= 0` means unbounded, or direct hand-off when `pool_size` is `0`.
  pub max_queue_size: i32,
  pub allow_core_thread_timeout: bool,
  pub rejection_policy: RejectionPolicy,
  pub daemon: bool,
}

impl Default for ThreadPoolProfile {
  fn default() -> Self {
    Self {
      id: DEFAULT_PROFILE_ID.to_string(),
      default_profile: true,
      pool_size: 10,
      max_pool_size: 20,
      keep_alive: Duration::from_secs(60),
      max_queue_size: 1000,
      allow_core_thread_timeout: false,
      rejection_policy: RejectionPolicy::CallerRuns,
      daemon: true,
    }
  }
}

impl ThreadPoolProfile {
  /// A non-default profile starting from the default values.
  pub fn new(id: &str) -> Self {
    Self {
      id: id.to_string(),
      default_profile: false,
      ..Default::default()
    }
  }

  pub fn with_pool_size(mut self, pool_size: usize) -> Self {
    self.pool_size = pool_size;
    self
  }

  pub fn with_max_pool_size(mut self, max_pool_size: usize) -> Self {
    self.max_pool_size = max_pool_size;
    self
  }

  pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
    self.keep_alive = keep_alive;
    self
  }

  pub fn with_max_queue_size(mut self, max_queue_size: i32) -> Self {
    self.max_queue_size = max_queue_size;
    self
  }

  pub fn with_allow_core_thread_timeout(mut self, allow: bool) -> Self {
    self.allow_core_thread_timeout = allow;
    self
  }

  pub fn with_rejection_policy(mut self, policy: RejectionPolicy) -> Self {
    self.rejection_policy = policy;
    self
  }

  pub fn with_daemon(mut self, daemon: bool) -> Self {
    self.daemon = daemon;
    self
  }

  pub fn as_default_profile(mut self) -> Self {
    self.default_profile = true;
    self
  }
}
