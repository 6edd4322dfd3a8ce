use thiserror::Error;

/// Errors that can occur while building, resolving or using executors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("MaxPoolSize must be >= corePoolSize, was {max_pool_size} >= {core_pool_size}")]
  InvalidPoolSize { core_pool_size: usize, max_pool_size: usize },

  #[error("Pattern is invalid: [{pattern}] in resolved thread name: [{resolved}]")]
  InvalidThreadNamePattern { pattern: String, resolved: String },

  #[error("ExecutorServiceRef {reference} not found in registry (as an {kind} instance) or as a thread pool profile")]
  ExecutorRefNotFound { reference: String, kind: &'static str },

  #[error("ExecutorService {reference} is not a ScheduledExecutorService instance")]
  NotSchedulable { reference: String },

  #[error("Task rejected from pool '{pool_name}'")]
  Rejected { pool_name: String },

  #[error("Submitted task panicked: {0}")]
  TaskPanicked(String),

  #[error("Task was cancelled")]
  TaskCancelled,

  #[error("Task was discarded before it ran")]
  TaskDiscarded,

  #[error("Task result already taken or channel was not available")]
  ResultUnavailable,

  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShuttingDown,

  #[error("Ordered completion service no longer accepts submissions")]
  CompletionServiceClosed,

  #[error("Ordered completion service already holds {limit} outstanding results")]
  OutstandingLimitReached { limit: usize },

  #[error("Failed to spawn worker thread: {0}")]
  ThreadSpawn(String),
}

impl PoolError {
  /// Returns `true` for errors caused by a configuration or deployment mistake.
  ///
  /// These are never retried internally and always reach the caller unmodified.
  pub fn is_configuration_error(&self) -> bool {
    matches!(
      self,
      PoolError::InvalidPoolSize { .. }
        | PoolError::InvalidThreadNamePattern { .. }
        | PoolError::ExecutorRefNotFound { .. }
        | PoolError::NotSchedulable { .. }
    )
  }
}
