//! Thread pool provisioning for routing engines: named worker threads, profile driven pool
//! sizing, executor resolution for work definitions, and ordered delivery of parallel results.

mod builder;
mod error;
mod executor;
mod handle;
mod manager;
mod ordered;
mod pool;
mod profile;
mod registry;
mod resolver;
mod scheduled;
mod synchronous;
mod task;
mod task_queue;
mod thread_factory;

pub use builder::{plan_pool, PoolPlan, ThreadPoolBuilder};
pub use error::PoolError;
pub use executor::{
  same_executor, ExecutorHandle, ExecutorService, Period, ScheduleExt, ScheduledExecutorHandle, ScheduledExecutorService,
  ScheduledHandle, SubmitExt,
};
pub use handle::TaskHandle;
pub use manager::{ExecutorServiceManager, ManagerConfig};
pub use ordered::{Completion, OrderedCompletionService, SlotId, StreamState};
pub use pool::{ThreadPool, ThreadPoolConfig};
pub use profile::{QueueDiscipline, RejectionPolicy, ThreadPoolProfile, DEFAULT_PROFILE_ID};
pub use registry::{InMemoryRegistry, Registry};
pub use resolver::{ExecutorPreferences, ExecutorServiceAware, ProfileResolver};
pub use scheduled::ScheduledThreadPool;
pub use synchronous::SynchronousExecutor;
pub use task::Runnable;
pub use thread_factory::{
  next_thread_counter, resolve_thread_name, validate_thread_name_pattern, NamedThreadFactory, WorkerThread,
  DEFAULT_THREAD_NAME_PATTERN,
};
