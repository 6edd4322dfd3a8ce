use crate::error::PoolError;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::trace;

/// The pattern used when nothing else is configured.
pub const DEFAULT_THREAD_NAME_PATTERN: &str = "Thread ${counter} - ${name}";

const COUNTER_TOKEN: &str = "${counter}";
const LONG_NAME_TOKEN: &str = "${longName}";
const NAME_TOKEN: &str = "${name}";

// Stands in for `$` characters of the caller supplied name while placeholders are resolved.
// Must not contain `$`, `{` or `}` itself.
const DOLLAR_SENTINEL: &str = "\u{1}DOLLAR\u{1}";

/// Process wide counter embedded in every thread name. Only ever moves forward.
struct ThreadCounter {
  value: AtomicU64,
}

impl ThreadCounter {
  fn new() -> Self {
    Self { value: AtomicU64::new(0) }
  }

  fn increment_and_get(&self) -> u64 {
    self.value.fetch_add(1, Ordering::Relaxed) + 1
  }
}

lazy_static::lazy_static! {
  static ref THREAD_COUNTER: ThreadCounter = ThreadCounter::new();
}

/// Returns the next value of the global thread counter. The first call returns `1`.
pub fn next_thread_counter() -> u64 {
  THREAD_COUNTER.increment_and_get()
}

/// Resolves a thread name from `pattern`, consuming one value of the global counter.
///
/// The first occurrence of `${counter}`, `${longName}` and `${name}` is replaced with the
/// counter, the full `name`, and `name` cut at its first `?` respectively. Anything that still
/// looks like a placeholder afterwards makes the pattern invalid.
pub fn resolve_thread_name(pattern: &str, name: &str) -> Result<String, PoolError> {
  substitute(pattern, name, next_thread_counter())
}

/// Checks `pattern` without consuming a counter value.
pub fn validate_thread_name_pattern(pattern: &str) -> Result<(), PoolError> {
  substitute(pattern, "name", 0).map(|_| ())
}

fn substitute(pattern: &str, name: &str, counter: u64) -> Result<String, PoolError> {
  let long_name = name.replace('$', DOLLAR_SENTINEL);
  let short_name = match long_name.find('?') {
    Some(idx) => &long_name[..idx],
    None => long_name.as_str(),
  };

  let resolved = pattern
    .replacen(COUNTER_TOKEN, &counter.to_string(), 1)
    .replacen(LONG_NAME_TOKEN, &long_name, 1)
    .replacen(NAME_TOKEN, short_name, 1);

  if resolved.contains('$') || resolved.contains("${") || resolved.contains('}') {
    return Err(PoolError::InvalidThreadNamePattern {
      pattern: pattern.to_string(),
      resolved: resolved.replace(DOLLAR_SENTINEL, "$"),
    });
  }

  Ok(resolved.replace(DOLLAR_SENTINEL, "$"))
}

/// A thread spawned by a [`NamedThreadFactory`].
///
/// Daemon threads are detached at creation, so only non-daemon threads carry a join handle.
#[derive(Debug)]
pub struct WorkerThread {
  name: String,
  handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_daemon(&self) -> bool {
    self.handle.is_none()
  }

  pub fn into_join_handle(self) -> Option<JoinHandle<()>> {
    self.handle
  }
}

/// Produces worker threads with unique, human readable names.
#[derive(Debug, Clone)]
pub struct NamedThreadFactory {
  pattern: Arc<str>,
  name: Arc<str>,
  daemon: bool,
}

impl NamedThreadFactory {
  pub fn new(pattern: &str, name: &str, daemon: bool) -> Self {
    Self {
      pattern: Arc::from(pattern),
      name: Arc::from(name),
      daemon,
    }
  }

  pub fn pattern(&self) -> &str {
    &self.pattern
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_daemon(&self) -> bool {
    self.daemon
  }

  /// Spawns `runnable` on a freshly named OS thread.
  pub fn new_thread<F>(&self, runnable: F) -> Result<WorkerThread, PoolError>
  where
    F: FnOnce() + Send + 'static,
  {
    let thread_name = resolve_thread_name(&self.pattern, &self.name)?;
    let handle = thread::Builder::new()
      .name(thread_name.clone())
      .spawn(runnable)
      .map_err(|e| PoolError::ThreadSpawn(e.to_string()))?;

    trace!(thread_name = %thread_name, source = %self.name, daemon = self.daemon, "Created thread.");

    Ok(WorkerThread {
      name: thread_name,
      handle: if self.daemon { None } else { Some(handle) },
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::mpsc;

  #[test]
  fn test_substitutes_all_placeholders() {
    let name = substitute("Pool ${counter} - ${name} (${longName})", "seda://in?size=5", 7).unwrap();
    assert_eq!(name, "Pool 7 - seda://in (seda://in?size=5)");
  }

  #[test]
  fn test_only_first_occurrence_is_replaced() {
    let err = substitute("${name}-${name}", "worker", 1).unwrap_err();
    assert!(matches!(err, PoolError::InvalidThreadNamePattern { .. }));
  }

  #[test]
  fn test_dollar_in_name_survives() {
    let name = substitute("T ${counter} - ${name}", "job$42", 3).unwrap();
    assert_eq!(name, "T 3 - job$42");
  }

  #[test]
  fn test_unknown_placeholder_is_rejected() {
    let err = substitute("T ${counter} - ${camelId}", "job", 1).unwrap_err();
    assert_eq!(
      err,
      PoolError::InvalidThreadNamePattern {
        pattern: "T ${counter} - ${camelId}".to_string(),
        resolved: "T 1 - ${camelId}".to_string(),
      }
    );
    assert!(err.is_configuration_error());
  }

  #[test]
  fn test_stray_brace_is_rejected() {
    assert!(validate_thread_name_pattern("T ${counter} }").is_err());
    assert!(validate_thread_name_pattern(DEFAULT_THREAD_NAME_PATTERN).is_ok());
  }

  #[test]
  fn test_counter_is_strictly_increasing() {
    let first = next_thread_counter();
    let second = next_thread_counter();
    assert!(second > first);
  }

  #[test]
  fn test_factory_names_spawned_thread() {
    let factory = NamedThreadFactory::new("Unit ${counter} - ${name}", "factory-test", false);
    let (tx, rx) = mpsc::channel();
    let worker = factory
      .new_thread(move || {
        let _ = tx.send(thread::current().name().map(str::to_string));
      })
      .unwrap();

    let seen = rx.recv().unwrap().unwrap();
    assert_eq!(seen, worker.name());
    assert!(seen.starts_with("Unit "));
    assert!(seen.ends_with(" - factory-test"));
    assert!(!worker.is_daemon());
    worker.into_join_handle().unwrap().join().unwrap();
  }

  #[test]
  fn test_daemon_thread_is_detached() {
    let factory = NamedThreadFactory::new(DEFAULT_THREAD_NAME_PATTERN, "daemon-test", true);
    let worker = factory.new_thread(|| {}).unwrap();
    assert!(worker.is_daemon());
    assert!(worker.into_join_handle().is_none());
  }
}
