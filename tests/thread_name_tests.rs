use route_executors::{
  next_thread_counter, resolve_thread_name, validate_thread_name_pattern, ExecutorServiceManager, ManagerConfig,
  NamedThreadFactory, PoolError, SubmitExt, ThreadPoolBuilder, DEFAULT_THREAD_NAME_PATTERN,
};
use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,route_executors=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

#[test]
fn test_concurrently_created_names_are_unique() {
  setup_tracing_for_test();
  let factory = NamedThreadFactory::new(DEFAULT_THREAD_NAME_PATTERN, "unique", true);
  let (tx, rx) = mpsc::channel::<String>();

  // Many creators share one pattern and one name; only the counter tells threads apart.
  let creators: Vec<_> = (0..8)
    .map(|_| {
      let factory = factory.clone();
      let tx = tx.clone();
      thread::spawn(move || {
        for _ in 0..25 {
          let tx = tx.clone();
          let worker = factory
            .new_thread(move || {
              let name = thread::current().name().unwrap_or_default().to_string();
              let _ = tx.send(name);
            })
            .unwrap();
          assert!(worker.is_daemon());
        }
      })
    })
    .collect();
  drop(tx);
  for creator in creators {
    creator.join().unwrap();
  }

  let names: Vec<String> = rx.iter().collect();
  assert_eq!(names.len(), 200);
  let distinct: HashSet<&String> = names.iter().collect();
  assert_eq!(distinct.len(), names.len());
  assert!(names.iter().all(|name| name.ends_with(" - unique")));
}

#[test]
fn test_resolved_names_never_keep_placeholder_characters() {
  let patterns = [
    "Thread ${counter} - ${name}",
    "${longName} #${counter} (${name})",
    "[${name}|${longName}|${counter}]",
  ];
  let names = ["plain", "timer://foo?period=1000", "seda:in?concurrentConsumers=5", "with spaces", ""];

  for pattern in patterns {
    for name in names {
      let resolved = resolve_thread_name(pattern, name).unwrap();
      assert!(
        !resolved.contains('$') && !resolved.contains('{') && !resolved.contains('}'),
        "pattern {} with name {:?} resolved to {}",
        pattern,
        name,
        resolved
      );
    }
  }
}

#[test]
fn test_short_and_long_name_split_at_query() {
  let resolved = resolve_thread_name("${name} / ${longName}", "timer://foo?period=1000").unwrap();
  assert_eq!(resolved, "timer://foo / timer://foo?period=1000");
}

#[test]
fn test_dollar_in_name_appears_verbatim() {
  setup_tracing_for_test();
  let resolved = resolve_thread_name(DEFAULT_THREAD_NAME_PATTERN, "job$42").unwrap();
  assert!(resolved.ends_with(" - job$42"), "resolved to {}", resolved);

  let resolved = resolve_thread_name("${longName}", "a$b${c}").unwrap_err();
  assert!(matches!(resolved, PoolError::InvalidThreadNamePattern { .. }));

  // The name survives on real threads too.
  let pool = ThreadPoolBuilder::default().single("job$42");
  let thread_name = pool
    .submit(|| thread::current().name().unwrap_or_default().to_string())
    .unwrap()
    .get()
    .unwrap();
  assert!(thread_name.ends_with(" - job$42"), "thread named {}", thread_name);
}

#[test]
fn test_unresolved_placeholder_reports_pattern_and_result() {
  let err = resolve_thread_name("Worker ${index} - ${name}", "orders").unwrap_err();
  match err {
    PoolError::InvalidThreadNamePattern { pattern, resolved } => {
      assert_eq!(pattern, "Worker ${index} - ${name}");
      assert_eq!(resolved, "Worker ${index} - orders");
    }
    other => panic!("Expected InvalidThreadNamePattern, got {:?}", other),
  }
}

#[test]
fn test_validation_checks_repeated_placeholders() {
  // Only the first occurrence is replaced.
  let before = next_thread_counter();
  validate_thread_name_pattern(DEFAULT_THREAD_NAME_PATTERN).unwrap();
  assert!(validate_thread_name_pattern("${counter}${counter}").is_err());
  let after = next_thread_counter();
  assert!(after > before);
}

#[test]
fn test_manager_rejects_invalid_pattern_and_keeps_old_one() {
  setup_tracing_for_test();
  let manager = ExecutorServiceManager::with_defaults();
  let err = manager.set_thread_name_pattern("${name} ${unknown}").unwrap_err();
  assert!(err.is_configuration_error());
  assert_eq!(manager.thread_name_pattern(), DEFAULT_THREAD_NAME_PATTERN);

  manager.set_thread_name_pattern("Route ${name} #${counter}").unwrap();
  let pool = manager.new_single_thread_executor("test", "patterned");
  let thread_name = pool
    .submit(|| thread::current().name().unwrap_or_default().to_string())
    .unwrap()
    .get()
    .unwrap();
  assert!(thread_name.starts_with("Route patterned #"), "thread named {}", thread_name);
  manager.shutdown(&pool);
}

#[test]
fn test_manager_pools_use_configured_pattern() {
  setup_tracing_for_test();
  let manager = ExecutorServiceManager::new(ManagerConfig {
    thread_name_pattern: "Ctx ${name} #${counter}".to_string(),
    ..Default::default()
  })
  .unwrap();

  let fixed = manager.new_fixed_thread_pool("test", "configured_fixed", 1);
  let cached = manager.new_cached_thread_pool("test", "configured_cached");
  let scheduled = manager.new_scheduled_thread_pool_sized("test", "configured_scheduled", 1);

  let names = [
    fixed.submit(|| thread::current().name().unwrap_or_default().to_string()).unwrap().get().unwrap(),
    cached.submit(|| thread::current().name().unwrap_or_default().to_string()).unwrap().get().unwrap(),
    scheduled.submit(|| thread::current().name().unwrap_or_default().to_string()).unwrap().get().unwrap(),
  ];
  assert!(names[0].starts_with("Ctx configured_fixed #"), "thread named {}", names[0]);
  assert!(names[1].starts_with("Ctx configured_cached #"), "thread named {}", names[1]);
  assert!(names[2].starts_with("Ctx configured_scheduled #"), "thread named {}", names[2]);
  assert!(names.iter().all(|name| !name.contains('$')));

  manager.shutdown_all();
}
