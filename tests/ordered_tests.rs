use rand::Rng;
use route_executors::{
  Completion, ExecutorHandle, OrderedCompletionService, PoolError, RejectionPolicy, StreamState, ThreadPoolBuilder,
  ThreadPoolProfile,
};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tokio::time::sleep;

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

fn fixed_pool(name: &str, size: usize) -> ExecutorHandle {
  ThreadPoolBuilder::default().fixed(name, size)
}

#[test]
fn test_results_follow_submission_order_not_completion_order() {
  setup_tracing_for_test();
  let service = OrderedCompletionService::new(fixed_pool("ordered_reversed", 2));

  let slow = service
    .submit(|| {
      thread::sleep(Duration::from_millis(200));
      "A"
    })
    .unwrap();
  let fast = service.submit(|| "B").unwrap();
  assert!(slow < fast);

  // B finishes first but must wait for A.
  thread::sleep(Duration::from_millis(50));
  assert_eq!(service.poll(), None);

  assert_eq!(service.take(), Some(Completion::Ready(Ok("A"))));
  assert_eq!(service.take(), Some(Completion::Ready(Ok("B"))));
  assert_eq!(service.outstanding(), 0);
  assert_eq!(service.delivered(), 2);
}

#[test]
fn test_timeout_task_drains_without_blocking() {
  setup_tracing_for_test();
  let service = OrderedCompletionService::new(fixed_pool("ordered_timeout", 3));

  service.submit(|| 1u32).unwrap();
  service.submit(|| 2u32).unwrap();
  let (release_hung, hung) = mpsc::channel::<()>();
  service
    .submit(move || {
      let _ = hung.recv();
      3u32
    })
    .unwrap();

  // Let the first two finish.
  thread::sleep(Duration::from_millis(100));
  service.timeout_task();
  assert_eq!(service.state(), StreamState::Draining);

  let started = Instant::now();
  assert_eq!(service.take(), Some(Completion::Ready(Ok(1))));
  assert_eq!(service.take(), Some(Completion::Ready(Ok(2))));
  assert_eq!(service.take(), Some(Completion::TimedOut));
  assert_eq!(service.take(), None);
  assert!(started.elapsed() < Duration::from_secs(1), "draining took {:?}", started.elapsed());

  // The hung task finishes later; its result has nowhere to go.
  release_hung.send(()).unwrap();
  thread::sleep(Duration::from_millis(50));
  assert_eq!(service.poll(), None);
  assert_eq!(service.outstanding(), 0);
  assert_eq!(service.submit(|| 4u32), Err(PoolError::CompletionServiceClosed));
}

#[test]
fn test_timeout_task_wakes_blocked_taker() {
  setup_tracing_for_test();
  let service = OrderedCompletionService::new(fixed_pool("ordered_wake_taker", 1));
  let (_release, hung) = mpsc::channel::<()>();
  service
    .submit(move || {
      let _ = hung.recv();
    })
    .unwrap();

  let supervisor = service.clone();
  let timer = thread::spawn(move || {
    thread::sleep(Duration::from_millis(100));
    supervisor.timeout_task();
  });

  let started = Instant::now();
  assert_eq!(service.take(), Some(Completion::TimedOut));
  assert!(started.elapsed() >= Duration::from_millis(100));
  timer.join().unwrap();
}

#[tokio::test]
async fn test_take_async_delivers_in_order_and_observes_timeout() {
  setup_tracing_for_test();
  let service = OrderedCompletionService::new(fixed_pool("ordered_async", 2));

  service
    .submit(|| {
      thread::sleep(Duration::from_millis(100));
      10
    })
    .unwrap();
  service.submit(|| 20).unwrap();
  let (_release, hung) = mpsc::channel::<()>();
  service
    .submit(move || {
      let _ = hung.recv();
      30
    })
    .unwrap();

  assert_eq!(service.take_async().await, Some(Completion::Ready(Ok(10))));
  assert_eq!(service.take_async().await, Some(Completion::Ready(Ok(20))));

  let supervisor = service.clone();
  tokio::spawn(async move {
    sleep(Duration::from_millis(50)).await;
    supervisor.timeout_task();
  });
  service.draining().await;
  assert_eq!(service.take_async().await, Some(Completion::TimedOut));
  assert_eq!(service.take_async().await, None);
}

#[test]
fn test_panics_stay_in_their_slot() {
  setup_tracing_for_test();
  let service = OrderedCompletionService::new(fixed_pool("ordered_panic", 2));

  service.submit(|| 1).unwrap();
  service.submit(|| -> i32 { panic!("slot two failed") }).unwrap();
  service.submit(|| 3).unwrap();

  assert_eq!(service.take(), Some(Completion::Ready(Ok(1))));
  match service.take() {
    Some(Completion::Ready(Err(PoolError::TaskPanicked(message)))) => assert!(message.contains("slot two failed")),
    other => panic!("Expected a panicked slot, got {:?}", other),
  }
  assert_eq!(service.take(), Some(Completion::Ready(Ok(3))));
}

#[test]
fn test_task_errors_are_delivered_as_values() {
  setup_tracing_for_test();
  let service: OrderedCompletionService<Result<u8, String>> =
    OrderedCompletionService::new(fixed_pool("ordered_task_errors", 1));

  service.submit(|| Err("bad input".to_string())).unwrap();
  service.submit(|| Ok(9)).unwrap();

  assert_eq!(service.take(), Some(Completion::Ready(Ok(Err("bad input".to_string())))));
  assert_eq!(service.take(), Some(Completion::Ready(Ok(Ok(9)))));
}

#[test]
fn test_refused_submission_leaves_no_slot_behind() {
  setup_tracing_for_test();
  let profile = ThreadPoolProfile::new("ordered_abort")
    .with_pool_size(1)
    .with_max_pool_size(1)
    .with_max_queue_size(1)
    .with_rejection_policy(RejectionPolicy::Abort);
  let pool = ThreadPoolBuilder::default().build_custom("ordered_abort", &profile).unwrap();
  let service = OrderedCompletionService::new(pool);

  let (release, gate) = mpsc::channel::<()>();
  service
    .submit(move || {
      let _ = gate.recv();
      "first"
    })
    .unwrap();
  service.submit(|| "second").unwrap();

  let refused = service.submit(|| "third");
  assert!(matches!(refused, Err(PoolError::Rejected { .. })));
  assert_eq!(service.outstanding(), 2);

  release.send(()).unwrap();
  assert_eq!(service.take(), Some(Completion::Ready(Ok("first"))));
  assert_eq!(service.take(), Some(Completion::Ready(Ok("second"))));
  assert_eq!(service.poll_timeout(Duration::from_millis(50)), None);
}

#[test]
fn test_discarded_task_resolves_its_slot() {
  setup_tracing_for_test();
  let profile = ThreadPoolProfile::new("ordered_discard")
    .with_pool_size(1)
    .with_max_pool_size(1)
    .with_max_queue_size(1)
    .with_rejection_policy(RejectionPolicy::Discard);
  let pool = ThreadPoolBuilder::default().build_custom("ordered_discard", &profile).unwrap();
  let service = OrderedCompletionService::new(pool);

  let (release, gate) = mpsc::channel::<()>();
  service
    .submit(move || {
      let _ = gate.recv();
      1
    })
    .unwrap();
  service.submit(|| 2).unwrap();
  service.submit(|| 3).unwrap();

  release.send(()).unwrap();
  assert_eq!(service.take(), Some(Completion::Ready(Ok(1))));
  assert_eq!(service.take(), Some(Completion::Ready(Ok(2))));
  assert_eq!(service.take(), Some(Completion::Ready(Err(PoolError::TaskDiscarded))));
}

#[test]
fn test_close_rejects_submissions_and_drains_remaining_results() {
  setup_tracing_for_test();
  let service = OrderedCompletionService::new(fixed_pool("ordered_close", 1));

  service
    .submit(|| {
      thread::sleep(Duration::from_millis(50));
      "kept"
    })
    .unwrap();
  service.close();
  assert_eq!(service.state(), StreamState::Closed);
  assert_eq!(service.submit(|| "late"), Err(PoolError::CompletionServiceClosed));

  assert_eq!(service.take(), Some(Completion::Ready(Ok("kept"))));
  assert_eq!(service.take(), None);
}

#[test]
fn test_max_outstanding_limits_buffered_results() {
  setup_tracing_for_test();
  let service = OrderedCompletionService::new(fixed_pool("ordered_bounded", 2)).with_max_outstanding(2);

  service.submit(|| 1).unwrap();
  service.submit(|| 2).unwrap();
  assert_eq!(service.submit(|| 3), Err(PoolError::OutstandingLimitReached { limit: 2 }));

  assert_eq!(service.take(), Some(Completion::Ready(Ok(1))));
  service.submit(|| 3).unwrap();
  assert_eq!(service.take(), Some(Completion::Ready(Ok(2))));
  assert_eq!(service.take(), Some(Completion::Ready(Ok(3))));
}

#[test]
fn test_poll_timeout_gives_up_on_slow_head() {
  setup_tracing_for_test();
  let service = OrderedCompletionService::new(fixed_pool("ordered_poll_timeout", 1));
  service
    .submit(|| {
      thread::sleep(Duration::from_millis(300));
      "slow"
    })
    .unwrap();

  let started = Instant::now();
  assert_eq!(service.poll_timeout(Duration::from_millis(50)), None);
  assert!(started.elapsed() < Duration::from_millis(300));
  assert_eq!(service.poll_timeout(Duration::from_secs(5)), Some(Completion::Ready(Ok("slow"))));
}

#[test]
fn test_synchronous_delegate_delivers_immediately() {
  setup_tracing_for_test();
  let executor: ExecutorHandle = ThreadPoolBuilder::default().synchronous("ordered_inline");
  let service = OrderedCompletionService::new(executor);

  for i in 0..5 {
    service.submit(move || i).unwrap();
  }
  for i in 0..5 {
    assert_eq!(service.poll(), Some(Completion::Ready(Ok(i))));
  }
  assert_eq!(service.poll(), None);
}

#[test]
fn test_random_completion_times_preserve_order() {
  setup_tracing_for_test();
  let service = OrderedCompletionService::new(fixed_pool("ordered_jitter", 8));
  let mut rng = rand::rng();

  for i in 0..100usize {
    let pause = Duration::from_millis(rng.random_range(0..15));
    service
      .submit(move || {
        thread::sleep(pause);
        i
      })
      .unwrap();
  }
  service.close();

  let mut delivered = Vec::new();
  while let Some(completion) = service.take() {
    delivered.push(completion.into_result().unwrap().unwrap());
  }
  assert_eq!(delivered, (0..100).collect::<Vec<_>>());
}

#[test]
fn test_timeout_task_racing_a_parking_taker_never_hangs() {
  setup_tracing_for_test();
  for iteration in 0..5000 {
    let service = OrderedCompletionService::new(fixed_pool("ordered_timeout_race", 1));
    let (_release, hung) = mpsc::channel::<()>();
    service
      .submit(move || {
        let _ = hung.recv();
      })
      .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let (done_tx, done) = mpsc::channel();
    let taker = service.clone();
    let taker_barrier = barrier.clone();
    let taker_thread = thread::spawn(move || {
      taker_barrier.wait();
      let first = taker.take();
      let second = taker.take();
      let _ = done_tx.send((first, second));
    });

    barrier.wait();
    service.timeout_task();
    let (first, second) = done
      .recv_timeout(Duration::from_secs(5))
      .unwrap_or_else(|_| panic!("take() missed the time-out signal in iteration {}", iteration));
    assert_eq!(first, Some(Completion::TimedOut));
    assert_eq!(second, None);
    taker_thread.join().unwrap();
  }
}

#[test]
fn test_timeout_task_covers_task_running_inline_on_submitter() {
  setup_tracing_for_test();
  let profile = ThreadPoolProfile::new("ordered_caller_runs")
    .with_pool_size(1)
    .with_max_pool_size(1)
    .with_max_queue_size(1)
    .with_rejection_policy(RejectionPolicy::CallerRuns);
  let pool = ThreadPoolBuilder::default().build_custom("ordered_caller_runs", &profile).unwrap();
  let service = OrderedCompletionService::new(pool);

  let (release_worker, worker_gate) = mpsc::channel::<()>();
  service
    .submit(move || {
      let _ = worker_gate.recv();
      "worker"
    })
    .unwrap();
  service.submit(|| "queued").unwrap();

  // The pool is saturated, so the third task runs on the submitting thread and hangs there.
  let (release_inline, inline_gate) = mpsc::channel::<()>();
  let (started_tx, started) = mpsc::channel::<()>();
  let submitter_service = service.clone();
  let submitter = thread::spawn(move || {
    submitter_service.submit(move || {
      let _ = started_tx.send(());
      let _ = inline_gate.recv();
      "inline"
    })
  });
  started.recv_timeout(Duration::from_secs(5)).unwrap();

  service.timeout_task();
  let started_at = Instant::now();
  for _ in 0..3 {
    assert_eq!(service.poll_timeout(Duration::from_secs(2)), Some(Completion::TimedOut));
  }
  assert_eq!(service.take(), None);
  assert!(started_at.elapsed() < Duration::from_secs(2), "draining took {:?}", started_at.elapsed());

  release_inline.send(()).unwrap();
  assert_eq!(submitter.join().unwrap(), Ok(2));
  release_worker.send(()).unwrap();
  assert_eq!(service.outstanding(), 0);
}

#[test]
fn test_poll_timeout_without_a_bound_waits_like_take() {
  setup_tracing_for_test();
  let service = OrderedCompletionService::new(fixed_pool("ordered_poll_unbounded", 1));
  service
    .submit(|| {
      thread::sleep(Duration::from_millis(50));
      "eventually"
    })
    .unwrap();

  assert_eq!(service.poll_timeout(Duration::MAX), Some(Completion::Ready(Ok("eventually"))));
  service.close();
  assert_eq!(service.poll_timeout(Duration::MAX), None);
}

#[test]
fn test_discard_oldest_resolves_evicted_slot() {
  setup_tracing_for_test();
  let profile = ThreadPoolProfile::new("ordered_discard_oldest")
    .with_pool_size(1)
    .with_max_pool_size(1)
    .with_max_queue_size(1)
    .with_rejection_policy(RejectionPolicy::DiscardOldest);
  let pool = ThreadPoolBuilder::default().build_custom("ordered_discard_oldest", &profile).unwrap();
  let service = OrderedCompletionService::new(pool);

  let (release, gate) = mpsc::channel::<()>();
  service
    .submit(move || {
      let _ = gate.recv();
      1
    })
    .unwrap();
  service.submit(|| 2).unwrap();
  // Evicts the queued second task.
  service.submit(|| 3).unwrap();

  release.send(()).unwrap();
  assert_eq!(service.take(), Some(Completion::Ready(Ok(1))));
  assert_eq!(service.take(), Some(Completion::Ready(Err(PoolError::TaskDiscarded))));
  assert_eq!(service.take(), Some(Completion::Ready(Ok(3))));
}
