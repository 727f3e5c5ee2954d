//! Scheduler timing integration tests
//!
//! Runs the periodic scheduler under tokio's paused clock so interval
//! arithmetic is exact.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edgelink::scheduler::{PeriodicScheduler, TaskCallback, TaskSet};

fn counting_task(counter: Arc<AtomicUsize>) -> TaskCallback {
    Arc::new(move || {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
}

#[tokio::test(start_paused = true)]
async fn two_tasks_fire_on_independent_intervals() {
    let fast = Arc::new(AtomicUsize::new(0));
    let slow = Arc::new(AtomicUsize::new(0));

    let mut tasks = TaskSet::new();
    tasks.register(
        "heartbeat",
        Some(Duration::from_millis(100)),
        counting_task(fast.clone()),
    );
    tasks.register(
        "data-recovery",
        Some(Duration::from_millis(300)),
        counting_task(slow.clone()),
    );

    let mut scheduler = PeriodicScheduler::new(&tasks);
    scheduler.start();

    tokio::time::sleep(Duration::from_millis(950)).await;

    assert_eq!(fast.load(Ordering::SeqCst), 9);
    assert_eq!(slow.load(Ordering::SeqCst), 3);

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn double_start_arms_one_timer_set_and_double_stop_is_safe() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut tasks = TaskSet::new();
    tasks.register(
        "tick",
        Some(Duration::from_millis(100)),
        counting_task(counter.clone()),
    );

    let mut scheduler = PeriodicScheduler::new(&tasks);
    scheduler.start();
    scheduler.start();
    assert_eq!(scheduler.armed_timers(), 1);

    scheduler.stop();
    scheduler.stop();
    assert_eq!(scheduler.armed_timers(), 0);

    // Nothing fires once stopped.
    let frozen = counter.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(counter.load(Ordering::SeqCst), frozen);
}

#[tokio::test(start_paused = true)]
async fn task_without_interval_never_fires() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut tasks = TaskSet::new();
    tasks.register("declared-only", None, counting_task(counter.clone()));
    tasks.register(
        "scheduled",
        Some(Duration::from_millis(200)),
        counting_task(Arc::new(AtomicUsize::new(0))),
    );

    let mut scheduler = PeriodicScheduler::new(&tasks);
    assert_eq!(scheduler.task_count(), 1);

    scheduler.start();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    scheduler.stop();
}
