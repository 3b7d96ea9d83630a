// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! End-to-end pool behavior: submission, bulk apply, quiescence, both
//! destruction policies, and the profiler contract.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use stealpool::{DestructionPolicy, Profiler, StatsProfiler, ThreadPool};

#[test]
fn drop_with_wait_all_drains_independent_tasks() {
    let slots: Arc<Vec<AtomicU64>> = Arc::new((0..1_000).map(|_| AtomicU64::new(0)).collect());

    {
        let pool = ThreadPool::new(4, DestructionPolicy::WaitAll).unwrap();
        for i in 0..1_000 {
            let slots = Arc::clone(&slots);
            pool.add(move || {
                slots[i].fetch_add(1, Ordering::AcqRel);
            });
        }
    }

    // Exactly once each: a double execution would leave a 2 behind.
    assert!(slots.iter().all(|slot| slot.load(Ordering::Acquire) == 1));
}

#[test]
fn for_each_triples_every_element() {
    let items: Arc<[AtomicU64]> = (0..100_000).map(|_| AtomicU64::new(1)).collect();

    {
        let pool = ThreadPool::new(2, DestructionPolicy::WaitAll).unwrap();
        pool.for_each(Arc::clone(&items), |x| {
            x.store(x.load(Ordering::Acquire) * 3, Ordering::Release);
        });
    }

    assert!(items.iter().all(|x| x.load(Ordering::Acquire) == 3));
}

#[test]
fn wait_current_drop_abandons_queued_work() {
    let started = Arc::new(AtomicUsize::new(0));

    let pool = ThreadPool::new(4, DestructionPolicy::WaitCurrent).unwrap();
    for _ in 0..10_000 {
        let started = Arc::clone(&started);
        pool.add(move || {
            started.fetch_add(1, Ordering::AcqRel);
            thread::sleep(Duration::from_millis(10));
        });
    }

    thread::sleep(Duration::from_millis(50));
    let teardown = Instant::now();
    drop(pool);
    // Bounded by the in-flight tasks (at most one per worker), not by
    // the queued backlog.
    assert!(teardown.elapsed() < Duration::from_secs(2));

    let after_drop = started.load(Ordering::Acquire);
    assert!(after_drop < 10_000, "teardown drained the backlog");

    // Abandoned tasks must never start later.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(started.load(Ordering::Acquire), after_drop);
}

#[test]
fn single_worker_for_each_covers_every_element() {
    let items: Arc<[AtomicU64]> = (0..10).map(AtomicU64::new).collect();

    {
        let pool = ThreadPool::new(1, DestructionPolicy::WaitAll).unwrap();
        pool.for_each(Arc::clone(&items), |x| {
            let v = x.load(Ordering::Acquire);
            x.store(v * v, Ordering::Release);
        });
    }

    let squares: Vec<u64> = items.iter().map(|x| x.load(Ordering::Acquire)).collect();
    assert_eq!(squares, vec![0, 1, 4, 9, 16, 25, 36, 49, 64, 81]);
}

#[test]
fn every_submission_lands_in_the_collector_once() {
    let collected = Arc::new(Mutex::new(Vec::new()));

    {
        let pool = ThreadPool::new(8, DestructionPolicy::WaitAll).unwrap();
        for i in 0..100 {
            let collected = Arc::clone(&collected);
            pool.add(move || {
                collected.lock().unwrap().push(i);
            });
        }
    }

    let mut values = collected.lock().unwrap().clone();
    values.sort_unstable();
    assert_eq!(values, (0..100).collect::<Vec<_>>());
}

#[test]
fn pool_survives_drain_clear_and_resubmit() {
    let items: Arc<[AtomicU64]> = (0..1_000_000).map(|_| AtomicU64::new(0)).collect();
    let second_batch = Arc::new(AtomicUsize::new(0));

    let pool = ThreadPool::new(4, DestructionPolicy::WaitCurrent).unwrap();
    pool.for_each(Arc::clone(&items), |x| {
        x.fetch_add(1, Ordering::AcqRel);
    });
    pool.wait_tasks();
    pool.clear_tasks();

    for _ in 0..100 {
        let second_batch = Arc::clone(&second_batch);
        pool.add(move || {
            second_batch.fetch_add(1, Ordering::AcqRel);
        });
    }
    pool.wait_tasks();

    assert_eq!(second_batch.load(Ordering::Acquire), 100);
    assert!(items.iter().all(|x| x.load(Ordering::Acquire) == 1));
}

#[test]
fn idle_pool_tears_down_promptly() {
    let teardown = Instant::now();
    {
        let _pool = ThreadPool::new(4, DestructionPolicy::WaitAll).unwrap();
        // Workers are parked in their blocking pop; termination must
        // wake and join them without any task traffic.
    }
    assert!(teardown.elapsed() < Duration::from_secs(2));
}

#[test]
fn for_each_handles_empty_and_tiny_inputs() {
    let pool = ThreadPool::new(4, DestructionPolicy::WaitCurrent).unwrap();

    let empty: Arc<[AtomicU64]> = Arc::from(Vec::new().into_boxed_slice());
    pool.for_each(Arc::clone(&empty), |_| unreachable!("empty input"));

    // Fewer elements than workers exercises the remainder-only path.
    let tiny: Arc<[AtomicU64]> = (0..3).map(|_| AtomicU64::new(0)).collect();
    pool.for_each(Arc::clone(&tiny), |x| {
        x.fetch_add(1, Ordering::AcqRel);
    });
    pool.wait_tasks();

    assert!(tiny.iter().all(|x| x.load(Ordering::Acquire) == 1));
}

#[test]
fn profiler_observes_every_completed_task() {
    let profiler = Arc::new(StatsProfiler::new());
    let ran = Arc::new(AtomicUsize::new(0));

    {
        let pool =
            ThreadPool::with_profiler(
                2,
                DestructionPolicy::WaitAll,
                Arc::clone(&profiler) as Arc<dyn Profiler>,
            )
            .unwrap();
        for _ in 0..100 {
            let ran = Arc::clone(&ran);
            pool.add(move || {
                ran.fetch_add(1, Ordering::AcqRel);
            });
        }
    }

    assert_eq!(ran.load(Ordering::Acquire), 100);
    let per_thread = profiler.per_thread();
    let completed: u64 = per_thread.values().map(|stats| stats.completed_tasks).sum();
    assert_eq!(completed, 100);
    let locks: u64 = per_thread.values().map(|stats| stats.locks).sum();
    let unlocks: u64 = per_thread.values().map(|stats| stats.unlocks).sum();
    assert_eq!(locks, unlocks);
    assert!(profiler.to_string().contains("completed tasks"));
}
