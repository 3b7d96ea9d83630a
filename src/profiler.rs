// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Optional observer for lock, wait, and task timings.
//!
//! The pool and its queues report events through the [`Profiler`] trait;
//! every method defaults to a no-op, so a sink only overrides what it
//! cares about. Without a sink the hot paths pay a single `Option` check.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Passive sink for scheduling events.
///
/// Events fire from whichever worker or submitting thread observed them,
/// concurrently; the sink is responsible for its own synchronization.
/// Callers treat every method as fire-and-forget.
pub trait Profiler: Send + Sync {
    /// A deque mutex was acquired by the calling thread.
    fn on_lock(&self) {}

    /// The deque mutex held by the calling thread was released.
    fn on_unlock(&self) {}

    /// The calling thread spent `blocked` inside a blocking pop.
    fn on_wait(&self, blocked: Duration) {
        let _ = blocked;
    }

    /// A task ran to completion on the calling thread in `elapsed`.
    fn on_task(&self, elapsed: Duration) {
        let _ = elapsed;
    }
}

/// Per-thread counters collected by [`StatsProfiler`].
#[derive(Debug, Default, Clone)]
pub struct ThreadStats {
    /// Total time the thread held a deque mutex.
    pub lock_held: Duration,
    /// Number of lock acquisitions.
    pub locks: u64,
    /// Number of lock releases.
    pub unlocks: u64,
    /// Total time spent blocked waiting for work.
    pub blocked: Duration,
    /// Total wall time spent running tasks.
    pub task_time: Duration,
    /// Number of tasks run to completion.
    pub completed_tasks: u64,
}

#[derive(Default)]
struct Slot {
    stats: ThreadStats,
    lock_started: Option<Instant>,
}

/// A [`Profiler`] that accumulates [`ThreadStats`] keyed by OS thread.
///
/// `Display` prints one block per observed thread. Counters are only
/// consistent once the pool has been dropped (no more concurrent writers).
#[derive(Default)]
pub struct StatsProfiler {
    threads: Mutex<HashMap<ThreadId, Slot>>,
}

impl StatsProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the per-thread counters.
    pub fn per_thread(&self) -> HashMap<ThreadId, ThreadStats> {
        let threads = self.threads.lock().unwrap();
        threads
            .iter()
            .map(|(id, slot)| (*id, slot.stats.clone()))
            .collect()
    }

    fn with_slot(&self, f: impl FnOnce(&mut Slot)) {
        let mut threads = self.threads.lock().unwrap();
        f(threads.entry(thread::current().id()).or_default());
    }
}

impl Profiler for StatsProfiler {
    fn on_lock(&self) {
        self.with_slot(|slot| {
            slot.stats.locks += 1;
            slot.lock_started = Some(Instant::now());
        });
    }

    fn on_unlock(&self) {
        self.with_slot(|slot| {
            slot.stats.unlocks += 1;
            if let Some(started) = slot.lock_started.take() {
                slot.stats.lock_held += started.elapsed();
            }
        });
    }

    fn on_wait(&self, blocked: Duration) {
        self.with_slot(|slot| slot.stats.blocked += blocked);
    }

    fn on_task(&self, elapsed: Duration) {
        self.with_slot(|slot| {
            slot.stats.task_time += elapsed;
            slot.stats.completed_tasks += 1;
        });
    }
}

impl fmt::Display for StatsProfiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let threads = self.threads.lock().unwrap();
        for (id, slot) in threads.iter() {
            let s = &slot.stats;
            let average = if s.completed_tasks == 0 {
                Duration::ZERO
            } else {
                s.task_time / s.completed_tasks as u32
            };
            writeln!(f, "thread {:?}", id)?;
            writeln!(f, "\tlock time: {:?}", s.lock_held)?;
            writeln!(f, "\tlocks: {} unlocks: {}", s.locks, s.unlocks)?;
            writeln!(f, "\twait time: {:?}", s.blocked)?;
            writeln!(f, "\tcompleted tasks: {}", s.completed_tasks)?;
            writeln!(f, "\ttask time: {:?} (avg {:?})", s.task_time, average)?;
        }
        Ok(())
    }
}
