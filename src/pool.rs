// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Thread pool: submission, load balancing, quiescence, shutdown.
//!
//! The pool owns N workers. A submission is pushed to the front of a
//! random worker's deque; idle workers steal from the backs of peer
//! deques. Quiescence is tracked by one atomic counter: +1 before a task
//! becomes visible, −1 after it finishes, so `wait_tasks` never returns
//! while work is live.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use rand::Rng;
use tracing::debug;

use crate::error::SpawnError;
use crate::profiler::Profiler;
use crate::queue::StealingQueue;
use crate::worker::{StealFn, Task, TaskCountFn, Worker};

/// What happens to queued-but-unstarted work when the pool is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestructionPolicy {
    /// Finish tasks already executing; abandon the rest.
    #[default]
    WaitCurrent,
    /// Drain everything queued, then tear down.
    WaitAll,
}

/// Fixed-size work-stealing thread pool.
///
/// Tasks are opaque `FnOnce()` callables with no result channel; clients
/// observe completion through [`ThreadPool::wait_tasks`] or by dropping
/// the pool under [`DestructionPolicy::WaitAll`]. Execution order is
/// unspecified: owners pop LIFO, thieves steal FIFO, and nothing orders
/// tasks across workers.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<Worker>,
    policy: DestructionPolicy,
}

/// State reachable from worker threads and recursive tasks. Deques are
/// all created before the first thread starts, so the steal scan never
/// observes a half-built pool.
struct Shared {
    queues: Vec<Arc<StealingQueue<Task>>>,
    outstanding: AtomicUsize,
    terminated: AtomicBool,
    profiler: Option<Arc<dyn Profiler>>,
}

impl Shared {
    fn add(&self, task: Task) {
        // Per-caller generator; no random engine is shared across threads.
        let victim = rand::thread_rng().gen_range(0..self.queues.len());
        self.add_to(victim, task);
    }

    /// The +1 precedes the push: the counter can never miss a task that
    /// a consumer already sees.
    fn add_to(&self, index: usize, task: Task) {
        self.task_count_delta(1);
        self.queues[index].push(task);
    }

    fn task_count_delta(&self, delta: isize) {
        if delta < 0 {
            self.outstanding
                .fetch_sub(delta.unsigned_abs(), Ordering::AcqRel);
        } else {
            self.outstanding.fetch_add(delta as usize, Ordering::AcqRel);
        }
    }

    /// Circular scan over every deque starting at `start`. The caller's
    /// own deque is among the candidates; a self-steal attempt is
    /// harmless since it only happens when that deque just ran dry.
    fn steal_from(&self, start: usize) -> Option<Task> {
        if self.terminated.load(Ordering::Acquire) {
            return None;
        }
        let n = self.queues.len();
        for offset in 0..n {
            if let Some(task) = self.queues[(start + offset) % n].try_steal() {
                return Some(task);
            }
        }
        None
    }
}

impl ThreadPool {
    /// Start `thread_count` workers.
    ///
    /// # Panics
    ///
    /// Panics if `thread_count` is zero; a pool without workers is a
    /// caller bug, not a runtime condition.
    pub fn new(thread_count: usize, policy: DestructionPolicy) -> Result<Self, SpawnError> {
        Self::build(thread_count, policy, None)
    }

    /// Like [`ThreadPool::new`], with a profiler observing lock, wait,
    /// and task-duration events.
    pub fn with_profiler(
        thread_count: usize,
        policy: DestructionPolicy,
        profiler: Arc<dyn Profiler>,
    ) -> Result<Self, SpawnError> {
        Self::build(thread_count, policy, Some(profiler))
    }

    fn build(
        thread_count: usize,
        policy: DestructionPolicy,
        profiler: Option<Arc<dyn Profiler>>,
    ) -> Result<Self, SpawnError> {
        assert!(thread_count > 0, "thread pool requires at least one worker");

        let queues = (0..thread_count)
            .map(|_| Arc::new(StealingQueue::with_profiler(profiler.clone())))
            .collect();
        let shared = Arc::new(Shared {
            queues,
            outstanding: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
            profiler,
        });

        let count: TaskCountFn = {
            let shared = Arc::clone(&shared);
            Arc::new(move |delta| shared.task_count_delta(delta))
        };

        let mut workers = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let spawned = Worker::spawn(
                index,
                Arc::clone(&shared.queues[index]),
                steal_fn(&shared, index),
                Arc::clone(&count),
                shared.profiler.clone(),
            );
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    // Tear the partial pool down before surfacing the error.
                    shared.terminated.store(true, Ordering::Release);
                    for worker in &mut workers {
                        worker.terminate();
                    }
                    return Err(err.into());
                }
            }
        }

        Ok(Self {
            shared,
            workers,
            policy,
        })
    }

    /// Queue `task` for eventual execution on a random worker. Returns
    /// immediately.
    pub fn add<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.add(Box::new(task));
    }

    /// Apply `f` to every element of `items`, split across the pool.
    /// Returns immediately; observe completion via
    /// [`ThreadPool::wait_tasks`] or a [`DestructionPolicy::WaitAll`]
    /// drop.
    ///
    /// Each worker receives one `len / N` chunk whose task re-splits the
    /// chunk the same way, so long runs stay stealable; the remainder is
    /// submitted to random victims. Element mutation goes through
    /// interior mutability on `T` (atomics, mutexes). The `Arc` keeps
    /// the storage alive until the last chunk finishes.
    pub fn for_each<T, F>(&self, items: Arc<[T]>, f: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let range = 0..items.len();
        for_each_split(&self.shared, items, range, Arc::new(f));
    }

    /// Drop every queued-but-unstarted task. Tasks already executing are
    /// unaffected. Dropped tasks are subtracted from the outstanding
    /// counter, so a concurrent [`ThreadPool::wait_tasks`] cannot hang
    /// on work that will never run.
    pub fn clear_tasks(&self) {
        let mut dropped = 0;
        for queue in &self.shared.queues {
            dropped += queue.clear();
        }
        if dropped > 0 {
            self.shared.task_count_delta(-(dropped as isize));
            debug!("cleared {dropped} queued tasks");
        }
    }

    /// Block the calling thread until every previously submitted task
    /// has finished.
    ///
    /// Quiescence is a property of the snapshot at the call: submissions
    /// racing with the call may extend the wait.
    pub fn wait_tasks(&self) {
        while self.shared.outstanding.load(Ordering::Acquire) != 0 {
            thread::yield_now();
        }
    }

    /// Number of workers; fixed for the pool's lifetime.
    pub fn thread_count(&self) -> usize {
        self.shared.queues.len()
    }

    fn terminate(&mut self) {
        self.shared.terminated.store(true, Ordering::Release);
        // Flag and wake everyone before the first join, so teardown
        // latency is bounded by the longest in-flight task rather than
        // by queued backlogs.
        for worker in &self.workers {
            worker.request_stop();
        }
        for worker in &mut self.workers {
            worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if self.policy == DestructionPolicy::WaitAll {
            self.wait_tasks();
        }
        debug!("pool shutting down");
        self.terminate();
    }
}

/// Steal callback handed to worker `index`. Owns its xorshift state, so
/// victim selection needs no shared engine and no lock.
fn steal_fn(shared: &Arc<Shared>, index: usize) -> StealFn {
    let shared = Arc::clone(shared);
    let mut state = (index as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    Box::new(move || {
        let start = xorshift64(&mut state) as usize % shared.queues.len();
        shared.steal_from(start)
    })
}

fn xorshift64(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn for_each_split<T, F>(shared: &Arc<Shared>, items: Arc<[T]>, range: Range<usize>, f: Arc<F>)
where
    T: Send + Sync + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    let len = range.len();
    if len == 0 {
        return;
    }

    let worker_count = shared.queues.len();
    if worker_count == 1 {
        // A single worker's chunk is the whole range and cannot shrink,
        // so apply it element-wise in one task.
        shared.add_to(
            0,
            Box::new(move || {
                for item in &items[range] {
                    (*f)(item);
                }
            }),
        );
        return;
    }

    let per_worker = len / worker_count;
    let remainder = len % worker_count;
    let mut next = range.start;

    if per_worker > 0 {
        for index in 0..worker_count {
            let chunk = next..next + per_worker;
            next = chunk.end;
            let task = split_task(shared, Arc::clone(&items), chunk, Arc::clone(&f));
            shared.add_to(index, task);
        }
    }

    match remainder {
        0 => {}
        1 => {
            let index = next;
            shared.add(Box::new(move || (*f)(&items[index])));
        }
        _ => {
            let mid = next + remainder / 2;
            let left = split_task(shared, Arc::clone(&items), next..mid, Arc::clone(&f));
            let right = split_task(shared, items, mid..range.end, f);
            shared.add(left);
            shared.add(right);
        }
    }
}

/// A task that re-splits `range` when it runs. It holds the pool weakly:
/// the pool's drop joins every worker before the last strong reference
/// dies, so a failed upgrade means the task was already abandoned.
fn split_task<T, F>(shared: &Arc<Shared>, items: Arc<[T]>, range: Range<usize>, f: Arc<F>) -> Task
where
    T: Send + Sync + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    let pool: Weak<Shared> = Arc::downgrade(shared);
    Box::new(move || {
        if let Some(shared) = pool.upgrade() {
            for_each_split(&shared, items, range, f);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    #[should_panic(expected = "at least one worker")]
    fn zero_workers_is_a_caller_bug() {
        let _ = ThreadPool::new(0, DestructionPolicy::WaitCurrent);
    }

    #[test]
    fn wait_tasks_is_an_exact_barrier() {
        let pool = ThreadPool::new(4, DestructionPolicy::WaitCurrent).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..200 {
            let done = Arc::clone(&done);
            pool.add(move || {
                done.fetch_add(1, Ordering::AcqRel);
            });
        }

        pool.wait_tasks();
        assert_eq!(done.load(Ordering::Acquire), 200);
    }

    #[test]
    fn clear_tasks_settles_the_counter() {
        let pool = ThreadPool::new(2, DestructionPolicy::WaitCurrent).unwrap();
        let gate = Arc::new(AtomicUsize::new(0));

        // Two blockers pin both workers so the rest stays queued.
        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            pool.add(move || {
                while gate.load(Ordering::Acquire) == 0 {
                    thread::yield_now();
                }
            });
        }
        thread::sleep(Duration::from_millis(20));
        for _ in 0..100 {
            pool.add(|| unreachable!("queued behind the blockers, then cleared"));
        }

        pool.clear_tasks();
        gate.store(1, Ordering::Release);
        // Returns even though 100 tasks were dropped unrun.
        pool.wait_tasks();
    }

    #[test]
    fn panicking_tasks_do_not_poison_the_pool() {
        let pool = ThreadPool::new(2, DestructionPolicy::WaitCurrent).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..50 {
            let done = Arc::clone(&done);
            pool.add(move || {
                if i % 2 == 0 {
                    panic!("even task");
                }
                done.fetch_add(1, Ordering::AcqRel);
            });
        }

        pool.wait_tasks();
        assert_eq!(done.load(Ordering::Acquire), 25);
    }

    #[test]
    fn counter_never_goes_negative() {
        let pool = ThreadPool::new(3, DestructionPolicy::WaitCurrent).unwrap();
        for _ in 0..64 {
            pool.add(|| {});
        }
        pool.wait_tasks();
        assert_eq!(pool.shared.outstanding.load(Ordering::Acquire), 0);
    }

    #[test]
    fn thread_count_is_fixed() {
        let pool = ThreadPool::new(5, DestructionPolicy::WaitCurrent).unwrap();
        assert_eq!(pool.thread_count(), 5);
    }
}
