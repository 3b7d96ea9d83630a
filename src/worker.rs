// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker thread: fetch-execute loop plus lifecycle.
//!
//! Each worker owns one OS thread. The loop takes work from its own
//! deque first, then tries to steal from a peer, and only then blocks.
//! The pool installs both callbacks at spawn time: `steal` acquires a
//! task from some peer deque, `count` reports ±1 outstanding tasks.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{error, trace};

use crate::profiler::Profiler;
use crate::queue::StealingQueue;

/// A unit of work: opaque, movable, no result channel.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Tries to acquire a task from a peer. Owned by the worker thread so it
/// can carry mutable state (its victim-selection rng).
pub(crate) type StealFn = Box<dyn FnMut() -> Option<Task> + Send>;

/// Reports a change in the number of outstanding tasks to the pool.
pub(crate) type TaskCountFn = Arc<dyn Fn(isize) + Send + Sync>;

pub(crate) struct Worker {
    queue: Arc<StealingQueue<Task>>,
    terminated: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start one worker thread draining `queue`.
    pub(crate) fn spawn(
        index: usize,
        queue: Arc<StealingQueue<Task>>,
        steal: StealFn,
        count: TaskCountFn,
        profiler: Option<Arc<dyn Profiler>>,
    ) -> io::Result<Self> {
        let terminated = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new()
            .name(format!("stealpool-worker-{index}"))
            .spawn({
                let queue = Arc::clone(&queue);
                let terminated = Arc::clone(&terminated);
                move || run(index, &queue, &terminated, steal, &count, profiler.as_deref())
            })?;

        Ok(Self {
            queue,
            terminated,
            thread: Some(thread),
        })
    }

    /// Set the termination flag and wake the thread if it is blocked.
    /// The flag is write-once: there is no way to restart a worker.
    pub(crate) fn request_stop(&self) {
        self.terminated.store(true, Ordering::Release);
        self.queue.notify();
    }

    /// Wait for the thread to exit. Idempotent.
    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Stop and join in one step.
    pub(crate) fn terminate(&mut self) {
        self.request_stop();
        self.join();
    }
}

impl Drop for Worker {
    // Safety net: the pool normally terminates workers explicitly.
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run(
    index: usize,
    queue: &StealingQueue<Task>,
    terminated: &AtomicBool,
    mut steal: StealFn,
    count: &TaskCountFn,
    profiler: Option<&dyn Profiler>,
) {
    trace!("worker {index} started");

    while !terminated.load(Ordering::Acquire) {
        let task = queue
            .try_pop()
            .or_else(|| steal())
            .or_else(|| {
                queue.wait_and_pop_if(
                    |empty| terminated.load(Ordering::Acquire) || !empty,
                    |empty| !empty && !terminated.load(Ordering::Acquire),
                )
            });

        let Some(task) = task else { continue };

        if terminated.load(Ordering::Acquire) {
            // Fetched during shutdown: the task leaves the system unrun
            // but still has to settle the outstanding counter.
            drop(task);
            count(-1);
            continue;
        }

        execute(task, count, profiler);
    }

    trace!("worker {index} stopped");
}

fn execute(task: Task, count: &TaskCountFn, profiler: Option<&dyn Profiler>) {
    let started = Instant::now();
    match panic::catch_unwind(AssertUnwindSafe(|| task())) {
        Ok(()) => {
            if let Some(profiler) = profiler {
                profiler.on_task(started.elapsed());
            }
        }
        Err(payload) => {
            // The pool has no result channel; a panicking task counts as
            // completed and the loop keeps going.
            error!("task panicked: {}", panic_message(payload.as_ref()));
        }
    }
    count(-1);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "opaque panic payload"
    }
}
