// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-worker stealing deque.
//!
//! The owning worker pushes and pops at the front (LIFO keeps recently
//! split work hot in cache); thieves take from the back. A single mutex
//! guards the deque, and the condition variable is signalled on every
//! state change a waiter cares about: push, clear, and external notify.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::profiler::Profiler;

pub(crate) struct StealingQueue<T> {
    items: Mutex<VecDeque<T>>,
    event: Condvar,
    profiler: Option<Arc<dyn Profiler>>,
}

impl<T> StealingQueue<T> {
    pub(crate) fn new() -> Self {
        Self::with_profiler(None)
    }

    pub(crate) fn with_profiler(profiler: Option<Arc<dyn Profiler>>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            event: Condvar::new(),
            profiler,
        }
    }

    /// Insert at the front and wake one waiter.
    pub(crate) fn push(&self, value: T) {
        let mut items = self.acquire();
        items.push_front(value);
        self.release(items);
        self.event.notify_one();
    }

    /// Non-blocking pop from the front (owner's end).
    pub(crate) fn try_pop(&self) -> Option<T> {
        let mut items = self.acquire();
        let value = items.pop_front();
        self.release(items);
        value
    }

    /// Non-blocking pop from the back (thieves' end).
    pub(crate) fn try_steal(&self) -> Option<T> {
        let mut items = self.acquire();
        let value = items.pop_back();
        self.release(items);
        value
    }

    /// Block until `wait_pred(empty)` holds, then pop the front if
    /// `pop_pred(empty)` holds, all under one lock acquisition.
    ///
    /// `wait_pred` decides when to stop waiting and must cover external
    /// wakeup reasons (termination) besides arriving work; `pop_pred`
    /// decides whether there is actually something to take. Returning
    /// `None` therefore does not mean the queue is empty.
    pub(crate) fn wait_and_pop_if<W, P>(&self, wait_pred: W, pop_pred: P) -> Option<T>
    where
        W: Fn(bool) -> bool,
        P: FnOnce(bool) -> bool,
    {
        let mut items = self.acquire();
        let parked = Instant::now();
        while !wait_pred(items.is_empty()) {
            // The condvar releases and reacquires the mutex around the
            // wait; mirror that for the lock brackets.
            self.note_unlock();
            items = self.event.wait(items).unwrap();
            self.note_lock();
        }
        if let Some(profiler) = &self.profiler {
            profiler.on_wait(parked.elapsed());
        }

        let value = if pop_pred(items.is_empty()) {
            items.pop_front()
        } else {
            None
        };
        self.release(items);
        value
    }

    /// Drop everything queued and wake all waiters. Returns how many
    /// entries were dropped so the caller can settle its bookkeeping.
    pub(crate) fn clear(&self) -> usize {
        let mut items = self.acquire();
        let dropped = items.len();
        items.clear();
        self.release(items);
        self.event.notify_all();
        dropped
    }

    /// Wake all waiters without touching the queue. Used to break
    /// blocked workers out for termination checks.
    pub(crate) fn notify(&self) {
        self.event.notify_all();
    }

    /// Valid only for the instant the internal lock is held; callers
    /// treat the answer as a hint.
    #[allow(dead_code)]
    pub(crate) fn is_empty(&self) -> bool {
        let items = self.acquire();
        let empty = items.is_empty();
        self.release(items);
        empty
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        let items = self.acquire();
        let len = items.len();
        self.release(items);
        len
    }

    fn acquire(&self) -> MutexGuard<'_, VecDeque<T>> {
        let guard = self.items.lock().unwrap();
        self.note_lock();
        guard
    }

    fn release(&self, guard: MutexGuard<'_, VecDeque<T>>) {
        drop(guard);
        self.note_unlock();
    }

    fn note_lock(&self) {
        if let Some(profiler) = &self.profiler {
            profiler.on_lock();
        }
    }

    fn note_unlock(&self) {
        if let Some(profiler) = &self.profiler {
            profiler.on_unlock();
        }
    }
}
