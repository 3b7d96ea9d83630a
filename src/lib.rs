// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Work-stealing thread pool.
//!
//! N worker threads each own a double-ended task queue: the owner pushes
//! and pops at the front, idle peers steal from the back. Submissions go
//! to a random worker; a recursive [`ThreadPool::for_each`] splits bulk
//! work so chunks stay stealable. [`ThreadPool::wait_tasks`] blocks
//! until the pool is quiescent, and dropping the pool either abandons or
//! drains queued work depending on [`DestructionPolicy`].
//!
//! Components:
//! - `queue`    — per-worker stealing deque
//! - `worker`   — fetch-execute loop plus thread lifecycle
//! - `pool`     — submission, load balancing, quiescence, shutdown
//! - `profiler` — optional lock/wait/task timing observer
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use stealpool::{DestructionPolicy, ThreadPool};
//!
//! let pool = ThreadPool::new(4, DestructionPolicy::WaitAll).unwrap();
//! let hits = Arc::new(AtomicU64::new(0));
//! for _ in 0..100 {
//!     let hits = Arc::clone(&hits);
//!     pool.add(move || {
//!         hits.fetch_add(1, Ordering::Relaxed);
//!     });
//! }
//! pool.wait_tasks();
//! assert_eq!(hits.load(Ordering::Relaxed), 100);
//! ```

mod error;
mod pool;
mod profiler;
mod queue;
mod worker;

pub use error::SpawnError;
pub use pool::{DestructionPolicy, ThreadPool};
pub use profiler::{Profiler, StatsProfiler, ThreadStats};
pub use worker::Task;
