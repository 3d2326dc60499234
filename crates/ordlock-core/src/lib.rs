//! # ordlock core
//!
//! Synchronization primitives for a multithreaded managed runtime:
//! exclusive mutexes (optionally recursive), reader/writer locks and
//! condition variables on top of a kernel wait/wake primitive, plus a
//! runtime-wide lock-ordering checker that flags deadlock-prone acquisition
//! orders as they happen.
//!
//! ## Model
//!
//! - Every mutex has a [`LockLevel`]. Threads acquire mutexes in strictly
//!   decreasing level order; the [`Thread`] passed to each call records what
//!   it holds per level.
//! - Failures are invariant violations, not errors: they are logged through
//!   `tracing` and abort (panic, with `panic = "abort"` in release builds).
//! - Blocking goes through a [`WaitWake`] backend: `futex(2)` on Linux or a
//!   portable parking table everywhere.
//!
//! ## Quick Start
//!
//! ```rust
//! use ordlock_core::{ConditionVariable, LockLevel, Mutex, Thread};
//!
//! let thread = Thread::attach("main");
//! let queue_lock = Mutex::new("queue lock", LockLevel::Default, false);
//! let queue_cond = ConditionVariable::new("queue condition", &queue_lock);
//!
//! {
//!     let _held = queue_lock.lock(&thread);
//!     queue_cond.signal(&thread);
//! }
//! assert_eq!(queue_lock.exclusive_owner_tid(), 0);
//! ```

#![warn(missing_docs)]
#![cfg_attr(
    test,
    allow(
        clippy::doc_markdown,
        clippy::uninlined_format_args,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::manual_assert
    )
)]

pub mod checker;
pub mod condvar;
#[cfg(test)]
mod condvar_tests;
pub mod config;
pub mod contention;
pub mod error;
pub mod guards;
pub mod level;
pub mod mutex;
pub mod runtime;
pub mod rwlock;
pub mod thread;
#[cfg(test)]
mod thread_tests;
pub mod wait_wake;

pub use checker::BaseMutex;
pub use condvar::ConditionVariable;
pub use config::{BackendKind, SyncConfig};
pub use contention::ContentionSnapshot;
pub use error::{Error, Result};
pub use guards::{MutexLock, ReaderMutexLock, WriterMutexLock};
pub use level::LockLevel;
pub use mutex::Mutex;
pub use rwlock::{Holders, ReaderWriterMutex};
pub use thread::{HeldMutex, Thread, Tid};
pub use wait_wake::{WaitOutcome, WaitWake};
