//! Block on a watched word, wake its waiters, requeue them onto another word.
//!
//! The lock state machines are written once against [`WaitWake`]. Two
//! implementations exist:
//!
//! - [`Futex`]: direct `futex(2)` syscalls (Linux only).
//! - [`ParkingTable`]: an address-keyed table of parked threads built on
//!   `parking_lot` mutexes and condvars, usable everywhere and without
//!   kernel support.
//!
//! Both follow futex semantics: [`WaitWake::wait`] only blocks if the word
//! still holds the expected value, checked atomically with respect to
//! [`WaitWake::wake`] and [`WaitWake::requeue`] on the same word.

#[cfg(target_os = "linux")]
mod futex;
mod portable;

#[cfg(all(test, target_os = "linux"))]
mod futex_tests;

use std::fmt;
use std::sync::atomic::AtomicI32;
use std::sync::LazyLock;
use std::time::Duration;

use crate::config::{self, BackendKind};
use crate::error::Result;

#[cfg(target_os = "linux")]
pub use futex::Futex;
pub use portable::ParkingTable;

/// Wake count meaning "every waiter".
pub const WAKE_ALL: u32 = i32::MAX as u32;

/// Why a [`WaitWake::wait`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by a wake call, directly or after being requeued.
    Woken,
    /// The word no longer held the expected value; the caller never slept.
    ValueChanged,
    /// Interrupted by a signal before any wake.
    Interrupted,
    /// The timeout elapsed.
    TimedOut,
}

/// Result of a [`WaitWake::requeue`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Number of waiters woken plus number moved to the target word.
    Moved(usize),
    /// The source word no longer held the expected value; nothing moved.
    ValueChanged,
}

/// Wait/wake/requeue capability over 32-bit words.
///
/// Transient conditions are reported as outcomes; only unexpected OS
/// failures are errors.
pub trait WaitWake: Send + Sync + fmt::Debug {
    /// Blocks while `word == expected`, until woken or `timeout` elapses.
    fn wait(&self, word: &AtomicI32, expected: i32, timeout: Option<Duration>)
        -> Result<WaitOutcome>;

    /// Wakes up to `count` waiters blocked on `word`. Returns how many woke.
    fn wake(&self, word: &AtomicI32, count: u32) -> Result<usize>;

    /// If `from == expected`, wakes up to `wake` waiters on `from` and moves
    /// up to `requeue` of the remaining ones onto `to`'s queue without
    /// waking them.
    fn requeue(
        &self,
        from: &AtomicI32,
        expected: i32,
        to: &AtomicI32,
        wake: u32,
        requeue: u32,
    ) -> Result<RequeueOutcome>;

    /// Whether [`requeue`](Self::requeue) moves waiters atomically.
    fn supports_requeue(&self) -> bool;

    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;
}

static PARKING_TABLE: LazyLock<ParkingTable> = LazyLock::new(ParkingTable::new);

/// The shared portable backend.
#[must_use]
pub fn portable() -> &'static dyn WaitWake {
    &*PARKING_TABLE
}

/// The futex backend.
#[cfg(target_os = "linux")]
#[must_use]
pub fn futex() -> &'static dyn WaitWake {
    static FUTEX: Futex = Futex;
    &FUTEX
}

/// Backend for `kind`, with `Auto` resolved for this target.
#[must_use]
pub fn backend(kind: BackendKind) -> &'static dyn WaitWake {
    match kind {
        #[cfg(target_os = "linux")]
        BackendKind::Auto | BackendKind::Futex => futex(),
        #[cfg(not(target_os = "linux"))]
        BackendKind::Auto | BackendKind::Futex => portable(),
        BackendKind::Portable => portable(),
    }
}

/// Backend selected by the process-wide configuration.
#[must_use]
pub fn default_backend() -> &'static dyn WaitWake {
    backend(config::global().backend)
}

/// Combines a `(ms, ns)` timeout pair, the unit every timed operation takes.
///
/// `ns` must be below one millisecond.
#[must_use]
pub fn timeout_from_parts(ms: u64, ns: u32) -> Duration {
    if ns >= 1_000_000 {
        crate::fatal!("timeout nanoseconds out of range: {}", ns);
    }
    Duration::from_millis(ms) + Duration::from_nanos(u64::from(ns))
}
