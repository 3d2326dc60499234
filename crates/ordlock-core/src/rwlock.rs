//! Shared/exclusive mutex.
//!
//! The state word is 0 when free, -1 when held exclusively and `N > 0` when
//! held by `N` readers. Releases that leave the state at 0 wake every
//! pending reader and writer and let them re-race the CAS: an exclusive
//! release cannot pick a single winner because all waiting readers may
//! proceed together.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::checker::BaseMutex;
use crate::contention::{ContentionSnapshot, ContentionTimer};
use crate::guards::{ReaderMutexLock, WriterMutexLock};
use crate::level::LockLevel;
use crate::runtime;
use crate::thread::{safe_tid, Thread, Tid};
use crate::wait_wake::{self, WaitOutcome, WaitWake, WAKE_ALL};

/// Who holds a [`ReaderWriterMutex`], read from a single state load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holders {
    /// Nobody.
    Free,
    /// One writer.
    Exclusive(Tid),
    /// This many readers.
    Shared(u32),
}

/// Reader/writer lock with lock-order checking.
///
/// Neither mode is re-entrant. Like [`Mutex`](crate::Mutex), it must not be
/// moved while in use.
pub struct ReaderWriterMutex {
    base: BaseMutex,
    /// 0 free, -1 exclusive, N > 0 shared holders.
    state: AtomicI32,
    /// Meaningful only while `state == -1`.
    exclusive_owner: AtomicU32,
    num_pending_readers: AtomicI32,
    num_pending_writers: AtomicI32,
    backend: &'static dyn WaitWake,
}

impl ReaderWriterMutex {
    /// Creates a reader/writer mutex using the configured wait/wake backend.
    #[must_use]
    pub fn new(name: &'static str, level: LockLevel) -> Self {
        Self::with_backend(name, level, wait_wake::default_backend())
    }

    /// Creates a reader/writer mutex on an explicit wait/wake backend.
    #[must_use]
    pub fn with_backend(
        name: &'static str,
        level: LockLevel,
        backend: &'static dyn WaitWake,
    ) -> Self {
        Self {
            base: BaseMutex::new(name, level),
            state: AtomicI32::new(0),
            exclusive_owner: AtomicU32::new(0),
            num_pending_readers: AtomicI32::new(0),
            num_pending_writers: AtomicI32::new(0),
            backend,
        }
    }

    /// Blocks until `thread` holds the lock exclusively.
    pub fn exclusive_lock<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        self.assert_not_reentered(thread);
        loop {
            let cur_state = self.state.load(Ordering::Relaxed);
            if cur_state == 0 {
                if self.try_exclusive_transition() {
                    break;
                }
            } else {
                let _timer = ContentionTimer::start(
                    self.base.contention(),
                    self.base.name(),
                    self.exclusive_owner_tid(),
                );
                self.num_pending_writers.fetch_add(1, Ordering::SeqCst);
                self.block(cur_state, None);
                self.num_pending_writers.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.exclusive_acquired(thread);
    }

    /// Like [`exclusive_lock`](Self::exclusive_lock) but gives up after
    /// `ms` milliseconds plus `ns` nanoseconds. Returns whether the lock was
    /// acquired.
    pub fn exclusive_lock_with_timeout<'t>(
        &self,
        thread: impl Into<Option<&'t Thread>>,
        ms: u64,
        ns: u32,
    ) -> bool {
        let thread = thread.into();
        self.assert_not_reentered(thread);
        let deadline = Instant::now() + wait_wake::timeout_from_parts(ms, ns);
        loop {
            let cur_state = self.state.load(Ordering::Relaxed);
            if cur_state == 0 {
                if self.try_exclusive_transition() {
                    break;
                }
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let _timer = ContentionTimer::start(
                self.base.contention(),
                self.base.name(),
                self.exclusive_owner_tid(),
            );
            self.num_pending_writers.fetch_add(1, Ordering::SeqCst);
            let outcome = self.block(cur_state, Some(remaining));
            self.num_pending_writers.fetch_sub(1, Ordering::SeqCst);
            if outcome == WaitOutcome::TimedOut {
                return false;
            }
        }
        self.exclusive_acquired(thread);
        true
    }

    /// Acquires the lock exclusively if it is free. Never blocks.
    pub fn exclusive_try_lock<'t>(&self, thread: impl Into<Option<&'t Thread>>) -> bool {
        let thread = thread.into();
        self.assert_not_reentered(thread);
        loop {
            if self.state.load(Ordering::Relaxed) != 0 {
                return false;
            }
            if self.try_exclusive_transition() {
                break;
            }
        }
        self.exclusive_acquired(thread);
        true
    }

    /// Releases exclusive ownership and wakes every pending waiter.
    pub fn exclusive_unlock<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        self.assert_exclusive_held(thread);
        self.base.register_as_unlocked(thread);
        loop {
            let cur_state = self.state.load(Ordering::Relaxed);
            if cur_state != -1 {
                crate::fatal!(
                    "unexpected state {} in exclusive unlock of \"{}\"",
                    cur_state,
                    self.base.name()
                );
            }
            self.exclusive_owner.store(0, Ordering::Relaxed);
            if self
                .state
                .compare_exchange_weak(-1, 0, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                self.wake_pending();
                return;
            }
        }
    }

    /// Blocks until `thread` holds the lock shared.
    pub fn shared_lock<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        self.assert_not_reentered(thread);
        loop {
            let cur_state = self.state.load(Ordering::Relaxed);
            if cur_state >= 0 {
                if self
                    .state
                    .compare_exchange_weak(
                        cur_state,
                        cur_state + 1,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break;
                }
            } else {
                // Held exclusively; park until the writer releases.
                let _timer = ContentionTimer::start(
                    self.base.contention(),
                    self.base.name(),
                    self.exclusive_owner_tid(),
                );
                self.num_pending_readers.fetch_add(1, Ordering::SeqCst);
                self.block(cur_state, None);
                self.num_pending_readers.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.base.register_as_locked(thread);
    }

    /// Acquires the lock shared unless a writer holds it. Never blocks.
    pub fn shared_try_lock<'t>(&self, thread: impl Into<Option<&'t Thread>>) -> bool {
        let thread = thread.into();
        self.assert_not_reentered(thread);
        loop {
            let cur_state = self.state.load(Ordering::Relaxed);
            if cur_state < 0 {
                return false;
            }
            if self
                .state
                .compare_exchange_weak(
                    cur_state,
                    cur_state + 1,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }
        self.base.register_as_locked(thread);
        true
    }

    /// Releases one shared hold; the last reader out wakes pending waiters.
    pub fn shared_unlock<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        self.base.register_as_unlocked(thread);
        loop {
            let cur_state = self.state.load(Ordering::Relaxed);
            if cur_state <= 0 {
                crate::fatal!(
                    "unexpected state {} in shared unlock of \"{}\"",
                    cur_state,
                    self.base.name()
                );
            }
            if self
                .state
                .compare_exchange_weak(
                    cur_state,
                    cur_state - 1,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                if cur_state == 1 {
                    self.wake_pending();
                }
                return;
            }
        }
    }

    /// Takes the lock shared and returns a guard that releases it on drop.
    pub fn read<'a>(&'a self, thread: impl Into<Option<&'a Thread>>) -> ReaderMutexLock<'a> {
        ReaderMutexLock::new(self, thread.into())
    }

    /// Takes the lock exclusively and returns a guard that releases it on drop.
    pub fn write<'a>(&'a self, thread: impl Into<Option<&'a Thread>>) -> WriterMutexLock<'a> {
        WriterMutexLock::new(self, thread.into())
    }

    /// Whether `thread` (or the calling OS thread) holds the lock exclusively.
    pub fn is_exclusive_held<'t>(&self, thread: impl Into<Option<&'t Thread>>) -> bool {
        self.exclusive_owner_tid() == safe_tid(thread.into())
    }

    /// Whether `thread` holds the lock shared, according to its held-mutex
    /// table. Unattached callers only get the exclusive answer.
    pub fn is_shared_held<'t>(&self, thread: impl Into<Option<&'t Thread>>) -> bool {
        match thread.into() {
            Some(thread) => thread.holds(self.base.level(), &self.base),
            None => self.is_exclusive_held(None),
        }
    }

    /// Id of the exclusive owner; 0 when free or held shared.
    #[must_use]
    pub fn exclusive_owner_tid(&self) -> Tid {
        if self.state.load(Ordering::Relaxed) < 0 {
            self.exclusive_owner.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// Current holders.
    #[must_use]
    pub fn holders(&self) -> Holders {
        match self.state.load(Ordering::Acquire) {
            0 => Holders::Free,
            n if n < 0 => Holders::Exclusive(self.exclusive_owner.load(Ordering::Relaxed)),
            n => Holders::Shared(n.unsigned_abs()),
        }
    }

    /// Aborts unless `thread` holds the lock exclusively.
    pub fn assert_exclusive_held<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        if !self.is_exclusive_held(thread) {
            crate::fatal!(
                "reader-writer mutex \"{}\" not held exclusively by thread {} (owner {})",
                self.base.name(),
                safe_tid(thread),
                self.exclusive_owner_tid()
            );
        }
    }

    /// Aborts if `thread` holds the lock exclusively.
    pub fn assert_not_exclusive_held<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        if self.is_exclusive_held(thread) {
            crate::fatal!(
                "reader-writer mutex \"{}\" unexpectedly held exclusively by thread {}",
                self.base.name(),
                safe_tid(thread)
            );
        }
    }

    /// Aborts unless `thread` holds the lock shared or exclusively.
    pub fn assert_shared_held<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        if !self.is_shared_held(thread) && !self.is_exclusive_held(thread) {
            crate::fatal!(
                "reader-writer mutex \"{}\" not held by thread {}",
                self.base.name(),
                safe_tid(thread)
            );
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.base.name()
    }

    /// Placement in the global acquisition order.
    #[must_use]
    pub fn level(&self) -> LockLevel {
        self.base.level()
    }

    /// Lock-order bookkeeping shared with other mutex kinds.
    #[must_use]
    pub fn as_base(&self) -> &BaseMutex {
        &self.base
    }

    /// Threads blocked waiting for shared access.
    #[must_use]
    pub fn num_pending_readers(&self) -> i32 {
        self.num_pending_readers.load(Ordering::Relaxed)
    }

    /// Threads blocked waiting for exclusive access.
    #[must_use]
    pub fn num_pending_writers(&self) -> i32 {
        self.num_pending_writers.load(Ordering::Relaxed)
    }

    /// Contention statistics recorded so far.
    #[must_use]
    pub fn dump_contention(&self) -> ContentionSnapshot {
        self.base.contention().snapshot()
    }

    #[cfg(test)]
    pub(crate) fn add_pending(&self, readers: i32, writers: i32) {
        self.num_pending_readers.fetch_add(readers, Ordering::Relaxed);
        self.num_pending_writers.fetch_add(writers, Ordering::Relaxed);
    }

    fn assert_not_reentered(&self, thread: Option<&Thread>) {
        let reentered = self.is_exclusive_held(thread)
            || thread.is_some_and(|t| t.holds(self.base.level(), &self.base));
        if reentered {
            crate::fatal!(
                "thread {} re-entering reader-writer mutex \"{}\"",
                safe_tid(thread),
                self.base.name()
            );
        }
    }

    fn try_exclusive_transition(&self) -> bool {
        self.state
            .compare_exchange_weak(0, -1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn exclusive_acquired(&self, thread: Option<&Thread>) {
        self.exclusive_owner.store(safe_tid(thread), Ordering::Relaxed);
        self.base.register_as_locked(thread);
    }

    fn wake_pending(&self) {
        if self.num_pending_writers.load(Ordering::SeqCst) > 0
            || self.num_pending_readers.load(Ordering::SeqCst) > 0
        {
            if let Err(err) = self.backend.wake(&self.state, WAKE_ALL) {
                crate::fatal!(
                    "{} wake failed for \"{}\": {}",
                    self.backend.name(),
                    self.base.name(),
                    err
                );
            }
        }
    }

    fn block(&self, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
        match self.backend.wait(&self.state, expected, timeout) {
            Ok(outcome) => outcome,
            Err(err) => crate::fatal!(
                "{} wait failed for \"{}\": {}",
                self.backend.name(),
                self.base.name(),
                err
            ),
        }
    }
}

impl fmt::Display for ReaderWriterMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} level={} owner={}",
            self.base.name(),
            self.base.level().index(),
            self.exclusive_owner_tid()
        )
    }
}

impl fmt::Debug for ReaderWriterMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Drop for ReaderWriterMutex {
    fn drop(&mut self) {
        let name = self.base.name();
        let state = *self.state.get_mut();
        if state != 0 {
            runtime::fatal_unless_shutting_down(format_args!(
                "destroying reader-writer mutex \"{}\" in state {} (owner {})",
                name,
                state,
                *self.exclusive_owner.get_mut()
            ));
            return;
        }
        let readers = *self.num_pending_readers.get_mut();
        let writers = *self.num_pending_writers.get_mut();
        if readers != 0 || writers != 0 {
            runtime::fatal_unless_shutting_down(format_args!(
                "destroying reader-writer mutex \"{}\" with {} pending readers and {} pending writers",
                name, readers, writers
            ));
        }
    }
}
