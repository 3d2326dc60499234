//! Exclusive mutex, optionally recursive.
//!
//! The state word is 0 (free) or 1 (held). Contention is tracked in a
//! separate contender count rather than in the state word, so an unlock only
//! calls into the wait/wake primitive when someone is actually blocked.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::time::Duration;

use crate::checker::BaseMutex;
use crate::config;
use crate::contention::{ContentionSnapshot, ContentionTimer};
use crate::guards::MutexLock;
use crate::level::LockLevel;
use crate::runtime;
use crate::thread::{safe_tid, Thread, Tid};
use crate::wait_wake::{self, WaitOutcome, WaitWake};

/// Exclusive lock with lock-order checking.
///
/// A `Mutex` must not be moved while locked or while a
/// [`ConditionVariable`](crate::ConditionVariable) refers to it: its address
/// is its identity in thread tables and wait queues.
pub struct Mutex {
    base: BaseMutex,
    recursive: bool,
    /// 0 free, 1 held.
    state: AtomicI32,
    exclusive_owner: AtomicU32,
    /// Only touched by the owner.
    recursion_count: AtomicU32,
    /// Threads blocked (or about to block) on `state`, plus condition
    /// variable waiters handed to this mutex and not yet resumed.
    num_contenders: AtomicI32,
    backend: &'static dyn WaitWake,
}

impl Mutex {
    /// Creates a mutex using the configured wait/wake backend.
    #[must_use]
    pub fn new(name: &'static str, level: LockLevel, recursive: bool) -> Self {
        Self::with_backend(name, level, recursive, wait_wake::default_backend())
    }

    /// Creates a mutex on an explicit wait/wake backend.
    #[must_use]
    pub fn with_backend(
        name: &'static str,
        level: LockLevel,
        recursive: bool,
        backend: &'static dyn WaitWake,
    ) -> Self {
        Self {
            base: BaseMutex::new(name, level),
            recursive,
            state: AtomicI32::new(0),
            exclusive_owner: AtomicU32::new(0),
            recursion_count: AtomicU32::new(0),
            num_contenders: AtomicI32::new(0),
            backend,
        }
    }

    /// Blocks until the mutex is held by `thread`.
    pub fn exclusive_lock<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        let tid = safe_tid(thread);
        if self.enter_recursive(tid) {
            return;
        }
        loop {
            let cur_state = self.state.load(Ordering::Relaxed);
            if cur_state == 0 {
                if self
                    .state
                    .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            } else {
                let _timer = ContentionTimer::start(
                    self.base.contention(),
                    self.base.name(),
                    self.exclusive_owner_tid(),
                );
                self.num_contenders.fetch_add(1, Ordering::SeqCst);
                self.block(cur_state, None);
                self.num_contenders.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.acquired(thread, tid);
    }

    /// Acquires the mutex if it is free. Never blocks.
    pub fn exclusive_try_lock<'t>(&self, thread: impl Into<Option<&'t Thread>>) -> bool {
        let thread = thread.into();
        let tid = safe_tid(thread);
        if self.enter_recursive(tid) {
            return true;
        }
        loop {
            if self.state.load(Ordering::Relaxed) != 0 {
                return false;
            }
            if self
                .state
                .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        self.acquired(thread, tid);
        true
    }

    /// Releases one level of ownership; the last release frees the mutex and
    /// wakes one contender.
    pub fn exclusive_unlock<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        let tid = safe_tid(thread);
        let owner = self.exclusive_owner.load(Ordering::Relaxed);
        if owner != tid {
            crate::fatal!(
                "unlocking mutex \"{}\" owned by {} from thread {}",
                self.base.name(),
                owner,
                tid
            );
        }
        let count = self.recursion_count.load(Ordering::Relaxed);
        if count == 0 {
            crate::fatal!("unlocking mutex \"{}\" with no recursion count", self.base.name());
        }
        self.recursion_count.store(count - 1, Ordering::Relaxed);
        if count > 1 {
            return;
        }

        self.base.register_as_unlocked(thread);
        loop {
            let cur_state = self.state.load(Ordering::Relaxed);
            if cur_state != 1 {
                crate::fatal!(
                    "unexpected state {} in unlock of mutex \"{}\"",
                    cur_state,
                    self.base.name()
                );
            }
            self.exclusive_owner.store(0, Ordering::Relaxed);
            if self
                .state
                .compare_exchange_weak(1, 0, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                if self.num_contenders.load(Ordering::SeqCst) > 0 {
                    self.wake(1);
                }
                return;
            }
        }
    }

    /// Locks and returns a guard that unlocks on drop.
    pub fn lock<'a>(&'a self, thread: impl Into<Option<&'a Thread>>) -> MutexLock<'a> {
        MutexLock::new(self, thread.into())
    }

    /// Whether `thread` (or the calling OS thread) owns the mutex.
    pub fn is_exclusive_held<'t>(&self, thread: impl Into<Option<&'t Thread>>) -> bool {
        let thread = thread.into();
        let held = self.exclusive_owner.load(Ordering::Relaxed) == safe_tid(thread);
        if held && config::global().check_lock_order {
            if let Some(thread) = thread {
                let level = self.base.level();
                if level != LockLevel::Monitor && !thread.holds(level, &self.base) {
                    crate::fatal!(
                        "mutex \"{}\" owned by {} but missing from its held-mutex table",
                        self.base.name(),
                        thread.tid()
                    );
                }
            }
        }
        held
    }

    /// Id of the owning thread, 0 when free.
    #[inline]
    #[must_use]
    pub fn exclusive_owner_tid(&self) -> Tid {
        self.exclusive_owner.load(Ordering::Relaxed)
    }

    /// Aborts unless `thread` owns the mutex.
    pub fn assert_exclusive_held<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        if !self.is_exclusive_held(thread) {
            crate::fatal!(
                "mutex \"{}\" not held by thread {} (owner {})",
                self.base.name(),
                safe_tid(thread),
                self.exclusive_owner_tid()
            );
        }
    }

    /// Aborts if `thread` owns the mutex.
    pub fn assert_not_held<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        if self.is_exclusive_held(thread) {
            crate::fatal!(
                "mutex \"{}\" unexpectedly held by thread {}",
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

    /// Whether the owner may re-enter.
    #[must_use]
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Outstanding nested acquisitions by the current owner.
    #[must_use]
    pub fn recursion_count(&self) -> u32 {
        self.recursion_count.load(Ordering::Relaxed)
    }

    /// Threads currently blocked on, or handed off to, this mutex.
    #[must_use]
    pub fn num_contenders(&self) -> i32 {
        self.num_contenders.load(Ordering::Relaxed)
    }

    /// Name of the wait/wake backend in use.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Contention statistics recorded so far.
    #[must_use]
    pub fn dump_contention(&self) -> ContentionSnapshot {
        self.base.contention().snapshot()
    }

    pub(crate) fn backend(&self) -> &'static dyn WaitWake {
        self.backend
    }

    pub(crate) fn state_word(&self) -> &AtomicI32 {
        &self.state
    }

    pub(crate) fn set_recursion_count(&self, count: u32) {
        self.recursion_count.store(count, Ordering::Relaxed);
    }

    pub(crate) fn add_contenders(&self, delta: i32) {
        self.num_contenders.fetch_add(delta, Ordering::SeqCst);
    }

    /// Handles re-entry by the current owner. Returns true if the caller
    /// already held a recursive mutex and nothing else needs doing.
    fn enter_recursive(&self, tid: Tid) -> bool {
        if self.exclusive_owner.load(Ordering::Relaxed) != tid {
            return false;
        }
        if !self.recursive {
            crate::fatal!(
                "thread {} re-entering non-recursive mutex \"{}\"",
                tid,
                self.base.name()
            );
        }
        self.recursion_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn acquired(&self, thread: Option<&Thread>, tid: Tid) {
        self.exclusive_owner.store(tid, Ordering::Relaxed);
        self.base.register_as_locked(thread);
        self.recursion_count.store(1, Ordering::Relaxed);
    }

    fn block(&self, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
        self.backend
            .wait(&self.state, expected, timeout)
            .unwrap_or_else(|err| {
                crate::fatal!("{} wait failed for \"{}\": {}", self.backend.name(), self.base.name(), err)
            })
    }

    fn wake(&self, count: u32) -> usize {
        self.backend.wake(&self.state, count).unwrap_or_else(|err| {
            crate::fatal!("{} wake failed for \"{}\": {}", self.backend.name(), self.base.name(), err)
        })
    }
}

impl fmt::Display for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} level={} count={} owner={}",
            if self.recursive { "recursive" } else { "non-recursive" },
            self.base.name(),
            self.base.level().index(),
            self.recursion_count(),
            self.exclusive_owner_tid()
        )
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        let name = self.base.name();
        let owner = *self.exclusive_owner.get_mut();
        if *self.state.get_mut() != 0 {
            runtime::fatal_unless_shutting_down(format_args!(
                "destroying mutex \"{}\" with owner {}",
                name, owner
            ));
            return;
        }
        if owner != 0 {
            runtime::fatal_unless_shutting_down(format_args!(
                "unexpectedly found an owner {} on unlocked mutex \"{}\"",
                owner, name
            ));
        }
        let contenders = *self.num_contenders.get_mut();
        if contenders != 0 {
            runtime::fatal_unless_shutting_down(format_args!(
                "destroying mutex \"{}\" with {} contenders",
                name, contenders
            ));
        }
    }
}
