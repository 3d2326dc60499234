//! Condition variable bound to one guard [`Mutex`].
//!
//! Waiters block on a sequence counter. `signal` bumps the counter and wakes
//! one waiter; `broadcast` bumps it and requeues every waiter straight onto
//! the guard mutex's wait queue, so they are released one at a time by the
//! guard's unlocks instead of stampeding for it.
//!
//! Handed-off accounting: each waiter woken by `signal` or moved by
//! `broadcast` adds one to the guard's contender count (so guard unlocks
//! keep waking) and one to `num_awoken`. The waiter gives both back once it
//! has reacquired the guard.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use crate::config;
use crate::mutex::Mutex;
use crate::runtime;
use crate::thread::Thread;
use crate::wait_wake::{self, RequeueOutcome, WaitOutcome, WAKE_ALL};

/// Condition variable. The guard mutex is borrowed for `'m` and must
/// outlive the condition variable; it is never owned or shared.
pub struct ConditionVariable<'m> {
    name: &'static str,
    guard: &'m Mutex,
    /// Bumped by every signal and broadcast. Wraps.
    sequence: AtomicI32,
    /// Waiters between snapshotting `sequence` and reacquiring the guard.
    num_waiters: AtomicI32,
    /// Waiters handed to the guard and not yet resumed.
    num_awoken: AtomicI32,
}

impl<'m> ConditionVariable<'m> {
    /// Creates a condition variable guarded by `guard`.
    #[must_use]
    pub fn new(name: &'static str, guard: &'m Mutex) -> Self {
        Self {
            name,
            guard,
            sequence: AtomicI32::new(0),
            num_waiters: AtomicI32::new(0),
            num_awoken: AtomicI32::new(0),
        }
    }

    /// Releases the guard, blocks until signalled, then reacquires it.
    ///
    /// May return spuriously; callers re-check their predicate.
    pub fn wait<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        let thread = thread.into();
        self.guard.as_base().check_safe_to_wait(thread);
        self.wait_internal(thread, None);
    }

    /// [`wait`](Self::wait) without the "other locks held" diagnostic, for
    /// callers that deliberately wait while holding outer locks.
    pub fn wait_holding_locks<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        self.wait_internal(thread.into(), None);
    }

    /// Like [`wait`](Self::wait) but gives up after `ms` milliseconds plus
    /// `ns` nanoseconds. Returns true if it timed out.
    pub fn timed_wait<'t>(&self, thread: impl Into<Option<&'t Thread>>, ms: u64, ns: u32) -> bool {
        let thread = thread.into();
        self.guard.as_base().check_safe_to_wait(thread);
        let timeout = wait_wake::timeout_from_parts(ms, ns);
        self.wait_internal(thread, Some(timeout))
    }

    /// Wakes one waiter, if any.
    pub fn signal<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        self.guard.assert_exclusive_held(thread.into());
        if self.num_waiters.load(Ordering::Relaxed) <= 0 {
            return;
        }
        self.sequence.fetch_add(1, Ordering::SeqCst);
        let backend = self.guard.backend();
        match backend.wake(&self.sequence, 1) {
            Ok(1) => {
                // The woken thread now has to contend for the guard.
                self.guard.add_contenders(1);
                self.num_awoken.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(err) => crate::fatal!("{} wake failed for \"{}\": {}", backend.name(), self.name, err),
        }
    }

    /// Wakes every waiter by moving them onto the guard's wait queue.
    pub fn broadcast<'t>(&self, thread: impl Into<Option<&'t Thread>>) {
        self.guard.assert_exclusive_held(thread.into());
        if self.num_waiters.load(Ordering::Relaxed) <= 0 {
            return;
        }
        self.sequence.fetch_add(1, Ordering::SeqCst);
        let backend = self.guard.backend();
        if !backend.supports_requeue() || !config::global().requeue_on_broadcast {
            if let Err(err) = backend.wake(&self.sequence, WAKE_ALL) {
                crate::fatal!("{} wake failed for \"{}\": {}", backend.name(), self.name, err);
            }
            return;
        }
        loop {
            let cur_sequence = self.sequence.load(Ordering::SeqCst);
            match backend.requeue(&self.sequence, cur_sequence, self.guard.state_word(), 0, WAKE_ALL) {
                Ok(RequeueOutcome::Moved(moved)) => {
                    let moved = i32::try_from(moved).unwrap_or(i32::MAX);
                    if moved > 0 {
                        self.guard.add_contenders(moved);
                        self.num_awoken.fetch_add(moved, Ordering::Relaxed);
                    }
                    return;
                }
                Ok(RequeueOutcome::ValueChanged) => {}
                Err(err) => {
                    crate::fatal!("{} requeue failed for \"{}\": {}", backend.name(), self.name, err)
                }
            }
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The guard mutex.
    #[must_use]
    pub fn guard(&self) -> &'m Mutex {
        self.guard
    }

    /// Threads currently waiting.
    #[must_use]
    pub fn num_waiters(&self) -> i32 {
        self.num_waiters.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn add_waiters(&self, delta: i32) {
        self.num_waiters.fetch_add(delta, Ordering::Relaxed);
    }

    fn wait_internal(&self, thread: Option<&Thread>, timeout: Option<Duration>) -> bool {
        let guard = self.guard;
        guard.assert_exclusive_held(thread);
        let cur_sequence = self.sequence.load(Ordering::SeqCst);
        self.num_waiters.fetch_add(1, Ordering::Relaxed);
        let old_recursion_count = guard.recursion_count();
        // Force a full release even if the caller holds a recursive guard
        // several times.
        guard.set_recursion_count(1);
        guard.exclusive_unlock(thread);

        let backend = guard.backend();
        let outcome = backend
            .wait(&self.sequence, cur_sequence, timeout)
            .unwrap_or_else(|err| {
                crate::fatal!("{} wait failed for \"{}\": {}", backend.name(), self.name, err)
            });

        guard.exclusive_lock(thread);
        let remaining = self.num_waiters.fetch_sub(1, Ordering::Relaxed) - 1;
        if remaining < 0 {
            crate::fatal!("negative waiter count on condition variable \"{}\"", self.name);
        }
        if outcome == WaitOutcome::Woken && self.num_awoken.load(Ordering::Relaxed) > 0 {
            self.num_awoken.fetch_sub(1, Ordering::Relaxed);
            guard.add_contenders(-1);
        }
        if remaining == 0 {
            // Nobody is parked or in flight any more: whatever is left was
            // handed to waiters that timed out or were interrupted after
            // being moved.
            let leaked = self.num_awoken.swap(0, Ordering::Relaxed);
            if leaked > 0 {
                guard.add_contenders(-leaked);
            }
        }
        guard.set_recursion_count(old_recursion_count);
        outcome == WaitOutcome::TimedOut
    }
}

impl fmt::Debug for ConditionVariable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionVariable")
            .field("name", &self.name)
            .field("guard", &self.guard.name())
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .field("num_waiters", &self.num_waiters())
            .field("num_awoken", &self.num_awoken.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for ConditionVariable<'_> {
    fn drop(&mut self) {
        let waiters = *self.num_waiters.get_mut();
        if waiters != 0 {
            runtime::fatal_unless_shutting_down(format_args!(
                "condition variable \"{}\" destroyed with {} waiters",
                self.name, waiters
            ));
        }
    }
}
