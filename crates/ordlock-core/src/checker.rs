//! Lock-level enforcement shared by every mutex kind.
//!
//! [`BaseMutex`] carries a mutex's name and [`LockLevel`] and performs the
//! per-thread bookkeeping on every acquire, release and wait:
//!
//! - acquiring at level `L` while holding anything at a level `<= L` is a
//!   lock-order violation;
//! - releasing requires the thread's table to record exactly this mutex;
//! - waiting while holding other mutexes is reported as suspicious.
//!
//! Violations whose held mutex sits in the low-severity range (logging up
//! to abort) are warnings only, so that diagnostics can still run while
//! holding low-level locks. Everything else aborts.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config;
use crate::contention::ContentionLog;
use crate::level::LockLevel;
use crate::runtime;
use crate::thread::{HeldMutex, Thread};

static NEXT_MUTEX_ID: AtomicU64 = AtomicU64::new(1);

/// Name, level and contention statistics common to every mutex kind.
pub struct BaseMutex {
    id: u64,
    name: &'static str,
    level: LockLevel,
    contention: ContentionLog,
}

impl BaseMutex {
    pub(crate) fn new(name: &'static str, level: LockLevel) -> Self {
        Self {
            id: NEXT_MUTEX_ID.fetch_add(1, Ordering::Relaxed),
            name,
            level,
            contention: ContentionLog::new(),
        }
    }

    /// Diagnostic name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Process-unique identity, stable across moves.
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Placement in the global acquisition order.
    #[inline]
    #[must_use]
    pub fn level(&self) -> LockLevel {
        self.level
    }

    /// Contention statistics.
    #[must_use]
    pub fn contention(&self) -> &ContentionLog {
        &self.contention
    }

    /// Validates and records the acquisition of this mutex by `thread`.
    pub fn register_as_locked(&self, thread: Option<&Thread>) {
        let Some(thread) = thread else {
            check_unattached_thread(self);
            return;
        };
        if config::global().check_lock_order {
            let mut bad_mutexes_held = false;
            for (held_level, held) in held_at_or_below(thread, self.level) {
                if held_level.is_low_severity() {
                    tracing::warn!(
                        held = held.name(),
                        held_level = %held_level,
                        mutex = self.name,
                        level = %self.level,
                        "lock level violation in low-severity range"
                    );
                } else {
                    tracing::error!(
                        held = held.name(),
                        held_level = %held_level,
                        mutex = self.name,
                        level = %self.level,
                        "lock level violation: holding \"{}\" (level {} - {}) while locking \"{}\" (level {} - {})",
                        held.name(),
                        held_level,
                        held_level.index(),
                        self.name,
                        self.level,
                        self.level.index(),
                    );
                    bad_mutexes_held = true;
                }
            }
            if bad_mutexes_held && !runtime::is_aborting() {
                crate::fatal!(
                    "lock level violation while locking \"{}\" (level {})",
                    self.name,
                    self.level
                );
            }
        }
        // Monitors are visible to application wait sets and stay outside
        // the internal ordering.
        if self.level != LockLevel::Monitor {
            thread.set_held_mutex(self.level, Some(self));
        }
    }

    /// Clears the record of this mutex from `thread`'s table.
    ///
    /// With order checking disabled two mutexes may share a level, so the
    /// slot is only cleared when it still records this mutex.
    pub fn register_as_unlocked(&self, thread: Option<&Thread>) {
        let Some(thread) = thread else {
            check_unattached_thread(self);
            return;
        };
        if self.level == LockLevel::Monitor {
            return;
        }
        if thread.holds(self.level, self) {
            thread.set_held_mutex(self.level, None);
        } else if config::global().check_lock_order {
            crate::fatal!(
                "unlocking unacquired mutex \"{}\" (level {})",
                self.name,
                self.level
            );
        }
    }

    /// Checks that `thread` may block waiting on this mutex.
    ///
    /// The thread must hold exactly this mutex at its level. Any other held
    /// mutex is logged: it is not always wrong, but it is almost always a
    /// latent deadlock with another wait on the held lock.
    pub fn check_safe_to_wait(&self, thread: Option<&Thread>) {
        let Some(thread) = thread else {
            check_unattached_thread(self);
            return;
        };
        if !config::global().check_lock_order {
            return;
        }
        if self.level != LockLevel::Monitor && !thread.holds(self.level, self) {
            crate::fatal!("waiting on unacquired mutex \"{}\"", self.name);
        }
        for (held_level, held) in thread.held_mutexes() {
            if held_level != self.level {
                tracing::warn!(
                    held = held.name(),
                    held_level = %held_level,
                    mutex = self.name,
                    level = %self.level,
                    "holding \"{}\" (level {}) while performing wait on \"{}\" (level {})",
                    held.name(),
                    held_level,
                    self.name,
                    self.level,
                );
            }
        }
    }
}

impl fmt::Debug for BaseMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseMutex")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// Mutexes `thread` holds at `level` or below, highest level first.
///
/// Any item yielded is a lock-order violation for an acquisition at `level`.
pub fn held_at_or_below(
    thread: &Thread,
    level: LockLevel,
) -> impl Iterator<Item = (LockLevel, HeldMutex)> + '_ {
    (0..=level.index()).rev().filter_map(move |i| {
        let held_level = LockLevel::ALL[i];
        thread.held_mutex(held_level).map(|m| (held_level, m))
    })
}

/// Whether acquiring at `level` would abort for `thread`, ignoring the
/// low-severity range.
#[must_use]
pub fn would_abort(thread: &Thread, level: LockLevel) -> bool {
    held_at_or_below(thread, level).any(|(held_level, _)| !held_level.is_low_severity())
}

fn check_unattached_thread(mutex: &BaseMutex) {
    if !config::global().check_lock_order {
        return;
    }
    if !mutex.level.permitted_without_thread() && !runtime::is_shutting_down() {
        crate::fatal!(
            "mutex \"{}\" (level {}) used without an attached thread",
            mutex.name,
            mutex.level
        );
    }
}
