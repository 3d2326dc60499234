//! The slice of a runtime thread the primitives depend on.
//!
//! A [`Thread`] carries the OS thread id and a fixed table of the mutex held
//! at each [`LockLevel`]. The table is passed explicitly to every lock
//! operation instead of living in thread-local storage, so the dependency is
//! visible at each call site.
//!
//! Table entries are copies of a mutex's identity, name and level. They never
//! point back at the mutex, so an entry outliving its mutex (possible during
//! shutdown) only leaves a stale diagnostic.
//!
//! A `Thread` is `Send` but not `Sync`: only the OS thread it belongs to can
//! lock with it.
//!
//! ```compile_fail
//! fn shared_across_threads<T: Sync>() {}
//! shared_across_threads::<ordlock_core::Thread>();
//! ```

use std::cell::Cell;
use std::fmt;

use crate::checker::BaseMutex;
use crate::level::LockLevel;

/// OS-level thread id. 0 means "no thread".
pub type Tid = u32;

/// Id of the calling OS thread.
#[cfg(target_os = "linux")]
#[must_use]
pub fn os_tid() -> Tid {
    // SAFETY: `gettid` takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    Tid::try_from(tid).unwrap_or(Tid::MAX)
}

/// Id of the calling OS thread.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn os_tid() -> Tid {
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT_TID: AtomicU32 = AtomicU32::new(1);
    thread_local! {
        static TID: Tid = NEXT_TID.fetch_add(1, Ordering::Relaxed);
    }
    TID.with(|tid| *tid)
}

/// Id of `thread`, or of the calling OS thread for unattached callers.
#[inline]
#[must_use]
pub fn safe_tid(thread: Option<&Thread>) -> Tid {
    thread.map_or_else(os_tid, Thread::tid)
}

/// A table entry: which mutex is held at a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldMutex {
    id: u64,
    name: &'static str,
    level: LockLevel,
}

impl HeldMutex {
    fn of(mutex: &BaseMutex) -> Self {
        Self {
            id: mutex.id(),
            name: mutex.name(),
            level: mutex.level(),
        }
    }

    /// Name of the held mutex.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Level of the held mutex.
    #[must_use]
    pub fn level(&self) -> LockLevel {
        self.level
    }
}

/// A runtime thread as seen by the synchronization layer.
pub struct Thread {
    tid: Tid,
    name: String,
    held_mutexes: [Cell<Option<HeldMutex>>; LockLevel::COUNT],
}

impl Thread {
    /// Attaches the calling OS thread.
    #[must_use]
    pub fn attach(name: impl Into<String>) -> Self {
        Self::with_tid(name, os_tid())
    }

    /// Creates a thread record with an explicit id.
    ///
    /// Aborts on tid 0, which is reserved for "no owner".
    #[must_use]
    pub fn with_tid(name: impl Into<String>, tid: Tid) -> Self {
        let name = name.into();
        if tid == 0 {
            crate::fatal!("thread \"{}\" created with reserved tid 0", name);
        }
        Self {
            tid,
            name,
            held_mutexes: std::array::from_fn(|_| Cell::new(None)),
        }
    }

    /// OS thread id.
    #[inline]
    #[must_use]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mutex recorded as held at `level`, if any.
    #[must_use]
    pub fn held_mutex(&self, level: LockLevel) -> Option<HeldMutex> {
        self.held_mutexes[level.index()].get()
    }

    /// Whether `mutex` is the one recorded at `level`.
    #[inline]
    #[must_use]
    pub fn holds(&self, level: LockLevel, mutex: &BaseMutex) -> bool {
        self.held_mutex(level).is_some_and(|held| held.id == mutex.id())
    }

    /// Records (or clears, with `None`) the mutex held at `level`.
    pub(crate) fn set_held_mutex(&self, level: LockLevel, mutex: Option<&BaseMutex>) {
        self.held_mutexes[level.index()].set(mutex.map(HeldMutex::of));
    }

    /// Every occupied table slot, lowest level first.
    pub fn held_mutexes(&self) -> impl Iterator<Item = (LockLevel, HeldMutex)> + '_ {
        LockLevel::ALL
            .into_iter()
            .filter_map(|level| self.held_mutex(level).map(|m| (level, m)))
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field(
                "held",
                &self
                    .held_mutexes()
                    .map(|(level, m)| (level, m.name()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        for (level, mutex) in self.held_mutexes() {
            tracing::warn!(
                thread = %self.name,
                tid = self.tid,
                mutex = mutex.name(),
                %level,
                "thread detached while still holding mutex"
            );
        }
    }
}
