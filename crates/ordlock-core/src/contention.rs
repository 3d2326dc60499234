//! Per-mutex contention statistics.
//!
//! Counters are plain relaxed atomics: they are advisory and never
//! synchronize with lock state. They only move when `log_contention` is on,
//! so the uncontended and untracked paths stay a single config load.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config;
use crate::thread::Tid;

/// Contention counters for one mutex.
#[allow(clippy::struct_field_names)]
pub struct ContentionLog {
    /// Number of acquisitions that had to block.
    contention_count: AtomicU64,
    /// Total time spent blocked, in nanoseconds.
    wait_time_ns: AtomicU64,
    /// Longest single blocked wait, in nanoseconds.
    max_wait_ns: AtomicU64,
    /// Owner observed by the most recent blocked acquisition.
    last_owner_tid: AtomicU32,
}

impl ContentionLog {
    pub(crate) const fn new() -> Self {
        Self {
            contention_count: AtomicU64::new(0),
            wait_time_ns: AtomicU64::new(0),
            max_wait_ns: AtomicU64::new(0),
            last_owner_tid: AtomicU32::new(0),
        }
    }

    /// Records one blocked acquisition.
    pub fn record(&self, owner_tid: Tid, waited: Duration) {
        let nanos = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        self.contention_count.fetch_add(1, Ordering::Relaxed);
        self.wait_time_ns.fetch_add(nanos, Ordering::Relaxed);
        self.max_wait_ns.fetch_max(nanos, Ordering::Relaxed);
        self.last_owner_tid.store(owner_tid, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> ContentionSnapshot {
        ContentionSnapshot {
            contention_count: self.contention_count.load(Ordering::Relaxed),
            wait_time: Duration::from_nanos(self.wait_time_ns.load(Ordering::Relaxed)),
            max_wait: Duration::from_nanos(self.max_wait_ns.load(Ordering::Relaxed)),
            last_owner_tid: self.last_owner_tid.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of a [`ContentionLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentionSnapshot {
    /// Number of acquisitions that had to block.
    pub contention_count: u64,
    /// Total time spent blocked.
    pub wait_time: Duration,
    /// Longest single blocked wait.
    pub max_wait: Duration,
    /// Owner observed by the most recent blocked acquisition.
    pub last_owner_tid: Tid,
}

impl fmt::Display for ContentionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contention_count == 0 {
            return f.write_str("no contention");
        }
        let mean = self.wait_time / u32::try_from(self.contention_count).unwrap_or(u32::MAX);
        write!(
            f,
            "contended {} times, total wait {:?}, mean {:?}, max {:?}, last owner {}",
            self.contention_count, self.wait_time, mean, self.max_wait, self.last_owner_tid
        )
    }
}

/// Times one blocked wait and records it on drop.
///
/// Inactive (and free) unless `log_contention` or `contention_warn_ms` is
/// configured.
pub(crate) struct ContentionTimer<'a> {
    log: &'a ContentionLog,
    name: &'static str,
    owner_tid: Tid,
    start: Option<Instant>,
}

impl<'a> ContentionTimer<'a> {
    pub(crate) fn start(log: &'a ContentionLog, name: &'static str, owner_tid: Tid) -> Self {
        let config = config::global();
        let active = config.log_contention || config.contention_warn_ms > 0;
        Self {
            log,
            name,
            owner_tid,
            start: active.then(Instant::now),
        }
    }
}

impl Drop for ContentionTimer<'_> {
    fn drop(&mut self) {
        let Some(start) = self.start else {
            return;
        };
        let waited = start.elapsed();
        let config = config::global();
        if config.log_contention {
            self.log.record(self.owner_tid, waited);
        }
        let threshold = Duration::from_millis(config.contention_warn_ms);
        if config.contention_warn_ms > 0 && waited > threshold {
            tracing::warn!(
                mutex = self.name,
                owner = self.owner_tid,
                waited_ms = waited.as_millis(),
                "slow lock acquisition"
            );
        }
    }
}
