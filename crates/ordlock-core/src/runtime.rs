//! The narrow slice of runtime state the primitives consult.
//!
//! Destructors ask whether the process is shutting down to decide between a
//! warning and an abort on residual lock state. Every fatal condition in the
//! crate funnels through [`fatal!`](crate::fatal), which logs and then panics;
//! release builds are compiled with `panic = "abort"` so a fatal condition
//! terminates the process.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

/// Marks the process as shutting down.
///
/// From now on, primitives destroyed with residual state (still locked,
/// contended, or with parked waiters) log a warning instead of aborting.
pub fn begin_shutdown() {
    if !SHUTTING_DOWN.swap(true, Ordering::SeqCst) {
        tracing::debug!("runtime shutdown started");
    }
}

/// Clears the shutdown flag set by [`begin_shutdown`].
///
/// Only meaningful for embedders that restart the runtime in-process.
pub fn cancel_shutdown() {
    SHUTTING_DOWN.store(false, Ordering::SeqCst);
}

/// Returns true once [`begin_shutdown`] has been called.
#[inline]
#[must_use]
pub fn is_shutting_down() -> bool {
    SHUTTING_DOWN.load(Ordering::SeqCst)
}

/// Returns true while the calling thread is already unwinding from a fatal
/// condition.
///
/// Checks that would abort are downgraded to warnings in this state so that
/// destructors running during unwinding never raise a second fatal error.
#[inline]
#[must_use]
pub fn is_aborting() -> bool {
    std::thread::panicking()
}

/// Logs `args` at error level and aborts the current operation.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(args: fmt::Arguments<'_>) -> ! {
    let message = args.to_string();
    tracing::error!(fatal = true, "{}", message);
    panic!("{}", message);
}

/// Logs a message and aborts.
///
/// Invariant violations in this crate are never recoverable: continuing
/// would leave shared lock state inconsistent.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::runtime::fatal(::std::format_args!($($arg)*))
    };
}

/// Logs `args` at error level, or at warning level when the process is
/// shutting down or the thread is already aborting. Aborts only in the
/// former case.
///
/// Used by destructors that find residual state.
#[track_caller]
pub(crate) fn fatal_unless_shutting_down(args: fmt::Arguments<'_>) {
    if is_shutting_down() || is_aborting() {
        tracing::warn!("{}", args);
    } else {
        fatal(args);
    }
}
