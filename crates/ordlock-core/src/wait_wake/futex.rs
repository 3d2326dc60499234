//! `futex(2)` backend.

use std::io;
use std::sync::atomic::AtomicI32;
use std::time::Duration;

use libc::{c_long, c_ulong, timespec};

use super::{RequeueOutcome, WaitOutcome, WaitWake};
use crate::error::Result;

/// Direct `futex(2)` wait/wake/requeue on process-private words.
#[derive(Debug, Default, Clone, Copy)]
pub struct Futex;

fn word_ptr(word: &AtomicI32) -> *const i32 {
    word.as_ptr().cast_const()
}

fn clamp_count(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

fn to_timespec(timeout: Duration) -> timespec {
    timespec {
        tv_sec: libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX),
        tv_nsec: c_long::try_from(timeout.subsec_nanos()).unwrap_or(0),
    }
}

impl WaitWake for Futex {
    fn wait(
        &self,
        word: &AtomicI32,
        expected: i32,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome> {
        let ts = timeout.map(to_timespec);
        let ts_ptr = ts
            .as_ref()
            .map_or(std::ptr::null(), std::ptr::from_ref);
        // SAFETY: `futex(FUTEX_WAIT)` reads the aligned i32 behind `word`,
        // which is live for the duration of the call.
        // - Condition 1: `word_ptr` comes from a valid `&AtomicI32`.
        // - Condition 2: `ts_ptr` is null or points to `ts`, alive until return.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word_ptr(word),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected,
                ts_ptr,
            )
        };
        if rc == 0 {
            return Ok(WaitOutcome::Woken);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => Ok(WaitOutcome::ValueChanged),
            Some(libc::EINTR) => Ok(WaitOutcome::Interrupted),
            Some(libc::ETIMEDOUT) => Ok(WaitOutcome::TimedOut),
            _ => Err(err.into()),
        }
    }

    fn wake(&self, word: &AtomicI32, count: u32) -> Result<usize> {
        // SAFETY: `futex(FUTEX_WAKE)` only uses the address as a key.
        // - Condition 1: `word_ptr` comes from a valid `&AtomicI32`.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word_ptr(word),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                clamp_count(count),
            )
        };
        usize::try_from(rc).map_err(|_| io::Error::last_os_error().into())
    }

    fn requeue(
        &self,
        from: &AtomicI32,
        expected: i32,
        to: &AtomicI32,
        wake: u32,
        requeue: u32,
    ) -> Result<RequeueOutcome> {
        // SAFETY: `futex(FUTEX_CMP_REQUEUE)` reads `from` and uses `to` as a key.
        // - Condition 1: both pointers come from valid `&AtomicI32`s.
        // - Condition 2: the requeue limit travels in the timeout slot as an
        //   integer, as the syscall expects.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word_ptr(from),
                libc::FUTEX_CMP_REQUEUE | libc::FUTEX_PRIVATE_FLAG,
                clamp_count(wake),
                c_ulong::from(requeue),
                word_ptr(to),
                expected,
            )
        };
        if let Ok(moved) = usize::try_from(rc) {
            return Ok(RequeueOutcome::Moved(moved));
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => Ok(RequeueOutcome::ValueChanged),
            _ => Err(err.into()),
        }
    }

    fn supports_requeue(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "futex"
    }
}
