//! Tests for the futex backend.

use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::{Futex, RequeueOutcome, WaitOutcome, WaitWake, WAKE_ALL};

#[test]
fn test_wait_value_changed() {
    let word = AtomicI32::new(3);
    assert_eq!(Futex.wait(&word, 2, None).unwrap(), WaitOutcome::ValueChanged);
}

#[test]
fn test_wait_times_out() {
    let word = AtomicI32::new(0);
    let start = Instant::now();
    let outcome = Futex
        .wait(&word, 0, Some(Duration::from_millis(20)))
        .unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(15));
}

#[test]
fn test_wake_without_waiters() {
    let word = AtomicI32::new(0);
    assert_eq!(Futex.wake(&word, WAKE_ALL).unwrap(), 0);
}

#[test]
fn test_wake_releases_waiters() {
    let word = AtomicI32::new(0);
    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                while word.load(Ordering::SeqCst) == 0 {
                    Futex.wait(&word, 0, None).unwrap();
                }
            });
        }
        thread::sleep(Duration::from_millis(10));
        word.store(1, Ordering::SeqCst);
        Futex.wake(&word, WAKE_ALL).unwrap();
    });
}

#[test]
fn test_requeue_value_changed() {
    let from = AtomicI32::new(5);
    let to = AtomicI32::new(0);
    let outcome = Futex.requeue(&from, 4, &to, 0, WAKE_ALL).unwrap();
    assert_eq!(outcome, RequeueOutcome::ValueChanged);
}

#[test]
fn test_requeue_then_wake_target() {
    let from = AtomicI32::new(0);
    let to = AtomicI32::new(0);
    let released = AtomicI32::new(0);
    thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                while released.load(Ordering::SeqCst) == 0 {
                    // Woken either directly on `from` or via `to` after a requeue.
                    Futex
                        .wait(&from, 0, Some(Duration::from_millis(50)))
                        .unwrap();
                }
            });
        }
        thread::sleep(Duration::from_millis(10));
        released.store(1, Ordering::SeqCst);
        let outcome = Futex.requeue(&from, 0, &to, 0, WAKE_ALL).unwrap();
        assert!(matches!(outcome, RequeueOutcome::Moved(n) if n <= 3));
        Futex.wake(&to, WAKE_ALL).unwrap();
    });
}
