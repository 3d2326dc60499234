//! Tests for the condition variable.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;

use crate::condvar::ConditionVariable;
use crate::error::Result;
use crate::level::LockLevel;
use crate::mutex::Mutex;
use crate::mutex_tests::backends;
use crate::runtime;
use crate::thread::Thread;
use crate::wait_wake::{RequeueOutcome, WaitOutcome, WaitWake};

/// Data only touched while holding `lock`.
struct Guarded<T> {
    lock: Mutex,
    value: UnsafeCell<T>,
}

// SAFETY: `value` is only accessed through `with`, which asserts the lock.
unsafe impl<T: Send> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    fn new(lock: Mutex, value: T) -> Self {
        Self {
            lock,
            value: UnsafeCell::new(value),
        }
    }

    fn with<R>(&self, thread: &Thread, f: impl FnOnce(&mut T) -> R) -> R {
        self.lock.assert_exclusive_held(thread);
        // SAFETY: the lock is held, so no other reference exists.
        f(unsafe { &mut *self.value.get() })
    }
}

/// Delegates to another backend but cannot requeue, so broadcast has to
/// wake every waiter instead.
#[derive(Debug)]
struct WakeAllOnly(&'static dyn WaitWake);

impl WaitWake for WakeAllOnly {
    fn wait(
        &self,
        word: &AtomicI32,
        expected: i32,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome> {
        self.0.wait(word, expected, timeout)
    }

    fn wake(&self, word: &AtomicI32, count: u32) -> Result<usize> {
        self.0.wake(word, count)
    }

    fn requeue(
        &self,
        _from: &AtomicI32,
        _expected: i32,
        _to: &AtomicI32,
        _wake: u32,
        _requeue: u32,
    ) -> Result<RequeueOutcome> {
        panic!("requeue called on {}", self.name());
    }

    fn supports_requeue(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "wake-all"
    }
}

fn wake_all_backends() -> Vec<&'static dyn WaitWake> {
    backends()
        .into_iter()
        .map(|inner| -> &'static dyn WaitWake { Box::leak(Box::new(WakeAllOnly(inner))) })
        .collect()
}

fn wait_for_waiters(cond: &ConditionVariable<'_>, lock: &Mutex, me: &Thread, count: i32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        {
            let _held = lock.lock(me);
            if cond.num_waiters() >= count {
                return;
            }
        }
        assert!(Instant::now() < deadline, "waiters never arrived");
        thread::yield_now();
    }
}

#[test]
fn test_signal_without_waiters_is_noop() {
    let thread = Thread::attach("signaller");
    let lock = Mutex::new("cond lock", LockLevel::Default, false);
    let cond = ConditionVariable::new("cond", &lock);
    let _held = lock.lock(&thread);
    cond.signal(&thread);
    cond.broadcast(&thread);
    assert_eq!(cond.num_waiters(), 0);
    assert_eq!(lock.num_contenders(), 0);
}

#[test]
#[should_panic(expected = "not held by thread")]
fn test_signal_requires_guard() {
    let thread = Thread::attach("signaller");
    let lock = Mutex::new("cond lock", LockLevel::Default, false);
    let cond = ConditionVariable::new("cond", &lock);
    cond.signal(&thread);
}

#[test]
#[should_panic(expected = "waiting on unacquired mutex")]
fn test_wait_requires_guard() {
    let thread = Thread::attach("waiter");
    let lock = Mutex::new("cond lock", LockLevel::Default, false);
    let cond = ConditionVariable::new("cond", &lock);
    cond.wait(&thread);
}

#[test]
fn test_timed_wait_times_out() {
    for backend in backends() {
        let thread = Thread::attach("timed waiter");
        let lock = Mutex::with_backend("cond lock", LockLevel::Default, false, backend);
        let cond = ConditionVariable::new("cond", &lock);
        let _held = lock.lock(&thread);
        let start = Instant::now();
        assert!(cond.timed_wait(&thread, 20, 0), "{}", backend.name());
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(lock.is_exclusive_held(&thread));
        assert_eq!(cond.num_waiters(), 0);
        assert_eq!(lock.num_contenders(), 0);
    }
}

#[test]
fn test_wait_restores_recursion_count() {
    let lock = Mutex::new("recursive cond lock", LockLevel::Default, true);
    let cond = ConditionVariable::new("cond", &lock);
    let done = AtomicUsize::new(0);
    thread::scope(|s| {
        s.spawn(|| {
            let waiter = Thread::attach("waiter");
            lock.exclusive_lock(&waiter);
            lock.exclusive_lock(&waiter);
            lock.exclusive_lock(&waiter);
            while done.load(Ordering::SeqCst) == 0 {
                cond.wait(&waiter);
            }
            assert_eq!(lock.recursion_count(), 3);
            for _ in 0..3 {
                lock.exclusive_unlock(&waiter);
            }
        });

        let signaller = Thread::attach("signaller");
        wait_for_waiters(&cond, &lock, &signaller, 1);
        let _held = lock.lock(&signaller);
        done.store(1, Ordering::SeqCst);
        cond.signal(&signaller);
    });
    assert_eq!(lock.exclusive_owner_tid(), 0);
    assert_eq!(lock.num_contenders(), 0);
}

#[test]
fn test_producer_consumer() {
    const ITEMS: u64 = 10_000;

    for backend in backends() {
        let queue = Guarded::new(
            Mutex::with_backend("queue lock", LockLevel::Default, false, backend),
            VecDeque::new(),
        );
        let not_empty = ConditionVariable::new("queue not empty", &queue.lock);
        let mut received = 0_u64;
        let mut sum = 0_u64;

        thread::scope(|s| {
            s.spawn(|| {
                let producer = Thread::attach("producer");
                for item in 1..=ITEMS {
                    let _held = queue.lock.lock(&producer);
                    queue.with(&producer, |q| q.push_back(item));
                    not_empty.signal(&producer);
                }
            });

            let consumer = Thread::attach("consumer");
            while received < ITEMS {
                let _held = queue.lock.lock(&consumer);
                loop {
                    if let Some(item) = queue.with(&consumer, VecDeque::pop_front) {
                        received += 1;
                        sum += item;
                        break;
                    }
                    not_empty.wait(&consumer);
                }
            }
        });

        assert_eq!(received, ITEMS, "{}", backend.name());
        assert_eq!(sum, ITEMS * (ITEMS + 1) / 2);
        assert_eq!(not_empty.num_waiters(), 0);
    }
}

fn assert_broadcast_releases_all(backend: &'static dyn WaitWake) {
    const WAITERS: usize = 6;

    let state = Guarded::new(
        Mutex::with_backend("gate lock", LockLevel::Default, false, backend),
        false,
    );
    let gate = ConditionVariable::new("gate open", &state.lock);
    let passed = AtomicUsize::new(0);

    thread::scope(|s| {
        for i in 0..WAITERS {
            let (state, gate, passed) = (&state, &gate, &passed);
            s.spawn(move || {
                let waiter = Thread::attach(format!("gate-{i}"));
                let _held = state.lock.lock(&waiter);
                while !state.with(&waiter, |open| *open) {
                    gate.wait(&waiter);
                }
                passed.fetch_add(1, Ordering::SeqCst);
            });
        }

        let opener = Thread::attach("opener");
        wait_for_waiters(&gate, &state.lock, &opener, WAITERS as i32);
        let _held = state.lock.lock(&opener);
        state.with(&opener, |open| *open = true);
        gate.broadcast(&opener);
    });

    assert_eq!(passed.load(Ordering::SeqCst), WAITERS, "{}", backend.name());
    assert_eq!(gate.num_waiters(), 0);
    assert_eq!(state.lock.num_contenders(), 0, "{}", backend.name());
}

#[test]
fn test_broadcast_wakes_all_waiters() {
    for backend in backends() {
        assert_broadcast_releases_all(backend);
    }
}

#[test]
fn test_broadcast_without_requeue_wakes_all_waiters() {
    for backend in wake_all_backends() {
        assert!(!backend.supports_requeue());
        assert_broadcast_releases_all(backend);
    }
}

#[test]
fn test_broadcast_with_timed_waiters_settles_contenders() {
    const WAITERS: usize = 4;

    for backend in backends() {
        let state = Guarded::new(
            Mutex::with_backend("timed gate lock", LockLevel::Default, false, backend),
            false,
        );
        let gate = ConditionVariable::new("timed gate", &state.lock);

        thread::scope(|s| {
            for i in 0..WAITERS {
                let (state, gate) = (&state, &gate);
                s.spawn(move || {
                    let waiter = Thread::attach(format!("timed-{i}"));
                    let _held = state.lock.lock(&waiter);
                    while !state.with(&waiter, |open| *open) {
                        gate.timed_wait(&waiter, 5, 0);
                    }
                });
            }

            let opener = Thread::attach("opener");
            thread::sleep(Duration::from_millis(20));
            let _held = state.lock.lock(&opener);
            state.with(&opener, |open| *open = true);
            gate.broadcast(&opener);
        });

        // Waiters that timed out after being handed to the guard must not
        // leave contenders behind.
        assert_eq!(gate.num_waiters(), 0);
        assert_eq!(state.lock.num_contenders(), 0, "{}", backend.name());
    }
}

#[test]
fn test_wait_holding_locks_skips_diagnostic() {
    let outer = Mutex::new("outer lock", LockLevel::Heap, false);
    let inner = Mutex::new("inner lock", LockLevel::Default, false);
    let cond = ConditionVariable::new("inner cond", &inner);
    let done = AtomicUsize::new(0);
    thread::scope(|s| {
        s.spawn(|| {
            let waiter = Thread::attach("waiter");
            let _outer = outer.lock(&waiter);
            let _inner = inner.lock(&waiter);
            while done.load(Ordering::SeqCst) == 0 {
                cond.wait_holding_locks(&waiter);
            }
        });
        let signaller = Thread::attach("signaller");
        wait_for_waiters(&cond, &inner, &signaller, 1);
        let _held = inner.lock(&signaller);
        done.store(1, Ordering::SeqCst);
        cond.signal(&signaller);
    });
}

#[test]
fn test_debug_output() {
    let lock = Mutex::new("debug lock", LockLevel::Default, false);
    let cond = ConditionVariable::new("debug cond", &lock);
    let debug = format!("{cond:?}");
    assert!(debug.contains("debug cond"));
    assert!(debug.contains("debug lock"));
    assert_eq!(cond.name(), "debug cond");
    assert!(std::ptr::eq(cond.guard(), &lock));
}

#[test]
#[serial(shutdown)]
#[should_panic(expected = "destroyed with 2 waiters")]
fn test_drop_with_waiters_aborts() {
    let lock = Mutex::new("abandoned cond lock", LockLevel::Default, false);
    let cond = ConditionVariable::new("abandoned cond", &lock);
    cond.add_waiters(2);
    drop(cond);
}

#[test]
#[serial(shutdown)]
fn test_drop_with_waiters_during_shutdown_warns() {
    runtime::begin_shutdown();
    let lock = Mutex::new("abandoned cond lock", LockLevel::Default, false);
    let cond = ConditionVariable::new("abandoned cond", &lock);
    cond.add_waiters(1);
    drop(cond);
    runtime::cancel_shutdown();
}
