//! Primitives with lock-order checking and broadcast requeueing turned off.
//!
//! The configuration is process-wide, so this binary installs its own before
//! any primitive is built. Every test calls [`unchecked`] first.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use ordlock_core::config::{self, SyncConfig};
use ordlock_core::{ConditionVariable, LockLevel, Mutex, ReaderWriterMutex, Thread};

fn unchecked() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        config::install(SyncConfig {
            check_lock_order: false,
            requeue_on_broadcast: false,
            ..SyncConfig::default()
        })
        .unwrap();
    });
}

#[test]
fn test_installed_configuration_is_used() {
    unchecked();
    assert!(!config::global().check_lock_order);
    assert!(!config::global().requeue_on_broadcast);
}

#[test]
fn test_inverted_order_is_allowed() {
    unchecked();
    let thread = Thread::attach("inverted");
    let default = Mutex::new("default lock", LockLevel::Default, false);
    let heap = Mutex::new("heap lock", LockLevel::Heap, false);

    {
        let _a = default.lock(&thread);
        let _b = heap.lock(&thread);
        assert!(default.is_exclusive_held(&thread));
        assert!(heap.is_exclusive_held(&thread));
        assert!(thread.holds(LockLevel::Heap, heap.as_base()));
    }
    assert_eq!(thread.held_mutexes().count(), 0);
}

#[test]
fn test_same_level_pair_released_in_any_order() {
    unchecked();
    let thread = Thread::attach("same level");
    let first = Mutex::new("first lock", LockLevel::ClassLinkerClasses, false);
    let second = Mutex::new("second lock", LockLevel::ClassLinkerClasses, false);

    first.exclusive_lock(&thread);
    second.exclusive_lock(&thread);
    first.exclusive_unlock(&thread);
    assert!(thread.holds(LockLevel::ClassLinkerClasses, second.as_base()));
    assert!(second.is_exclusive_held(&thread));

    second.exclusive_unlock(&thread);
    assert_eq!(thread.held_mutexes().count(), 0);
    assert_eq!(first.exclusive_owner_tid(), 0);
    assert_eq!(second.exclusive_owner_tid(), 0);
}

#[test]
fn test_shared_holders_still_tracked() {
    unchecked();
    let thread = Thread::attach("reader");
    let inner = ReaderWriterMutex::new("inner rw", LockLevel::Default);
    let outer = ReaderWriterMutex::new("outer rw", LockLevel::Heap);

    inner.shared_lock(&thread);
    outer.shared_lock(&thread);
    assert!(inner.is_shared_held(&thread));
    assert!(outer.is_shared_held(&thread));
    assert!(!inner.is_exclusive_held(&thread));

    outer.shared_unlock(&thread);
    inner.shared_unlock(&thread);
    assert!(!inner.is_shared_held(&thread));
    assert!(!outer.is_shared_held(&thread));
}

#[test]
fn test_unattached_caller_at_any_level() {
    unchecked();
    let mutex = Mutex::new("unattached default lock", LockLevel::Default, false);
    mutex.exclusive_lock(None);
    assert!(mutex.is_exclusive_held(None));
    mutex.exclusive_unlock(None);
    assert_eq!(mutex.exclusive_owner_tid(), 0);
}

#[test]
fn test_broadcast_wakes_every_waiter() {
    const WAITERS: u8 = 5;

    unchecked();
    let lock = Mutex::new("gate lock", LockLevel::Default, false);
    let gate = ConditionVariable::new("gate open", &lock);
    let open = AtomicUsize::new(0);
    let passed = AtomicUsize::new(0);

    thread::scope(|s| {
        for i in 0..WAITERS {
            let (lock, gate, open, passed) = (&lock, &gate, &open, &passed);
            s.spawn(move || {
                let waiter = Thread::attach(format!("gate-{i}"));
                let _held = lock.lock(&waiter);
                while open.load(Ordering::Relaxed) == 0 {
                    gate.wait(&waiter);
                }
                passed.fetch_add(1, Ordering::SeqCst);
            });
        }

        let opener = Thread::attach("opener");
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            {
                let _held = lock.lock(&opener);
                if gate.num_waiters() >= i32::from(WAITERS) {
                    open.store(1, Ordering::Relaxed);
                    gate.broadcast(&opener);
                    break;
                }
            }
            assert!(Instant::now() < deadline, "waiters never arrived");
            thread::yield_now();
        }
    });

    assert_eq!(passed.load(Ordering::SeqCst), usize::from(WAITERS));
    assert_eq!(gate.num_waiters(), 0);
    assert_eq!(lock.num_contenders(), 0);
}
