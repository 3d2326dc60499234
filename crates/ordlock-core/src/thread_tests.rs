//! Tests for the per-thread held-mutex table.

use serial_test::serial;

use crate::checker::BaseMutex;
use crate::level::LockLevel;
use crate::mutex::Mutex;
use crate::runtime;
use crate::thread::{os_tid, safe_tid, Thread};

#[test]
fn test_attach_uses_os_tid() {
    let thread = Thread::attach("worker");
    assert_eq!(thread.tid(), os_tid());
    assert_eq!(thread.name(), "worker");
    assert_ne!(thread.tid(), 0);
}

#[test]
fn test_os_tid_differs_across_threads() {
    let here = os_tid();
    let there = std::thread::spawn(os_tid).join().unwrap();
    assert_ne!(here, there);
}

#[test]
fn test_safe_tid() {
    let thread = Thread::with_tid("fake", 4242);
    assert_eq!(safe_tid(Some(&thread)), 4242);
    assert_eq!(safe_tid(None), os_tid());
}

#[test]
fn test_set_and_clear_held_mutex() {
    let thread = Thread::with_tid("t", 1);
    let heap = BaseMutex::new("heap lock", LockLevel::Heap);
    let other = BaseMutex::new("other heap lock", LockLevel::Heap);

    assert!(thread.held_mutex(LockLevel::Heap).is_none());
    thread.set_held_mutex(LockLevel::Heap, Some(&heap));
    assert!(thread.holds(LockLevel::Heap, &heap));
    assert!(!thread.holds(LockLevel::Heap, &other));
    assert_eq!(
        thread.held_mutex(LockLevel::Heap).map(|held| held.name()),
        Some("heap lock")
    );

    thread.set_held_mutex(LockLevel::Heap, None);
    assert!(!thread.holds(LockLevel::Heap, &heap));
    assert_eq!(thread.held_mutexes().count(), 0);
}

#[test]
fn test_held_mutexes_lowest_level_first() {
    let thread = Thread::with_tid("t", 1);
    let mutator = BaseMutex::new("mutator lock", LockLevel::Mutator);
    let logging = BaseMutex::new("logging lock", LockLevel::Logging);
    let classes = BaseMutex::new("classes lock", LockLevel::ClassLinkerClasses);
    thread.set_held_mutex(LockLevel::Mutator, Some(&mutator));
    thread.set_held_mutex(LockLevel::Logging, Some(&logging));
    thread.set_held_mutex(LockLevel::ClassLinkerClasses, Some(&classes));

    let held: Vec<_> = thread.held_mutexes().map(|(level, _)| level).collect();
    assert_eq!(
        held,
        vec![
            LockLevel::Logging,
            LockLevel::ClassLinkerClasses,
            LockLevel::Mutator
        ]
    );

    let debug = format!("{thread:?}");
    assert!(debug.contains("classes lock"));

    for level in held {
        thread.set_held_mutex(level, None);
    }
}

#[test]
#[should_panic(expected = "reserved tid 0")]
fn test_with_tid_zero_aborts() {
    let _ = Thread::with_tid("nobody", 0);
}

#[test]
#[serial(shutdown)]
fn test_entry_outlives_mutex_dropped_during_shutdown() {
    runtime::begin_shutdown();
    let thread = Thread::attach("shutdown");
    let first = Box::new(Mutex::new("first", LockLevel::Default, false));
    first.exclusive_lock(&thread);
    drop(first);

    let second = Box::new(Mutex::new("second", LockLevel::Heap, false));
    let held = thread.held_mutex(LockLevel::Default);
    assert_eq!(held.map(|h| (h.name(), h.level())), Some(("first", LockLevel::Default)));
    assert!(!thread.holds(LockLevel::Default, second.as_base()));
    assert!(format!("{thread:?}").contains("first"));
    assert!(!format!("{thread:?}").contains("second"));

    thread.set_held_mutex(LockLevel::Default, None);
    drop(second);
    runtime::cancel_shutdown();
}
