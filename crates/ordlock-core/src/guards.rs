//! Scoped lock holders.
//!
//! Each guard locks on construction and unlocks on drop with the same
//! thread it was created with.

use crate::mutex::Mutex;
use crate::rwlock::ReaderWriterMutex;
use crate::thread::Thread;

/// Holds a [`Mutex`] for the guard's lifetime.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct MutexLock<'a> {
    mutex: &'a Mutex,
    thread: Option<&'a Thread>,
}

impl<'a> MutexLock<'a> {
    pub(crate) fn new(mutex: &'a Mutex, thread: Option<&'a Thread>) -> Self {
        mutex.exclusive_lock(thread);
        Self { mutex, thread }
    }

    /// The locked mutex.
    #[must_use]
    pub fn mutex(&self) -> &'a Mutex {
        self.mutex
    }
}

impl Drop for MutexLock<'_> {
    fn drop(&mut self) {
        self.mutex.exclusive_unlock(self.thread);
    }
}

/// Holds a [`ReaderWriterMutex`] shared for the guard's lifetime.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReaderMutexLock<'a> {
    mutex: &'a ReaderWriterMutex,
    thread: Option<&'a Thread>,
}

impl<'a> ReaderMutexLock<'a> {
    pub(crate) fn new(mutex: &'a ReaderWriterMutex, thread: Option<&'a Thread>) -> Self {
        mutex.shared_lock(thread);
        Self { mutex, thread }
    }
}

impl Drop for ReaderMutexLock<'_> {
    fn drop(&mut self) {
        self.mutex.shared_unlock(self.thread);
    }
}

/// Holds a [`ReaderWriterMutex`] exclusively for the guard's lifetime.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriterMutexLock<'a> {
    mutex: &'a ReaderWriterMutex,
    thread: Option<&'a Thread>,
}

impl<'a> WriterMutexLock<'a> {
    pub(crate) fn new(mutex: &'a ReaderWriterMutex, thread: Option<&'a Thread>) -> Self {
        mutex.exclusive_lock(thread);
        Self { mutex, thread }
    }
}

impl Drop for WriterMutexLock<'_> {
    fn drop(&mut self) {
        self.mutex.exclusive_unlock(self.thread);
    }
}
