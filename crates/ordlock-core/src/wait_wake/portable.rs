//! Portable wait/wake backend.
//!
//! Waiters park on a per-thread [`Parker`] (a `parking_lot` mutex and
//! condvar) after enqueueing themselves in the bucket that owns the watched
//! word's address. The value check happens under the bucket lock, which is
//! what makes `wait` atomic with respect to `wake` and `requeue`.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::{RequeueOutcome, WaitOutcome, WaitWake};
use crate::error::Result;

const BUCKET_BITS: u32 = 6;
const BUCKET_COUNT: usize = 1 << BUCKET_BITS;

#[derive(Debug)]
struct Parker {
    /// Address of the word this parker is queued on. Changes only under the
    /// locks of both the old and the new bucket.
    key: AtomicUsize,
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn new(key: usize) -> Self {
        Self {
            key: AtomicUsize::new(key),
            notified: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn key(&self) -> usize {
        self.key.load(Ordering::Acquire)
    }

    fn unpark(&self) {
        let mut notified = self.notified.lock();
        *notified = true;
        self.condvar.notify_one();
    }

    /// Parks until notified or `deadline`. Returns whether it was notified.
    fn park(&self, deadline: Option<Instant>) -> bool {
        let mut notified = self.notified.lock();
        while !*notified {
            match deadline {
                None => self.condvar.wait(&mut notified),
                Some(deadline) => {
                    if self.condvar.wait_until(&mut notified, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *notified
    }
}

type Queue = Vec<Arc<Parker>>;

/// Address-keyed parking table.
///
/// Waiters on different words may share a bucket; every operation filters
/// the bucket's queue by address.
#[derive(Debug)]
pub struct ParkingTable {
    buckets: Box<[Mutex<Queue>]>,
}

impl Default for ParkingTable {
    fn default() -> Self {
        Self::new()
    }
}

fn address(word: &AtomicI32) -> usize {
    std::ptr::from_ref(word) as usize
}

impl ParkingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    /// Fibonacci hash of a word address. The bucket comes from the top bits
    /// of the product, which depend on every bit of the address.
    #[allow(clippy::cast_possible_truncation)]
    pub(super) fn bucket_index(key: usize) -> usize {
        // Words are 4-byte aligned; fold the low bits away before hashing.
        let hash = ((key >> 2) as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (hash >> (u64::BITS - BUCKET_BITS)) as usize
    }

    fn bucket(&self, key: usize) -> &Mutex<Queue> {
        &self.buckets[Self::bucket_index(key)]
    }

    /// Removes `parker` from whichever bucket currently queues it. Returns
    /// false if a waker already dequeued it.
    fn dequeue(&self, parker: &Arc<Parker>) -> bool {
        loop {
            let key = parker.key();
            let mut queue = self.bucket(key).lock();
            if parker.key() != key {
                // Requeued between the load and the lock.
                continue;
            }
            return match queue.iter().position(|p| Arc::ptr_eq(p, parker)) {
                Some(pos) => {
                    queue.remove(pos);
                    true
                }
                None => false,
            };
        }
    }

    /// Number of threads currently parked on `word`.
    #[must_use]
    pub fn parked_on(&self, word: &AtomicI32) -> usize {
        let key = address(word);
        self.bucket(key)
            .lock()
            .iter()
            .filter(|p| p.key() == key)
            .count()
    }

    /// Pulls waiters for `from_key` out of `from_queue`: the first `wake`
    /// into `woken`, the next `requeue` re-keyed to `to_key` and appended to
    /// `to_queue` (or back onto `from_queue` when both words share a bucket).
    fn transfer(
        from_queue: &mut Queue,
        to_queue: Option<&mut Queue>,
        from_key: usize,
        to_key: usize,
        mut wake: u32,
        mut requeue: u32,
        woken: &mut Queue,
    ) -> usize {
        let mut moved = Vec::new();
        let mut i = 0;
        while i < from_queue.len() && (wake > 0 || requeue > 0) {
            if from_queue[i].key() != from_key {
                i += 1;
                continue;
            }
            let parker = from_queue.remove(i);
            if wake > 0 {
                wake -= 1;
                woken.push(parker);
            } else {
                requeue -= 1;
                parker.key.store(to_key, Ordering::Release);
                moved.push(parker);
            }
        }
        let count = woken.len() + moved.len();
        match to_queue {
            Some(queue) => queue.extend(moved),
            None => from_queue.extend(moved),
        }
        count
    }

    fn lock_pair(&self, a: usize, b: usize) -> (MutexGuard<'_, Queue>, MutexGuard<'_, Queue>) {
        if a < b {
            let first = self.buckets[a].lock();
            (first, self.buckets[b].lock())
        } else {
            let first = self.buckets[b].lock();
            (self.buckets[a].lock(), first)
        }
    }
}

impl WaitWake for ParkingTable {
    fn wait(
        &self,
        word: &AtomicI32,
        expected: i32,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome> {
        let key = address(word);
        let parker = Arc::new(Parker::new(key));
        {
            let mut queue = self.bucket(key).lock();
            if word.load(Ordering::SeqCst) != expected {
                return Ok(WaitOutcome::ValueChanged);
            }
            queue.push(Arc::clone(&parker));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        if parker.park(deadline) {
            return Ok(WaitOutcome::Woken);
        }
        if self.dequeue(&parker) {
            return Ok(WaitOutcome::TimedOut);
        }
        // A waker claimed us between the timeout and the dequeue; its
        // notification is imminent.
        parker.park(None);
        Ok(WaitOutcome::Woken)
    }

    fn wake(&self, word: &AtomicI32, count: u32) -> Result<usize> {
        let key = address(word);
        let mut woken = Vec::new();
        {
            let mut queue = self.bucket(key).lock();
            Self::transfer(&mut queue, None, key, key, count, 0, &mut woken);
        }
        for parker in &woken {
            parker.unpark();
        }
        Ok(woken.len())
    }

    fn requeue(
        &self,
        from: &AtomicI32,
        expected: i32,
        to: &AtomicI32,
        wake: u32,
        requeue: u32,
    ) -> Result<RequeueOutcome> {
        let (from_key, to_key) = (address(from), address(to));
        let (from_index, to_index) = (Self::bucket_index(from_key), Self::bucket_index(to_key));
        let mut woken = Vec::new();
        let moved = if from_index == to_index {
            let mut queue = self.buckets[from_index].lock();
            if from.load(Ordering::SeqCst) != expected {
                return Ok(RequeueOutcome::ValueChanged);
            }
            Self::transfer(&mut queue, None, from_key, to_key, wake, requeue, &mut woken)
        } else {
            let (mut from_queue, mut to_queue) = self.lock_pair(from_index, to_index);
            if from.load(Ordering::SeqCst) != expected {
                return Ok(RequeueOutcome::ValueChanged);
            }
            Self::transfer(
                &mut from_queue,
                Some(&mut to_queue),
                from_key,
                to_key,
                wake,
                requeue,
                &mut woken,
            )
        };
        for parker in &woken {
            parker.unpark();
        }
        Ok(RequeueOutcome::Moved(moved))
    }

    fn supports_requeue(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "portable"
    }
}
