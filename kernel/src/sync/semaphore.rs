//! Counting semaphore: the simplest primitive everything else in this
//! module is built from the same way the original's higher-level
//! locks sit on top of `sem_wait`/`sem_post`.

use spin::Mutex;

use crate::thread::{self, WaitQueue};

struct State {
    count: isize,
    limit: isize,
    waiters: WaitQueue,
}

pub struct Semaphore {
    inner: Mutex<State>,
}

impl Semaphore {
    /// No upper limit beyond `isize::MAX`, matching `sem_init`.
    pub const fn new(initial: isize) -> Self {
        Self::with_limit(initial, isize::MAX)
    }

    /// Caps `count` at `limit`, matching `sem_init_limit` — used to build
    /// mutexes and condition variables on top of a semaphore.
    pub const fn with_limit(initial: isize, limit: isize) -> Self {
        Self {
            inner: Mutex::new(State {
                count: initial,
                limit,
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// Block until the count is positive, then consume one unit.
    pub fn wait(&self) {
        loop {
            let mut s = self.inner.lock();
            if s.count > 0 {
                s.count -= 1;
                return;
            }
            s.waiters.park();
            drop(s);
            thread::reschedule();
        }
    }

    /// Non-blocking `wait`: `true` if a unit was consumed.
    pub fn try_wait(&self) -> bool {
        let mut s = self.inner.lock();
        if s.count > 0 {
            s.count -= 1;
            true
        } else {
            false
        }
    }

    /// If a waiter is parked, the "slot" transfers to it directly — `count`
    /// is left untouched, matching the invariant that `count == 0` whenever
    /// the wait queue is nonempty. Only increments (clamped to `limit`)
    /// when no one is waiting.
    pub fn post(&self) {
        let mut s = self.inner.lock();
        match s.waiters.pop_one() {
            Some(next) => {
                // SAFETY: popped from this semaphore's own wait queue.
                unsafe { thread::wakeup(next) };
            }
            None => {
                s.count = (s.count + 1).min(s.limit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_wait_respects_count() {
        let sem = Semaphore::new(1);
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        sem.post();
        assert!(sem.try_wait());
    }

    #[test]
    fn post_clamps_to_limit() {
        let sem = Semaphore::with_limit(1, 1);
        sem.post();
        sem.post();
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    }
}
