//! Writer-preferring reader/writer lock: once a writer is waiting, new
//! readers block too, so a steady stream of readers can't starve it.

use spin::Mutex as SpinMutex;

use crate::thread::{self, WaitQueue};

struct State {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
    read_waiters: WaitQueue,
    write_waiters: WaitQueue,
}

pub struct RwLock {
    inner: SpinMutex<State>,
}

impl RwLock {
    pub const fn new() -> Self {
        Self {
            inner: SpinMutex::new(State {
                readers: 0,
                writer: false,
                waiting_writers: 0,
                read_waiters: WaitQueue::new(),
                write_waiters: WaitQueue::new(),
            }),
        }
    }

    pub fn read_lock(&self) {
        loop {
            let mut s = self.inner.lock();
            if !s.writer && s.waiting_writers == 0 {
                s.readers += 1;
                return;
            }
            s.read_waiters.park();
            drop(s);
            thread::reschedule();
        }
    }

    /// If this is the last reader and a writer is waiting, `writer` is set
    /// directly for the popped waiter inside this critical section before
    /// it's woken, rather than waking it and letting it re-check — which
    /// would let a fresh `read_lock`/`write_lock` call steal ahead of it.
    pub fn read_unlock(&self) {
        let mut s = self.inner.lock();
        s.readers -= 1;
        if s.readers == 0 && s.waiting_writers > 0 {
            if let Some(next) = s.write_waiters.pop_one() {
                s.waiting_writers -= 1;
                s.writer = true;
                // SAFETY: popped from this lock's own wait queue.
                unsafe { thread::wakeup(next) };
            }
        }
    }

    pub fn write_lock(&self) {
        let mut counted = false;
        let mut parked = false;
        loop {
            let mut s = self.inner.lock();
            if parked && s.writer {
                // `write_unlock`/`read_unlock` transferred the writer role
                // to us directly while we were parked; `waiting_writers`
                // was already decremented for us at that point.
                return;
            }
            if !s.writer && s.readers == 0 {
                if counted {
                    s.waiting_writers -= 1;
                }
                s.writer = true;
                return;
            }
            if !counted {
                s.waiting_writers += 1;
                counted = true;
            }
            parked = true;
            s.write_waiters.park();
            drop(s);
            thread::reschedule();
        }
    }

    /// If a writer is waiting, `writer` stays `true` and is handed to the
    /// popped waiter directly inside this critical section, preserving
    /// writer-preferring fairness instead of clearing `writer` and letting
    /// a fresh caller race the woken waiter for it.
    pub fn write_unlock(&self) {
        let mut s = self.inner.lock();
        match s.write_waiters.pop_one() {
            Some(next) => {
                s.waiting_writers -= 1;
                // SAFETY: popped from this lock's own wait queue.
                unsafe { thread::wakeup(next) };
            }
            None => {
                s.writer = false;
                s.read_waiters.wake_all();
            }
        }
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_readers_allowed_concurrently() {
        let lock = RwLock::new();
        lock.read_lock();
        lock.read_lock();
        assert_eq!(lock.inner.lock().readers, 2);
        lock.read_unlock();
        lock.read_unlock();
    }

    #[test]
    fn writer_excludes_further_readers_state() {
        let lock = RwLock::new();
        lock.write_lock();
        assert!(lock.inner.lock().writer);
        lock.write_unlock();
        assert!(!lock.inner.lock().writer);
    }
}
