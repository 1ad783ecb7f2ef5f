//! Non-recursive mutual exclusion lock with owner tracking, so
//! unlocking from the wrong thread is rejected rather than silently
//! corrupting the lock state.

use spin::Mutex as SpinMutex;

use crate::error::{KernelError, KernelResult};
use crate::thread::{self, ThreadId, WaitQueue};

struct State {
    locked: bool,
    owner: Option<ThreadId>,
    waiters: WaitQueue,
}

pub struct KMutex {
    inner: SpinMutex<State>,
}

impl KMutex {
    pub const fn new() -> Self {
        Self {
            inner: SpinMutex::new(State {
                locked: false,
                owner: None,
                waiters: WaitQueue::new(),
            }),
        }
    }

    pub fn lock(&self) {
        let me = thread::current_id();
        let mut parked = false;
        loop {
            let mut s = self.inner.lock();
            if !s.locked {
                s.locked = true;
                s.owner = me;
                return;
            }
            if parked && s.owner == me {
                // `unlock()` handed ownership to us directly while we
                // were parked; `locked`/`owner` are already set for us.
                return;
            }
            parked = true;
            s.waiters.park();
            drop(s);
            thread::reschedule();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().locked
    }

    pub fn try_lock(&self) -> bool {
        let mut s = self.inner.lock();
        if s.locked {
            false
        } else {
            s.locked = true;
            s.owner = thread::current_id();
            true
        }
    }

    /// `Killed` if the caller doesn't currently hold the lock — matches
    /// the syscall-layer contract that a non-owner unlock terminates the
    /// calling thread rather than returning an error code.
    ///
    /// If a thread is waiting, ownership is handed to it directly inside
    /// this critical section — `locked` stays `true` and `owner` becomes
    /// the waiter's id before it is woken — rather than releasing the
    /// lock first and waking second, which would let a fresh `lock()`
    /// call steal it ahead of the FIFO waiter.
    pub fn unlock(&self) -> KernelResult<()> {
        let mut s = self.inner.lock();
        if !s.locked || s.owner != thread::current_id() {
            return Err(KernelError::Killed);
        }
        match s.waiters.pop_one() {
            Some(next) => {
                // SAFETY: popped from this lock's own wait queue.
                s.owner = Some(unsafe { next.as_ref().id() });
                unsafe { thread::wakeup(next) };
            }
            None => {
                s.locked = false;
                s.owner = None;
            }
        }
        Ok(())
    }
}

impl Default for KMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_then_unlock() {
        let m = KMutex::new();
        assert!(m.try_lock());
        assert!(!m.try_lock());
        m.unlock().unwrap();
        assert!(m.try_lock());
    }

    #[test]
    fn unlock_without_holding_is_rejected() {
        let m = KMutex::new();
        assert!(m.unlock().is_err());
    }
}
