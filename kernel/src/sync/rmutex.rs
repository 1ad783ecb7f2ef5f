//! Recursive mutex: the owning thread may lock it repeatedly without
//! deadlocking itself, as long as every `lock` is matched by an
//! `unlock`.

use spin::Mutex as SpinMutex;

use crate::error::{KernelError, KernelResult};
use crate::thread::{self, ThreadId, WaitQueue};

struct State {
    owner: Option<ThreadId>,
    depth: usize,
    waiters: WaitQueue,
}

pub struct RMutex {
    inner: SpinMutex<State>,
}

impl RMutex {
    pub const fn new() -> Self {
        Self {
            inner: SpinMutex::new(State {
                owner: None,
                depth: 0,
                waiters: WaitQueue::new(),
            }),
        }
    }

    pub fn lock(&self) {
        let me = thread::current_id();
        let mut parked = false;
        loop {
            let mut s = self.inner.lock();
            if s.depth == 0 {
                s.owner = me;
                s.depth = 1;
                return;
            }
            if s.owner == me {
                if parked {
                    // `unlock()` handed ownership to us directly while we
                    // were parked; `depth` is already 1 for us.
                    return;
                }
                s.depth += 1;
                return;
            }
            parked = true;
            s.waiters.park();
            drop(s);
            thread::reschedule();
        }
    }

    /// `InvalidArgument` if the caller doesn't hold the lock at all.
    ///
    /// If a thread is waiting and this call drops `depth` to zero,
    /// ownership transfers to it directly in this same critical section
    /// (`owner`/`depth` set for it before it's woken) rather than
    /// releasing first and waking second, which would let a fresh
    /// `lock()` call steal it ahead of the FIFO waiter.
    pub fn unlock(&self) -> KernelResult<()> {
        let me = thread::current_id();
        let mut s = self.inner.lock();
        if s.depth == 0 || s.owner != me {
            return Err(KernelError::InvalidArgument {
                reason: "rmutex_unlock: caller does not hold this mutex",
            });
        }
        s.depth -= 1;
        if s.depth == 0 {
            match s.waiters.pop_one() {
                Some(next) => {
                    // SAFETY: popped from this lock's own wait queue.
                    s.owner = Some(unsafe { next.as_ref().id() });
                    s.depth = 1;
                    unsafe { thread::wakeup(next) };
                }
                None => {
                    s.owner = None;
                }
            }
        }
        Ok(())
    }
}

impl Default for RMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_lock_unlock_balances() {
        let m = RMutex::new();
        m.lock();
        m.lock();
        m.unlock().unwrap();
        m.unlock().unwrap();
        assert!(m.unlock().is_err());
    }
}
