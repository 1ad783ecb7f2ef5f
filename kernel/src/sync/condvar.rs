//! Condition variable paired with an external [`KMutex`], following the
//! usual contract: the caller holds `mutex` before calling `wait`, which
//! atomically parks and releases it, and re-acquires `mutex` before
//! returning.

use spin::Mutex as SpinMutex;

use crate::sync::mutex::KMutex;
use crate::thread::{self, WaitQueue};

pub struct CondVar {
    waiters: SpinMutex<WaitQueue>,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            waiters: SpinMutex::new(WaitQueue::new()),
        }
    }

    /// Caller must already hold `mutex`. Released while parked,
    /// re-acquired before this returns.
    pub fn wait(&self, mutex: &KMutex) {
        self.waiters.lock().park();
        let _ = mutex.unlock();
        thread::reschedule();
        mutex.lock();
    }

    pub fn notify_one(&self) {
        self.waiters.lock().wake_one();
    }

    pub fn notify_all(&self) {
        self.waiters.lock().wake_all();
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
