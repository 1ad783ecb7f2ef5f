//! Timer wheel: a single unsorted list of pending deadlines, drained by
//! one dedicated kernel thread per the original design. Keeping expiry
//! off the interrupt path means a timer handler can block, allocate, or
//! touch any lock a regular thread could.

extern crate alloc;

use alloc::boxed::Box;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::adt::list::{ElemLink, Link, Linked, LinkedList};
use crate::arch::InterruptGuard;
use crate::sched;
use crate::thread::{self, Thread, ThreadFlags};

/// One pending deadline, normally embedded in the struct that wants to
/// be woken (e.g. [`crate::thread::Thread::sleep_timer`]).
pub struct Timer {
    link: ElemLink<Timer>,
    deadline: u64,
    callback: Option<Box<dyn FnMut() + Send + 'static>>,
    armed: bool,
    /// Set while [`process_expired`] is executing this timer's callback.
    /// `disarm` spins on this so destroying a timer is a synchronization
    /// point with a handler already in flight, per the timer-thread
    /// contract.
    running: AtomicBool,
}

unsafe impl Linked for Timer {
    fn link(&self) -> &Link {
        self.link.link()
    }
    fn link_mut(&mut self) -> &mut Link {
        self.link.link_mut()
    }
}

unsafe impl Send for Timer {}

impl Timer {
    pub const fn new() -> Self {
        Self {
            link: ElemLink::new(),
            deadline: 0,
            callback: None,
            armed: false,
            running: AtomicBool::new(false),
        }
    }

    /// Schedule `callback` to run once `jiffies() >= deadline`.
    /// Re-arming an already-armed timer disarms it first.
    ///
    /// # Safety
    /// `self` must be at its final, stable address — normally true
    /// because it is embedded in a heap-allocated, already-linked owner
    /// such as [`crate::thread::Thread`].
    pub unsafe fn arm(&mut self, deadline: u64, callback: impl FnMut() + Send + 'static) {
        self.unlink();
        let ptr = NonNull::from(&mut *self);
        self.link.bind(ptr);
        self.deadline = deadline;
        self.callback = Some(Box::new(callback));
        self.armed = true;
        let _guard = InterruptGuard::new();
        // SAFETY: freshly unlinked by the `unlink()` above.
        unsafe { pending_list().push_back(ptr) };
    }

    /// Remove from the pending list if currently linked, without
    /// waiting on `running`. Used by both `arm` (a timer re-arming
    /// itself from inside its own callback must not wait on itself) and
    /// `disarm` (which adds the wait separately).
    fn unlink(&mut self) {
        let _guard = InterruptGuard::new();
        if self.link.link().is_linked() {
            let ptr = NonNull::from(&mut *self);
            // SAFETY: `is_linked()` confirms it is still on `pending_list`.
            unsafe { pending_list().remove(ptr) };
        }
        self.armed = false;
        self.callback = None;
    }

    /// Cancel a pending timer, synchronizing with a handler already in
    /// flight: remove it if pending, then spin-yield until `running`
    /// clears, then check again — a self-rearming handler may have put
    /// the timer back on the list while we were waiting.
    pub fn disarm(&mut self) {
        loop {
            self.unlink();
            while self.running.load(Ordering::Acquire) {
                thread::yield_now();
            }
            if !self.link.link().is_linked() {
                break;
            }
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

static PENDING: Mutex<LinkedList<Timer>> = Mutex::new(LinkedList::new());

fn pending_list() -> spin::MutexGuard<'static, LinkedList<Timer>> {
    PENDING.lock()
}

static TICK_PENDING: AtomicBool = AtomicBool::new(false);
/// Raw pointer bits of the dedicated timer thread, 0 when unset. Stored
/// as a plain integer rather than `NonNull<Thread>` so it can live in a
/// `static` without pulling `Thread`'s internals into a `Send` bound.
static TIMER_THREAD: AtomicUsize = AtomicUsize::new(0);

/// Called from the architectural tick handler, once per jiffy. Cheap:
/// just flags the dedicated timer thread runnable so expiry processing
/// happens outside interrupt context.
pub fn on_tick() {
    TICK_PENDING.store(true, Ordering::Relaxed);
    let addr = TIMER_THREAD.load(Ordering::Relaxed);
    if let Some(t) = NonNull::new(addr as *mut Thread) {
        // SAFETY: the timer thread is never destroyed for the life of
        // the kernel.
        unsafe { thread::wakeup(t) };
    }
}

/// Pop and run every timer whose deadline has passed. Pure enough to
/// unit test without a real scheduler.
pub fn process_expired() {
    loop {
        let due = {
            let mut list = pending_list();
            let now = sched::jiffies();
            match list.front() {
                Some(front) if unsafe { front.as_ref().deadline } <= now => list.pop_front(),
                _ => None,
            }
        };
        let Some(mut timer) = due else { break };
        // SAFETY: popped from the list, so exclusively ours.
        let timer_ref = unsafe { timer.as_mut() };
        timer_ref.armed = false;
        let cb = timer_ref.callback.take();
        timer_ref.running.store(true, Ordering::Release);
        if let Some(mut cb) = cb {
            cb();
        }
        timer_ref.running.store(false, Ordering::Release);
    }
}

fn timer_thread_main(_: usize) -> usize {
    loop {
        if TICK_PENDING.swap(false, Ordering::Relaxed) {
            process_expired();
        }
        thread::suspend();
    }
}

/// Spawn the dedicated timer thread. Must run once, after the thread
/// subsystem is up.
pub fn init() {
    let t = thread::create(timer_thread_main, 0, ThreadFlags::empty(), None)
        .expect("timer: failed to create dedicated timer thread");
    TIMER_THREAD.store(t.as_ptr() as usize, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    #[test]
    fn expired_timer_runs_callback_once() {
        *PENDING.lock() = LinkedList::new();
        static HITS: AtomicU32 = AtomicU32::new(0);
        let mut timer = Timer::new();
        unsafe {
            timer.arm(0, || {
                HITS.fetch_add(1, Ordering::Relaxed);
            });
        }
        process_expired();
        process_expired();
        assert_eq!(HITS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn disarm_before_expiry_prevents_callback() {
        *PENDING.lock() = LinkedList::new();
        static HITS: AtomicU32 = AtomicU32::new(0);
        let mut timer = Timer::new();
        unsafe {
            timer.arm(u64::MAX, || {
                HITS.fetch_add(1, Ordering::Relaxed);
            });
        }
        timer.disarm();
        process_expired();
        assert_eq!(HITS.load(Ordering::Relaxed), 0);
    }
}
