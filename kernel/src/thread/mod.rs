//! Kernel threads: the unit of execution and scheduling.
//!
//! Mirrors the original's `thread_t`: a fixed-size kernel stack with a
//! saved [`ArchContext`] living at its top, a small state machine
//! (`Ready`/`Running`/`Sleeping`/`Zombie`), and the bookkeeping needed for
//! `thread_join` and timed sleeps. Threads are heap-allocated and live at
//! a stable address for as long as they're linked into a scheduler queue
//! or wait queue — `thread_destroy` is the only place that frees one.

extern crate alloc;

use alloc::boxed::Box;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::adt::list::{ElemLink, Link, Linked, LinkedList};
use crate::arch::{self, ArchContext, InterruptGuard, ThreadContext};
use crate::error::{KernelError, KernelResult};
use crate::mm::vmm::AddressSpace;
use crate::sched;
use crate::timer::Timer;

pub const STACK_SIZE: usize = 4096;

pub type ThreadId = usize;
pub type ThreadEntry = fn(usize) -> usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Sleeping,
    Zombie,
}

bitflags::bitflags! {
    pub struct ThreadFlags: u32 {
        /// Thread owns a freshly created address space rather than
        /// sharing its creator's.
        const NEW_VMM = 1 << 0;
    }
}

fn next_id() -> ThreadId {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A kernel thread.
///
/// `link` is shared between the ready queue and wait queues: a thread is
/// on at most one of them at a time, so one embedded [`ElemLink`]
/// suffices for both roles.
pub struct Thread {
    id: ThreadId,
    link: ElemLink<Thread>,
    state: ThreadState,
    stack: Box<[u8; STACK_SIZE]>,
    context: ArchContext,
    vmm: Option<alloc::sync::Arc<spin::Mutex<AddressSpace>>>,
    entry: ThreadEntry,
    entry_data: usize,
    retval: usize,
    joiner: Option<NonNull<Thread>>,
    cpu: usize,
    scheduled_at: u64,
    sleep_timer: Timer,
    /// Set when this thread backs a process's user thread; opaque to
    /// keep `thread` independent of `process`.
    pub owner_process: Option<usize>,
}

unsafe impl Linked for Thread {
    fn link(&self) -> &Link {
        self.link.link()
    }
    fn link_mut(&mut self) -> &mut Link {
        self.link.link_mut()
    }
}

unsafe impl Send for Thread {}

extern "C" fn thread_stub(thread: *mut Thread) -> ! {
    // SAFETY: installed as the return address of a freshly-built context
    // with `thread` as its sole argument; by the time this runs the
    // thread is `Running` and its fields are exclusively ours.
    let retval = unsafe {
        let t = &*thread;
        (t.entry)(t.entry_data)
    };
    finish(retval);
}

impl Thread {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub(crate) fn set_state(&mut self, s: ThreadState) {
        self.state = s;
    }

    pub(crate) fn scheduled_at(&self) -> u64 {
        self.scheduled_at
    }

    pub(crate) fn set_scheduled_at(&mut self, t: u64) {
        self.scheduled_at = t;
    }

    pub(crate) fn context(&self) -> &ArchContext {
        &self.context
    }

    pub(crate) fn context_mut(&mut self) -> &mut ArchContext {
        &mut self.context
    }

    pub(crate) fn asid(&self) -> u8 {
        self.vmm.as_ref().map(|v| v.lock().asid).unwrap_or(0)
    }

    pub fn address_space(&self) -> Option<&alloc::sync::Arc<spin::Mutex<AddressSpace>>> {
        self.vmm.as_ref()
    }
}

/// Create a new thread running `entry(data)` on the least-loaded CPU.
/// With [`ThreadFlags::NEW_VMM`] it gets a fresh, empty address space;
/// otherwise it shares `shared_vmm` (pass `None` for a kernel-only
/// thread with no user mappings).
pub fn create(
    entry: ThreadEntry,
    data: usize,
    flags: ThreadFlags,
    shared_vmm: Option<alloc::sync::Arc<spin::Mutex<AddressSpace>>>,
) -> KernelResult<NonNull<Thread>> {
    let vmm = if flags.contains(ThreadFlags::NEW_VMM) {
        Some(alloc::sync::Arc::new(spin::Mutex::new(AddressSpace::create()?)))
    } else {
        shared_vmm
    };

    let mut boxed = Box::new(Thread {
        id: next_id(),
        link: ElemLink::new(),
        state: ThreadState::Ready,
        stack: Box::new([0u8; STACK_SIZE]),
        context: ArchContext::default(),
        vmm,
        entry,
        entry_data: data,
        retval: 0,
        joiner: None,
        cpu: 0,
        scheduled_at: 0,
        sleep_timer: Timer::new(),
        owner_process: None,
    });

    let self_ptr = NonNull::from(&mut *boxed);
    boxed.link.bind(self_ptr);

    let stack_top = boxed.stack.as_ptr() as usize + STACK_SIZE;
    boxed.context = ArchContext::new_thread(stack_top, thread_stub as usize, self_ptr.as_ptr() as usize);
    if let Some(vmm) = &boxed.vmm {
        boxed.context.set_asid(vmm.lock().asid);
    }

    boxed.cpu = sched::least_loaded_cpu();
    let ptr = Box::into_raw(boxed);
    let ptr = unsafe { NonNull::new_unchecked(ptr) };

    let cpu = unsafe { ptr.as_ref().cpu };
    // SAFETY: freshly created, not linked anywhere yet.
    unsafe { sched::enqueue(cpu, ptr) };
    Ok(ptr)
}

/// A FIFO queue of blocked threads, the building block every driver and
/// synchronization primitive blocks on: a keyboard buffer's readers, a
/// semaphore's waiters, a condition variable's sleepers. Reuses each
/// thread's single scheduling [`ElemLink`] the same way the ready queue
/// does — a thread is on a [`WaitQueue`] instead of a ready queue, never
/// both.
pub struct WaitQueue {
    threads: LinkedList<Thread>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            threads: LinkedList::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Mark the calling thread `Sleeping` and enqueue it here. Callers
    /// must drop whatever lock guards `self` *before* calling
    /// [`reschedule`] — never reschedule while still holding a lock the
    /// next-running thread might need.
    pub fn park(&mut self) {
        let _guard = InterruptGuard::new();
        let cpu = arch::cpu_id();
        if let Some(mut cur) = sched::current_thread(cpu) {
            // SAFETY: `cur` is this CPU's running thread and is not
            // linked anywhere else.
            unsafe {
                cur.as_mut().state = ThreadState::Sleeping;
                self.threads.push_back(cur);
            }
        }
    }

    /// Pop the longest-waiting thread without waking it, so a caller can
    /// transfer ownership of whatever it was waiting for (lock owner,
    /// semaphore slot) onto it *before* it becomes runnable — closing
    /// the window where a new arrival could steal that ownership
    /// between release and wakeup.
    pub fn pop_one(&mut self) -> Option<NonNull<Thread>> {
        let _guard = InterruptGuard::new();
        self.threads.pop_front()
    }

    /// Wake the longest-waiting thread, if any. Returns whether one was
    /// woken.
    pub fn wake_one(&mut self) -> bool {
        match self.pop_one() {
            Some(t) => {
                // SAFETY: popped from this queue, so it is `Sleeping` and
                // unlinked; safe to hand to `wakeup`.
                unsafe { wakeup(t) };
                true
            }
            None => false,
        }
    }

    pub fn wake_all(&mut self) {
        while self.wake_one() {}
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The running thread's id on this CPU, if the scheduler has started.
pub fn current_id() -> Option<ThreadId> {
    let cpu = arch::cpu_id();
    sched::current_thread(cpu).map(|t| unsafe { t.as_ref().id() })
}

/// The running thread itself, if the scheduler has started.
pub fn current_ptr() -> Option<NonNull<Thread>> {
    sched::current_thread(arch::cpu_id())
}

/// Voluntarily give up the remainder of this thread's quantum.
pub fn yield_now() {
    let _guard = InterruptGuard::new();
    sched::schedule();
}

/// Run the scheduler. Call this after [`WaitQueue::park`] once every
/// lock it needed has been dropped.
pub fn reschedule() {
    let _guard = InterruptGuard::new();
    sched::schedule();
}

/// Block the current thread, removing it from scheduling until
/// [`wakeup`] is called on it. Caller is responsible for having already
/// published `current` somewhere a waker can find it (a wait queue).
pub fn suspend() {
    let _guard = InterruptGuard::new();
    let cpu = arch::cpu_id();
    if let Some(mut cur) = sched::current_thread(cpu) {
        unsafe { cur.as_mut().state = ThreadState::Sleeping };
    }
    sched::schedule();
}

/// Make a sleeping thread runnable again. Idempotent: waking a thread
/// that is already `Ready`/`Running`/`Zombie` does nothing.
///
/// # Safety
/// `thread` must point at a live `Thread`.
pub unsafe fn wakeup(mut thread: NonNull<Thread>) {
    let _guard = InterruptGuard::new();
    let t = thread.as_mut();
    if t.state != ThreadState::Sleeping {
        return;
    }
    t.state = ThreadState::Ready;
    let cpu = t.cpu;
    sched::enqueue(cpu, thread);
}

/// Park the current thread for `ticks` jiffies (0 returns immediately
/// after one reschedule). Returns the number of ticks left unslept,
/// which is always 0 barring a future early-wake mechanism.
pub fn sleep_ticks(ticks: u64) -> u64 {
    if ticks == 0 {
        yield_now();
        return 0;
    }
    let cpu = arch::cpu_id();
    let Some(mut cur) = sched::current_thread(cpu) else {
        return ticks;
    };
    let deadline = sched::jiffies() + ticks;
    let cur_addr = cur.as_ptr() as usize;
    unsafe {
        cur.as_mut().sleep_timer.arm(deadline, move || {
            // SAFETY: the thread outlives its own timer; the timer is
            // destroyed (and with it the timer) before the thread can be
            // freed, so this pointer is always valid while the closure
            // can still run.
            let ptr = NonNull::new(cur_addr as *mut Thread).unwrap();
            unsafe { wakeup(ptr) };
        });
    }
    suspend();
    unsafe { cur.as_mut().sleep_timer.disarm() };
    0
}

/// Terminate the current thread with `retval`, waking its joiner if one
/// is already waiting. Never returns.
pub fn finish(retval: usize) -> ! {
    let _guard = InterruptGuard::new();
    let cpu = arch::cpu_id();
    if let Some(mut cur) = sched::current_thread(cpu) {
        let cur_ref = unsafe { cur.as_mut() };
        cur_ref.retval = retval;
        cur_ref.state = ThreadState::Zombie;
        if let Some(joiner) = cur_ref.joiner {
            unsafe { wakeup(joiner) };
        }
    }
    sched::schedule();
    unreachable!("a zombie thread was rescheduled")
}

/// Block until `thread` finishes, then reclaim it and return its return
/// value. `EINVAL` if `thread` is the caller itself or already has a
/// joiner.
///
/// # Safety
/// `thread` must point at a live, not-yet-destroyed `Thread` created by
/// [`create`]; it must not be joined again afterwards.
pub unsafe fn join(mut thread: NonNull<Thread>) -> KernelResult<usize> {
    let cpu = arch::cpu_id();
    let current = sched::current_thread(cpu);
    if current == Some(thread) {
        return Err(KernelError::InvalidArgument {
            reason: "thread_join: a thread cannot join itself",
        });
    }
    {
        let t = thread.as_mut();
        if t.joiner.is_some() {
            return Err(KernelError::InvalidArgument {
                reason: "thread_join: thread already has a joiner",
            });
        }
        if t.state != ThreadState::Zombie {
            t.joiner = current;
        }
    }
    if thread.as_ref().state != ThreadState::Zombie {
        suspend();
    }
    let retval = thread.as_ref().retval;
    destroy(thread);
    Ok(retval)
}

/// Free a zombie thread's stack and control block.
///
/// # Safety
/// `thread` must be `Zombie` and not referenced anywhere else (no
/// pending joiner, not linked into any list).
unsafe fn destroy(thread: NonNull<Thread>) {
    debug_assert_eq!(thread.as_ref().state, ThreadState::Zombie);
    drop(Box::from_raw(thread.as_ptr()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_adds_one(data: usize) -> usize {
        data + 1
    }

    #[test]
    fn create_lands_on_least_loaded_cpu() {
        sched::reset_for_test();
        let t = create(entry_adds_one, 41, ThreadFlags::empty(), None).unwrap();
        unsafe {
            assert_eq!(t.as_ref().state(), ThreadState::Ready);
            destroy_for_test(t);
        }
    }

    unsafe fn destroy_for_test(mut t: NonNull<Thread>) {
        t.as_mut().state = ThreadState::Zombie;
        destroy(t);
    }
}
