//! Round-robin scheduler: one ready queue per CPU, a fixed quantum, no
//! priorities. The thread at the head of a CPU's queue is always the
//! next one to run on it; `thread_create` picks the least-loaded CPU,
//! everything else stays put once placed.

extern crate alloc;

use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::adt::list::LinkedList;
use crate::arch::{self, ArchContext, MAX_CPU};
use crate::thread::{Thread, ThreadState};

/// Ticks a thread is allowed to run before `sched_timer` forces a
/// reschedule.
pub const THREAD_QUANTUM: u64 = 4000;

static JIFFIES: AtomicU64 = AtomicU64::new(0);

pub fn jiffies() -> u64 {
    JIFFIES.load(Ordering::Relaxed)
}

struct PerCpu {
    ready: LinkedList<Thread>,
    current: Option<NonNull<Thread>>,
    idle: Option<NonNull<Thread>>,
}

impl PerCpu {
    const fn new() -> Self {
        Self {
            ready: LinkedList::new(),
            current: None,
            idle: None,
        }
    }
}

unsafe impl Send for PerCpu {}

static CPUS: Mutex<Vec<PerCpu>> = Mutex::new(Vec::new());

fn with_cpus<R>(f: impl FnOnce(&mut Vec<PerCpu>) -> R) -> R {
    let mut cpus = CPUS.lock();
    if cpus.is_empty() {
        cpus.extend((0..MAX_CPU).map(|_| PerCpu::new()));
    }
    f(&mut cpus)
}

/// Runs once per CPU during boot, after the idle thread for that CPU has
/// been constructed. The idle thread is never itself on a ready queue —
/// `schedule` falls back to it only once the queue is empty — so this
/// unlinks it from wherever `thread::create` placed it first.
pub fn set_idle_thread(cpu: usize, mut idle: NonNull<Thread>) {
    with_cpus(|cpus| {
        // SAFETY: `idle` was just linked onto `cpu`'s ready queue by
        // `thread::create` and nowhere else.
        unsafe { cpus[cpu].ready.remove(idle) };
        unsafe { idle.as_mut().set_state(ThreadState::Running) };
        cpus[cpu].idle = Some(idle);
        cpus[cpu].current = Some(idle);
    });
}

pub fn current_thread(cpu: usize) -> Option<NonNull<Thread>> {
    with_cpus(|cpus| cpus[cpu].current)
}

/// Picks the CPU with the shortest ready queue. Called by `thread_create`
/// for threads with no CPU affinity of their own.
pub fn least_loaded_cpu() -> usize {
    with_cpus(|cpus| {
        cpus.iter()
            .enumerate()
            .min_by_key(|(_, c)| c.ready.len())
            .map(|(i, _)| i)
            .unwrap_or(0)
    })
}

/// Insert `thread` (must be `Ready`) onto `cpu`'s ready queue.
///
/// # Safety
/// `thread` must not already be linked into any list.
pub unsafe fn enqueue(cpu: usize, thread: NonNull<Thread>) {
    with_cpus(|cpus| cpus[cpu].ready.push_back(thread));
}

/// Called on every architectural tick. Advances jiffies and, if the
/// current thread has burned through its quantum, requests a
/// reschedule by returning `true`.
pub fn sched_timer() -> bool {
    JIFFIES.fetch_add(1, Ordering::Relaxed);
    let cpu = arch::cpu_id();
    with_cpus(|cpus| match cpus[cpu].current {
        Some(cur) => {
            let scheduled_at = unsafe { cur.as_ref().scheduled_at() };
            jiffies().wrapping_sub(scheduled_at) >= THREAD_QUANTUM
        }
        None => false,
    })
}

/// Core scheduling decision: pick the next thread to run on this CPU,
/// demote the outgoing thread back to `Ready` if it's still runnable,
/// and perform the architectural context switch.
///
/// Must be called with interrupts disabled. Returns once this thread
/// (or whichever thread eventually runs here again) is re-scheduled.
pub fn schedule() {
    let cpu = arch::cpu_id();
    let (from_ctx, to_ctx, asid): (*mut ArchContext, *const ArchContext, u8) = with_cpus(|cpus| {
        let next = cpus[cpu]
            .ready
            .pop_front()
            .unwrap_or_else(|| cpus[cpu].idle.expect("idle thread not set before scheduling"));

        let current = cpus[cpu].current;
        if let Some(mut cur) = current {
            let cur_ref = unsafe { cur.as_mut() };
            if cur_ref.state() == ThreadState::Running && Some(cur) != cpus[cpu].idle {
                cur_ref.set_state(ThreadState::Ready);
                unsafe { cpus[cpu].ready.push_back(cur) };
            }
        }

        let mut next = next;
        let next_ref = unsafe { next.as_mut() };
        next_ref.set_state(ThreadState::Running);
        next_ref.set_scheduled_at(jiffies());
        let asid = next_ref.asid();
        cpus[cpu].current = Some(next);

        let from_ptr = current
            .map(|mut c| unsafe { c.as_mut().context_mut() as *mut ArchContext })
            .unwrap_or(core::ptr::null_mut());
        let to_ptr = unsafe { next.as_ref().context() as *const ArchContext };
        (from_ptr, to_ptr, asid)
    });

    if from_ctx as *const ArchContext == to_ctx {
        return;
    }
    // SAFETY: both contexts belong to live threads pinned for the
    // duration of the switch by virtue of being `current`/the next
    // scheduled thread; interrupts are disabled by the caller.
    unsafe { arch::context::switch_context(from_ctx, to_ctx, asid) };
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    *CPUS.lock() = Vec::new();
    JIFFIES.store(0, Ordering::Relaxed);
}
