//! Exception dispatch: the single entry point every trap, interrupt and
//! syscall funnels through before returning to whichever thread the
//! scheduler picks next.

use crate::error::KernelError;
use crate::mm::tlb::{self, RefillOutcome};
use crate::mm::vmm::AddressSpace;
use crate::process::Process;
use crate::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Tick,
    TlbRefill,
    TlbInvalid,
    Syscall,
    IpiSignal,
    KeyboardIrq,
}

/// Timer tick: advance scheduling state and hand off to the timer
/// subsystem. Call with interrupts already disabled (true of every
/// exception handler).
pub fn on_tick() {
    crate::timer::on_tick();
    if crate::sched::sched_timer() {
        crate::sched::schedule();
    }
}

/// TLB Refill/Invalid: resolve the faulting address in the current
/// thread's address space. A genuine miss (the address isn't mapped at
/// all) kills the thread rather than returning an error code — there is
/// nobody left to hand one to.
pub fn on_tlb_exception(kind: Exception, bad_vaddr: usize, space: &AddressSpace) {
    let outcome = match kind {
        Exception::TlbRefill => tlb::handle_refill(bad_vaddr, space),
        Exception::TlbInvalid => tlb::handle_invalid(bad_vaddr, space),
        _ => unreachable!("on_tlb_exception called with a non-TLB exception"),
    };
    if outcome == RefillOutcome::Miss {
        thread::finish(usize::MAX);
    }
}

/// Syscall exception: decode `v0`/`a0..a3` from the trap frame (left to
/// the architecture layer) and dispatch. A bad user pointer or a
/// non-owner mutex unlock/destroy comes back as [`KernelError::Killed`]
/// and ends the calling thread on the spot rather than returning an
/// errno it could ignore.
pub fn on_syscall(proc: &Process, v0: u32, a0: usize, a1: usize, a2: usize, a3: usize) -> usize {
    match crate::syscall::dispatch(proc, v0, a0, a1, a2, a3) {
        Ok(result) => result,
        Err(KernelError::Killed) => thread::finish(usize::MAX),
        Err(e) => {
            log::warn!("syscall {} failed: {}", v0, e);
            e.as_errno() as usize
        }
    }
}

pub fn on_ipi() {
    crate::drivers::ipi::handle_interrupt();
}

pub fn on_keyboard() {
    crate::drivers::keyboard::handle_interrupt();
}
