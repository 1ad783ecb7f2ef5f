//! Narrow architecture contract.
//!
//! Everything MIPS/MSIM-specific — the exception entry trampoline, CP0
//! register macros, console/keyboard/disk MMIO glue, and the bootstrap
//! assembly — lives behind this module and nowhere else. The rest of the
//! kernel only ever calls the handful of functions re-exported here:
//! disable/enable interrupts, context-switch to a stack pointer (with an
//! ASID), jump to user mode, program the tick, and the raw TLB
//! operations consumed by [`crate::mm::tlb`].

pub mod context;
pub mod msim;

pub use context::{ArchContext, ThreadContext};

/// Saved interrupt-enable state, as returned by [`irq_disable`].
pub type Ipl = bool;

/// Disable interrupts on this CPU and return the prior enabled/disabled
/// state, for use with [`irq_restore`].
#[inline]
pub fn irq_disable() -> Ipl {
    msim::irq_disable()
}

/// Restore a previously saved interrupt state.
#[inline]
pub fn irq_restore(prev: Ipl) {
    msim::irq_restore(prev)
}

/// Scoped guard that disables interrupts on construction and restores
/// the prior state on every exit path, including panics unwinding
/// through it. Models the original's `ipl_t` save/restore pattern as a
/// value with a destructor instead of a manually paired disable/enable.
#[must_use = "dropping this immediately re-enables interrupts"]
pub struct InterruptGuard {
    prev: Ipl,
}

impl InterruptGuard {
    pub fn new() -> Self {
        Self {
            prev: irq_disable(),
        }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        irq_restore(self.prev);
    }
}

/// Number of CPUs this kernel image was built for.
pub const MAX_CPU: usize = msim::MAX_CPU;

/// This CPU's 0..31 identifier, read from the IPI ("dorder") device.
#[inline]
pub fn cpu_id() -> usize {
    msim::cpu_id()
}

/// Halt the simulator. Never returns. Used for unrecoverable kernel
/// errors and, on bare metal, the idle loop's fallback.
pub fn halt() -> ! {
    msim::halt()
}

pub fn init() {
    msim::init();
}

/// Drop from kernel mode into user mode at `pc` with `sp` installed and
/// `a0`/`a1` carrying the thread's two entry arguments. Never returns.
pub fn enter_user_mode(pc: usize, sp: usize, a0: usize, a1: usize) -> ! {
    msim::enter_user_mode(pc, sp, a0, a1)
}
