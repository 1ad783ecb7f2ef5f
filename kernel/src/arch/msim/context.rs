//! Saved kernel register frame and the raw context switch.
//!
//! Layout mirrors the original's synthetic stack-top context: callee
//! saved registers `s0..s7`, the global pointer, frame pointer, stack
//! pointer, return address and a copy of the interrupt-mask bits of
//! `Status`. `thread_create` writes one of these so that the first
//! restore "returns" into [`THREAD_STUB_MARKER`] with the thread's entry
//! data already sitting in the argument register.

use crate::arch::context::ThreadContext;

pub const ABI_STACK_FRAME: usize = 24;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MipsContext {
    s: [u32; 8],
    gp: u32,
    fp: u32,
    sp: u32,
    ra: u32,
    a0: u32,
    status: u32,
    asid: u8,
}

impl MipsContext {
    pub const fn empty() -> Self {
        Self {
            s: [0; 8],
            gp: 0,
            fp: 0,
            sp: 0,
            ra: 0,
            a0: 0,
            status: STATUS_IE | STATUS_IM_TICK,
            asid: 0,
        }
    }

    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }
}

impl Default for MipsContext {
    fn default() -> Self {
        Self::empty()
    }
}

/// `Status.IE`: interrupts globally enabled.
const STATUS_IE: u32 = 1 << 0;
/// `Status.IM` bit for the tick timer interrupt line.
const STATUS_IM_TICK: u32 = 1 << 10;

impl ThreadContext for MipsContext {
    fn new_thread(stack_top: usize, entry_stub: usize, arg: usize) -> Self {
        Self {
            s: [0; 8],
            gp: 0,
            fp: 0,
            sp: (stack_top - ABI_STACK_FRAME) as u32,
            ra: entry_stub as u32,
            a0: arg as u32,
            status: STATUS_IE | STATUS_IM_TICK,
            asid: 0,
        }
    }

    fn set_asid(&mut self, asid: u8) {
        self.asid = asid;
    }
}

#[cfg(target_os = "none")]
/// # Safety
/// See [`crate::arch::context::switch_context`].
pub unsafe fn switch_context(from: *mut MipsContext, to: *const MipsContext, asid: u8) {
    let mut to_ctx = core::ptr::read(to);
    to_ctx.set_asid(asid);

    // Install the destination ASID before the switch takes effect so
    // that once we resume `to`, TLB lookups already tag with it.
    // SAFETY: EntryHi low byte carries the ASID field on MSIM's MIPS
    // model; no TLB operation is in flight.
    core::arch::asm!(
        "mfc0 $t0, $10",
        "andi $t0, $t0, 0xffffff00",
        "or $t0, $t0, {asid}",
        "mtc0 $t0, $10",
        asid = in(reg) asid as u32,
        out("$t0") _,
    );

    // SAFETY: `from`/`to` point at valid, correctly laid-out contexts;
    // interrupts are disabled by the caller per the function contract.
    core::arch::asm!(
        "sw $s0, 0({from})",
        "sw $s1, 4({from})",
        "sw $s2, 8({from})",
        "sw $s3, 12({from})",
        "sw $s4, 16({from})",
        "sw $s5, 20({from})",
        "sw $s6, 24({from})",
        "sw $s7, 28({from})",
        "sw $gp, 32({from})",
        "sw $fp, 36({from})",
        "sw $sp, 40({from})",
        "sw $ra, 44({from})",
        "lw $s0, 0({to})",
        "lw $s1, 4({to})",
        "lw $s2, 8({to})",
        "lw $s3, 12({to})",
        "lw $s4, 16({to})",
        "lw $s5, 20({to})",
        "lw $s6, 24({to})",
        "lw $s7, 28({to})",
        "lw $gp, 32({to})",
        "lw $fp, 36({to})",
        "lw $a0, 48({to})",
        "lw $sp, 40({to})",
        "lw $ra, 44({to})",
        "jr $ra",
        from = in(reg) from,
        to = in(reg) &to_ctx as *const MipsContext,
    );
}

#[cfg(not(target_os = "none"))]
/// Host test builds never actually run two kernel stacks concurrently;
/// this exists only so callers (the scheduler) type-check and can be
/// exercised for their surrounding bookkeeping logic.
///
/// # Safety
/// See [`crate::arch::context::switch_context`].
pub unsafe fn switch_context(from: *mut MipsContext, to: *const MipsContext, asid: u8) {
    let mut to_ctx = core::ptr::read(to);
    to_ctx.set_asid(asid);
    core::ptr::write(from, to_ctx);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_lands_below_abi_frame() {
        let ctx = MipsContext::new_thread(0x1000, 0xdead_beef, 0x42);
        assert_eq!(ctx.stack_pointer(), 0x1000 - ABI_STACK_FRAME);
        assert_eq!(ctx.ra, 0xdead_beef);
        assert_eq!(ctx.a0, 0x42);
        assert_eq!(ctx.status & STATUS_IE, STATUS_IE);
    }

    #[test]
    fn set_asid_is_recorded() {
        let mut ctx = MipsContext::empty();
        ctx.set_asid(7);
        assert_eq!(ctx.asid, 7);
    }
}
