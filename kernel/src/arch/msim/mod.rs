//! MIPS/MSIM backend.
//!
//! This is the only module allowed to know about CP0 registers, the
//! `tlbr`/`tlbp`/`tlbwi`/`tlbwr` instructions, or the fixed MMIO
//! addresses of the console/keyboard/disk/dorder devices. On bare metal
//! (`target_os = "none"`) these are real `asm!` blocks; under `cargo
//! test` on the host they fall back to a small software simulation so
//! the rest of the kernel's logic (scheduler, allocators, sync
//! primitives) can be exercised without a MIPS target.

pub mod context;
pub mod devices;
pub mod tlb_regs;

pub const MAX_CPU: usize = 32;

pub fn init() {
    devices::console_init();
    devices::keyboard_init();
    tlb_regs::tlb_init();
}

pub fn halt() -> ! {
    #[cfg(target_os = "none")]
    loop {
        // SAFETY: `wait` is the standard MIPS idle instruction; looping
        // on it forever is the documented way to stop a CPU.
        unsafe { core::arch::asm!("wait", options(nomem, nostack)) }
    }
    #[cfg(not(target_os = "none"))]
    {
        panic!("halt() called on host build");
    }
}

pub fn cpu_id() -> usize {
    devices::dorder::cpuid() as usize
}

/// Drop from kernel mode into user mode at `pc` with `sp` already
/// installed and `a0`/`a1` set to the thread's two entry arguments, via
/// an exception return. Never returns.
pub fn enter_user_mode(pc: usize, sp: usize, a0: usize, a1: usize) -> ! {
    #[cfg(target_os = "none")]
    // SAFETY: called once, from the bottom of a freshly created thread's
    // stub, with `Status.EXL` still set from exception entry and no
    // pending kernel state on the stack below this frame.
    unsafe {
        core::arch::asm!(
            "mtc0 {pc}, $14",
            "move $sp, {sp}",
            "move $4, {a0}",
            "move $5, {a1}",
            "eret",
            pc = in(reg) pc as u32,
            sp = in(reg) sp as u32,
            a0 = in(reg) a0 as u32,
            a1 = in(reg) a1 as u32,
            options(noreturn),
        );
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = (pc, sp, a0, a1);
        panic!("enter_user_mode() called on host build");
    }
}

#[cfg(target_os = "none")]
pub fn irq_disable() -> bool {
    let status: u32;
    // SAFETY: Status (CP0 $12) read-modify-write clearing IE (bit 0);
    // called with no preconditions beyond running in kernel mode.
    unsafe {
        core::arch::asm!(
            "mfc0 {0}, $12",
            "andi {1}, {0}, 1",
            "ins {0}, $0, 0, 1",
            "mtc0 {0}, $12",
            out(reg) _,
            out(reg) status,
        );
    }
    status != 0
}

#[cfg(target_os = "none")]
pub fn irq_restore(prev: bool) {
    if !prev {
        return;
    }
    // SAFETY: sets Status.IE; restoring a previously-observed enabled
    // state is always safe.
    unsafe {
        core::arch::asm!(
            "mfc0 $t0, $12",
            "ori $t0, $t0, 1",
            "mtc0 $t0, $12",
            out("$t0") _,
        );
    }
}

#[cfg(not(target_os = "none"))]
mod host_sim {
    use core::sync::atomic::{AtomicBool, Ordering};

    static IRQ_ENABLED: AtomicBool = AtomicBool::new(true);

    pub fn irq_disable() -> bool {
        IRQ_ENABLED.swap(false, Ordering::AcqRel)
    }

    pub fn irq_restore(prev: bool) {
        IRQ_ENABLED.store(prev, Ordering::Release);
    }
}

#[cfg(not(target_os = "none"))]
pub use host_sim::{irq_disable, irq_restore};
