//! Architecture-independent saved-context interface.
//!
//! The scheduler and thread subsystem program a context purely through
//! this trait; the field layout backing it (register order, ABI padding)
//! is [`crate::arch::msim::context::MipsContext`] and never named outside
//! this file and its implementor.

/// A thread's saved register state, as it sits at the top of its kernel
/// stack between context switches.
pub trait ThreadContext: Sized {
    /// Build a context for a never-before-run thread: when first
    /// restored, execution resumes at `entry_stub` with `arg` available
    /// to it (conventionally in the first argument register) and the
    /// stack pointer set to `stack_top`.
    fn new_thread(stack_top: usize, entry_stub: usize, arg: usize) -> Self;

    /// Install `asid` so that after this context is restored, TLB
    /// lookups use the destination address space's tag.
    fn set_asid(&mut self, asid: u8);
}

pub type ArchContext = crate::arch::msim::context::MipsContext;

/// Switch from `from`'s saved context to `to`'s, installing `to`'s ASID.
///
/// # Safety
/// Interrupts must already be disabled; both contexts must belong to
/// live threads; `from` must be the context of the thread currently
/// executing on this CPU.
pub unsafe fn switch_context(from: *mut ArchContext, to: *const ArchContext, asid: u8) {
    crate::arch::msim::context::switch_context(from, to, asid)
}
