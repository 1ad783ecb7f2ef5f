//! Memory management: physical frames, the kernel heap, and
//! per-address-space virtual memory (software TLB).

pub mod frame_allocator;
pub mod heap;
mod phys_map;
pub mod tlb;
pub mod vmm;

pub use frame_allocator::{FrameAllocator, FrameNumber, PhysicalAddress, VfFlags, FRAME_ALLOCATOR};
pub use phys_map::phys_to_virt;

/// Bits to shift a physical/virtual address to get its frame/page number.
pub const FRAME_WIDTH: u32 = 12;
pub const FRAME_SIZE: usize = 1 << FRAME_WIDTH;
pub const FRAME_MASK: usize = FRAME_SIZE - 1;

/// Boundary between user and kernel virtual addresses.
pub const USER_ADDR_LIMIT: usize = 0x8000_0000;
/// Start of the kernel's unmapped cached segment (KSEG0 equivalent).
pub const KSEG0_BASE: usize = 0x8000_0300;

pub fn round_up_to_frame(size: usize) -> usize {
    (size + FRAME_MASK) & !FRAME_MASK
}

pub fn is_frame_aligned(addr: usize) -> bool {
    addr & FRAME_MASK == 0
}

/// Bring up the physical frame allocator, kernel heap and initial
/// address space bookkeeping. Must run once, early in boot, before any
/// other subsystem allocates.
pub fn init() {
    frame_allocator::init();
    tlb::init();
    log::info!("mm: frame allocator and tlb ready");
}
