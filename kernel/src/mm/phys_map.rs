//! Physical-to-virtual translation for kernel-owned frames.
//!
//! On real hardware the kernel's unmapped cached segment is a fixed
//! offset over all of physical memory (the MIPS KSEG0 convention), so
//! translating a physical address backing a heap region or page table
//! is just an OR with [`crate::mm::KSEG0_BASE`]. Host test builds have
//! no such mapping — physical addresses handed out by the test
//! [`super::frame_allocator`] are not real memory — so this module
//! backs each physical frame with real host memory on first touch and
//! remembers the translation.

use super::{PhysicalAddress, FRAME_SIZE, FRAME_WIDTH, KSEG0_BASE};

#[cfg(target_os = "none")]
pub fn phys_to_virt(addr: PhysicalAddress) -> *mut u8 {
    (addr.as_usize() | KSEG0_BASE) as *mut u8
}

#[cfg(not(target_os = "none"))]
pub fn phys_to_virt(addr: PhysicalAddress) -> *mut u8 {
    host::phys_to_virt(addr)
}

#[cfg(not(target_os = "none"))]
mod host {
    extern crate alloc;
    use alloc::boxed::Box;
    use alloc::collections::BTreeMap;

    use spin::Mutex;

    use super::{PhysicalAddress, FRAME_SIZE, FRAME_WIDTH};

    static FRAMES: Mutex<BTreeMap<usize, Box<[u8; FRAME_SIZE]>>> = Mutex::new(BTreeMap::new());

    pub fn phys_to_virt(addr: PhysicalAddress) -> *mut u8 {
        let frame = addr.as_usize() >> FRAME_WIDTH;
        let offset = addr.as_usize() & (FRAME_SIZE - 1);
        let mut frames = FRAMES.lock();
        let backing = frames
            .entry(frame)
            .or_insert_with(|| Box::new([0u8; FRAME_SIZE]));
        // SAFETY: `backing` lives in a `'static` map entry for the
        // remainder of the test process; callers only dereference while
        // the corresponding frame is allocated.
        unsafe { backing.as_mut_ptr().add(offset) }
    }
}
