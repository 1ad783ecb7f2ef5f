//! Physical frame allocator.
//!
//! A single bitmap over the probed-usable region of RAM, exactly as in
//! `my_falloc.c`: `scan_memory` finds how much RAM exists by writing and
//! reading back a sentinel byte at each candidate frame, the bitmap's
//! own backing storage is carved out of the first frames of that region,
//! and every other frame starts out free. `VF_VA_AUTO` allocations are
//! always first-fit starting at bitmap index 0; `VF_VA_USER` allocations
//! take a specific physical address and fail if any of it is already
//! taken.

extern crate alloc;

use bitflags::bitflags;
use spin::Mutex;

use crate::adt::Bitmap;
use crate::error::{KernelError, KernelResult};
use crate::mm::{FRAME_SIZE, FRAME_WIDTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(usize);

impl PhysicalAddress {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }

    pub fn as_frame(self) -> FrameNumber {
        FrameNumber(self.0 >> FRAME_WIDTH)
    }

    pub fn is_frame_aligned(self) -> bool {
        self.0 & (FRAME_SIZE - 1) == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(usize);

impl FrameNumber {
    pub const fn new(n: usize) -> Self {
        Self(n)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }

    pub fn as_address(self) -> PhysicalAddress {
        PhysicalAddress(self.0 << FRAME_WIDTH)
    }
}

bitflags! {
    /// Allocation-placement flags, matching `falloc.h`'s `VF_*` family.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VfFlags: u32 {
        /// Let the allocator choose the address (first-fit).
        const VA_AUTO = 1 << 0;
        /// The caller supplies the exact physical address to reserve.
        const VA_USER = 1 << 1;
        /// Result will be accessed through the unmapped cached segment
        /// (informational on this port; kept for ABI parity).
        const AT_KSEG0 = 1 << 2;
    }
}

pub struct FrameAllocator {
    bitmap: Bitmap,
    /// Frame number of the first frame the bitmap tracks (index 0 of the
    /// bitmap corresponds to this frame, not physical frame 0 — the
    /// bitmap's own storage and the kernel image sit below it).
    base_frame: usize,
}

impl FrameAllocator {
    fn new(base_frame: usize, usable_frames: usize) -> Self {
        Self {
            bitmap: Bitmap::new(usable_frames),
            base_frame,
        }
    }

    pub fn usable_frames(&self) -> usize {
        self.bitmap.len()
    }

    /// `count == 0` is always `ENOMEM`, matching the original's
    /// `if (cnt == 0) return ENOMEM;` rather than treating it as a
    /// malformed argument.
    pub fn alloc(&mut self, flags: VfFlags, count: usize, at: Option<PhysicalAddress>) -> KernelResult<PhysicalAddress> {
        if count == 0 {
            return Err(KernelError::OutOfMemory);
        }
        if flags.contains(VfFlags::VA_USER) {
            let addr = at.ok_or(KernelError::InvalidArgument {
                reason: "frame_alloc: VF_VA_USER requires an address",
            })?;
            if !addr.is_frame_aligned() {
                return Err(KernelError::InvalidArgument {
                    reason: "frame_alloc: misaligned address",
                });
            }
            let start = addr.as_frame().as_usize();
            if start < self.base_frame {
                return Err(KernelError::InvalidArgument {
                    reason: "frame_alloc: address below managed region",
                });
            }
            let index = start - self.base_frame;
            if !self.bitmap.check_range(index, count, false) {
                return Err(KernelError::OutOfMemory);
            }
            self.bitmap.set_range(index, count, true);
            Ok(addr)
        } else {
            debug_assert!(flags.contains(VfFlags::VA_AUTO));
            let index = self
                .bitmap
                .allocate_range(count)
                .ok_or(KernelError::OutOfMemory)?;
            Ok(FrameNumber::new(self.base_frame + index).as_address())
        }
    }

    pub fn free(&mut self, addr: PhysicalAddress, count: usize) -> KernelResult<()> {
        if !addr.is_frame_aligned() || count == 0 {
            return Err(KernelError::InvalidArgument {
                reason: "frame_free: misaligned address or zero count",
            });
        }
        let start = addr.as_frame().as_usize();
        if start < self.base_frame {
            return Err(KernelError::InvalidArgument {
                reason: "frame_free: address below managed region",
            });
        }
        let index = start - self.base_frame;
        if !self.bitmap.check_range(index, count, true) {
            return Err(KernelError::InvalidArgument {
                reason: "frame_free: range not fully allocated",
            });
        }
        self.bitmap.set_range(index, count, false);
        Ok(())
    }
}

pub static FRAME_ALLOCATOR: Mutex<Option<FrameAllocator>> = Mutex::new(None);

/// Number of bitmap-storage frames needed to track `total_frames` bits.
fn count_bitmap_storage_frames(total_frames: usize) -> usize {
    let bytes = total_frames.div_ceil(8);
    bytes.div_ceil(FRAME_SIZE).max(1)
}

/// Probe memory starting at `start_frame`, growing the usable region
/// while each candidate frame round-trips a sentinel byte write/read at
/// a fixed offset. Capped by `limit_frames` — the design note in the
/// specification calls for a platform-provided ceiling rather than
/// probing indefinitely, since an unbounded probe can alias MMIO.
#[cfg(target_os = "none")]
fn scan_memory(start_frame: usize, limit_frames: usize) -> usize {
    const PROBE_OFFSET: usize = 10;
    let mut frames = 0;
    while frames < limit_frames {
        let addr = ((start_frame + frames) << FRAME_WIDTH) + PROBE_OFFSET;
        // SAFETY: addr is page-aligned-plus-offset within the candidate
        // frame; a failed round-trip just means the frame is unusable
        // and probing stops, matching `mem_accessible()`.
        let ok = unsafe {
            let ptr = addr as *mut u8;
            let prior = core::ptr::read_volatile(ptr);
            core::ptr::write_volatile(ptr, 0xAA);
            let roundtrip = core::ptr::read_volatile(ptr) == 0xAA;
            core::ptr::write_volatile(ptr, prior);
            roundtrip
        };
        if !ok {
            break;
        }
        frames += 1;
    }
    frames
}

/// Host test builds have no real physical memory to probe; pretend a
/// fixed-size region exists so the allocator's logic is exercisable.
#[cfg(not(target_os = "none"))]
fn scan_memory(_start_frame: usize, limit_frames: usize) -> usize {
    limit_frames.min(4096)
}

pub fn init() {
    init_with_limit(1 << 20)
}

fn init_with_limit(limit_frames: usize) {
    let start_frame = 0x1_0000_0000usize >> FRAME_WIDTH; // placeholder: immediately above the linked kernel image, supplied by the linker script on real hardware
    let total = scan_memory(start_frame, limit_frames);
    let bitmap_frames = count_bitmap_storage_frames(total);
    let usable = total.saturating_sub(bitmap_frames);
    let allocator = FrameAllocator::new(start_frame + bitmap_frames, usable);
    *FRAME_ALLOCATOR.lock() = Some(allocator);
}

pub fn alloc(flags: VfFlags, count: usize) -> KernelResult<PhysicalAddress> {
    alloc_at(flags, count, None)
}

pub fn alloc_at(flags: VfFlags, count: usize, at: Option<PhysicalAddress>) -> KernelResult<PhysicalAddress> {
    let _ipl = crate::arch::InterruptGuard::new();
    let mut guard = FRAME_ALLOCATOR.lock();
    let allocator = guard.as_mut().expect("frame allocator not initialized");
    allocator.alloc(flags, count, at)
}

pub fn free(addr: PhysicalAddress, count: usize) -> KernelResult<()> {
    let _ipl = crate::arch::InterruptGuard::new();
    let mut guard = FRAME_ALLOCATOR.lock();
    let allocator = guard.as_mut().expect("frame allocator not initialized");
    allocator.free(addr, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(usable_frames: usize) -> FrameAllocator {
        FrameAllocator::new(100, usable_frames)
    }

    #[test]
    fn auto_alloc_is_first_fit_and_page_aligned() {
        let mut a = fresh(16);
        let addr = a.alloc(VfFlags::VA_AUTO, 4, None).unwrap();
        assert!(addr.is_frame_aligned());
        assert_eq!(addr.as_frame().as_usize(), 100);
    }

    #[test]
    fn alloc_zero_count_is_out_of_memory() {
        let mut a = fresh(16);
        assert_eq!(a.alloc(VfFlags::VA_AUTO, 0, None), Err(KernelError::OutOfMemory));
    }

    #[test]
    fn alloc_free_roundtrip_is_deterministic() {
        let mut a = fresh(16);
        let first = a.alloc(VfFlags::VA_AUTO, 5, None).unwrap();
        a.free(first, 5).unwrap();
        let second = a.alloc(VfFlags::VA_AUTO, 5, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn free_partially_allocated_range_is_rejected() {
        let mut a = fresh(16);
        let addr = a.alloc(VfFlags::VA_AUTO, 2, None).unwrap();
        assert!(a.free(PhysicalAddress::new(addr.as_usize() + FRAME_SIZE), 4).is_err());
    }

    #[test]
    fn user_alloc_succeeds_only_if_free() {
        let mut a = fresh(16);
        let target = FrameNumber::new(105).as_address();
        a.alloc(VfFlags::VA_USER, 2, Some(target)).unwrap();
        assert!(a
            .alloc(VfFlags::VA_USER, 1, Some(target))
            .is_err());
    }

    #[test]
    fn misaligned_address_is_rejected() {
        let mut a = fresh(16);
        let bad = PhysicalAddress::new((100 << FRAME_WIDTH) + 1);
        assert!(a.alloc(VfFlags::VA_USER, 1, Some(bad)).is_err());
    }

    #[test]
    fn out_of_memory_when_no_run_fits() {
        let mut a = fresh(4);
        assert!(a.alloc(VfFlags::VA_AUTO, 5, None).is_err());
    }
}
