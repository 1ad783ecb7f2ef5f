//! Per-address-space virtual memory areas and ASID management.
//!
//! Each address space holds a dense, fixed-capacity array of VMAs —
//! `vma_map`/`vma_unmap` mutate it, `vmm_mapping_find` is a linear scan
//! consumed directly by the TLB refill handler. ASIDs are drawn from a
//! recycling pool rather than the original's monotonically increasing
//! counter (open question in the design notes: the original breaks after
//! 254 address spaces have ever existed; here, destroying an address
//! space returns its ASID to the free pool so long-running systems don't
//! run out).

extern crate alloc;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::frame_allocator::{self, PhysicalAddress, VfFlags};
use crate::mm::{FRAME_SIZE, FRAME_WIDTH};

pub const VMAS: usize = 100;
pub const PAGE_SIZE: usize = FRAME_SIZE;
pub const PAGE_WIDTH: u32 = FRAME_WIDTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfMapFlags(u32);

impl VfMapFlags {
    pub const VA_AUTO: Self = Self(1 << 0);
    pub const VA_USER: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Vma {
    vpn_base: usize,
    pfn_base: usize,
    count: usize,
    valid: bool,
}

/// Recycling ASID pool: 256 identifiers, handed out FIFO so a freed ASID
/// is reused only after every other one has had a turn, minimizing the
/// chance a stale TLB entry from its previous owner is still resident.
struct AsidPool {
    free: alloc::collections::VecDeque<u8>,
}

impl AsidPool {
    fn new() -> Self {
        Self {
            free: (0..=255u8).collect(),
        }
    }

    fn alloc(&mut self) -> Option<u8> {
        self.free.pop_front()
    }

    fn free_asid(&mut self, asid: u8) {
        self.free.push_back(asid);
    }
}

static ASID_POOL: Mutex<Option<AsidPool>> = Mutex::new(None);

fn asid_pool() -> &'static Mutex<Option<AsidPool>> {
    let mut guard = ASID_POOL.lock();
    if guard.is_none() {
        *guard = Some(AsidPool::new());
    }
    drop(guard);
    &ASID_POOL
}

pub struct AddressSpace {
    pub asid: u8,
    vmas: [Vma; VMAS],
}

impl AddressSpace {
    pub fn create() -> KernelResult<Self> {
        let asid = asid_pool()
            .lock()
            .as_mut()
            .unwrap()
            .alloc()
            .ok_or(KernelError::OutOfMemory)?;
        Ok(Self {
            asid,
            vmas: [Vma::default(); VMAS],
        })
    }

    fn first_free_slot(&self) -> Option<usize> {
        self.vmas.iter().position(|v| !v.valid)
    }

    fn highest_end_vpn(&self) -> usize {
        self.vmas
            .iter()
            .filter(|v| v.valid)
            .map(|v| v.vpn_base + v.count)
            .max()
            .unwrap_or(1)
    }

    fn overlaps_existing(&self, vpn_base: usize, count: usize) -> bool {
        self.vmas.iter().any(|v| {
            v.valid
                && vpn_base < v.vpn_base + v.count
                && v.vpn_base < vpn_base + count
        })
    }

    /// Map `size` bytes. With `VA_AUTO`, `from` is ignored and the
    /// kernel picks the base above every existing VMA; with `VA_USER`,
    /// `from` must be page-aligned and free. Returns the mapped base
    /// virtual address.
    pub fn vma_map(&mut self, from: usize, size: usize, flags: VfMapFlags) -> KernelResult<usize> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument {
                reason: "vma_map: size not a multiple of page size",
            });
        }
        let count = size / PAGE_SIZE;

        let vpn_base = if flags.contains(VfMapFlags::VA_AUTO) {
            self.highest_end_vpn()
        } else {
            if from % PAGE_SIZE != 0 {
                return Err(KernelError::InvalidArgument {
                    reason: "vma_map: unaligned address",
                });
            }
            let vpn = from >> PAGE_WIDTH;
            if self.overlaps_existing(vpn, count) {
                return Err(KernelError::InvalidArgument {
                    reason: "vma_map: overlaps an existing VMA",
                });
            }
            vpn
        };

        let slot = self.first_free_slot().ok_or(KernelError::OutOfMemory)?;
        let base_phys = frame_allocator::alloc(VfFlags::VA_AUTO, count)?;
        let pfn_base = base_phys.as_frame().as_usize();

        self.vmas[slot] = Vma {
            vpn_base,
            pfn_base,
            count,
            valid: true,
        };
        Ok(vpn_base << PAGE_WIDTH)
    }

    /// Unmap the VMA whose base exactly matches `from`.
    pub fn vma_unmap(&mut self, from: usize) -> KernelResult<()> {
        if from % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument {
                reason: "vma_unmap: unaligned address",
            });
        }
        let vpn = from >> PAGE_WIDTH;
        let slot = self
            .vmas
            .iter()
            .position(|v| v.valid && v.vpn_base == vpn)
            .ok_or(KernelError::InvalidArgument {
                reason: "vma_unmap: no VMA at that base",
            })?;

        let vma = self.vmas[slot];
        frame_allocator::free(
            crate::mm::FrameNumber::new(vma.pfn_base).as_address(),
            vma.count,
        )?;
        for page in 0..vma.count {
            crate::mm::tlb::flush((vma.vpn_base + page) << PAGE_WIDTH, self.asid);
        }
        self.vmas[slot].valid = false;
        Ok(())
    }

    /// True iff `[addr, addr+size)` lies wholly inside one valid VMA.
    pub fn check_user(&self, addr: usize, size: usize) -> bool {
        if size == 0 {
            return false;
        }
        let Some(end) = addr.checked_add(size) else {
            return false;
        };
        self.vmas.iter().any(|v| {
            if !v.valid {
                return false;
            }
            let base = v.vpn_base << PAGE_WIDTH;
            let vend = (v.vpn_base + v.count) << PAGE_WIDTH;
            addr >= base && end <= vend
        })
    }

    /// Linear scan used directly by the TLB refill/invalid handlers.
    pub fn mapping_find(&self, vaddr: usize) -> Option<PhysicalAddress> {
        let vpn = vaddr >> PAGE_WIDTH;
        let offset = vaddr & (PAGE_SIZE - 1);
        self.vmas.iter().find(|v| v.valid && vpn >= v.vpn_base && vpn < v.vpn_base + v.count).map(|v| {
            let pfn = v.pfn_base + (vpn - v.vpn_base);
            PhysicalAddress::new((pfn << PAGE_WIDTH) | offset)
        })
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        for vma in self.vmas.iter().filter(|v| v.valid) {
            let _ = frame_allocator::free(
                crate::mm::FrameNumber::new(vma.pfn_base).as_address(),
                vma.count,
            );
        }
        asid_pool().lock().as_mut().unwrap().free_asid(self.asid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> AddressSpace {
        crate::mm::frame_allocator::init();
        AddressSpace::create().unwrap()
    }

    #[test]
    fn map_unaligned_size_is_invalid() {
        let mut vmm = fresh();
        assert!(vmm.vma_map(0, 100, VfMapFlags::VA_AUTO).is_err());
    }

    #[test]
    fn auto_maps_stack_above_each_other() {
        let mut vmm = fresh();
        let a = vmm.vma_map(0, PAGE_SIZE, VfMapFlags::VA_AUTO).unwrap();
        let b = vmm.vma_map(0, PAGE_SIZE, VfMapFlags::VA_AUTO).unwrap();
        assert!(b > a);
    }

    #[test]
    fn user_overlap_is_rejected() {
        let mut vmm = fresh();
        vmm.vma_map(0x1000, 2 * PAGE_SIZE, VfMapFlags::VA_USER).unwrap();
        assert!(vmm
            .vma_map(0x1000, PAGE_SIZE, VfMapFlags::VA_USER)
            .is_err());
    }

    #[test]
    fn check_user_respects_vma_bounds() {
        let mut vmm = fresh();
        vmm.vma_map(0x1000, PAGE_SIZE, VfMapFlags::VA_USER).unwrap();
        assert!(vmm.check_user(0x1000, PAGE_SIZE));
        assert!(!vmm.check_user(0x1000, PAGE_SIZE + 1));
        assert!(!vmm.check_user(0x2000, PAGE_SIZE));
    }

    #[test]
    fn unmap_then_mapping_find_misses() {
        let mut vmm = fresh();
        let base = vmm.vma_map(0x1000, PAGE_SIZE, VfMapFlags::VA_USER).unwrap();
        assert!(vmm.mapping_find(base).is_some());
        vmm.vma_unmap(base).unwrap();
        assert!(vmm.mapping_find(base).is_none());
    }

    #[test]
    fn asid_is_recycled_after_drop() {
        crate::mm::frame_allocator::init();
        let asid = {
            let a = AddressSpace::create().unwrap();
            a.asid
        };
        // Exhaust the pool looking for a reused id; with FIFO recycling
        // the freed ASID will resurface once 255 others have been
        // handed out, but simplest to check it's back in the free set.
        let mut saw_it = false;
        let mut spaces = alloc::vec::Vec::new();
        for _ in 0..256 {
            let space = AddressSpace::create().unwrap();
            if space.asid == asid {
                saw_it = true;
            }
            spaces.push(space);
        }
        assert!(saw_it);
    }
}
