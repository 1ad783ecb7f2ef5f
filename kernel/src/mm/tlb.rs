//! Software TLB refill/invalid handling.
//!
//! MIPS TLB entries come in even/odd VPN pairs tagged by ASID. On a
//! Refill or Invalid exception the handler looks the faulting address up
//! in the faulting thread's address space; a hit programs the pair (only
//! the half matching the faulting VPN's parity is touched on a refill —
//! the other half of a freshly-chosen random entry is written invalid),
//! a miss is reported to the caller, which kills the thread.

use crate::arch::msim::tlb_regs::{self, TlbEntryPair, ENTRYLO_VALID, PAGE_MASK_4K};
use crate::mm::frame_allocator::PhysicalAddress;
use crate::mm::vmm::{AddressSpace, PAGE_WIDTH};

pub fn init() {
    tlb_regs::tlb_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    Filled,
    Miss,
}

fn vpn2(vaddr: usize) -> usize {
    vaddr >> (PAGE_WIDTH as usize + 1)
}

fn is_odd_page(vaddr: usize) -> bool {
    (vaddr >> PAGE_WIDTH) & 1 != 0
}

fn entry_hi(vaddr: usize, asid: u8) -> u32 {
    ((vpn2(vaddr) as u32) << (PAGE_WIDTH + 1)) | asid as u32
}

fn entry_lo(phys: PhysicalAddress) -> u32 {
    ((phys.as_frame().as_usize() as u32) << 6) | ENTRYLO_VALID
}

/// TLB Refill exception: the address simply isn't resident. Always uses
/// `tlbwr` (random replacement) per the original.
pub fn handle_refill(badvaddr: usize, space: &AddressSpace) -> RefillOutcome {
    let Some(phys) = space.mapping_find(badvaddr) else {
        return RefillOutcome::Miss;
    };
    let mut pair = TlbEntryPair {
        entry_hi: entry_hi(badvaddr, space.asid),
        entry_lo0: 0,
        entry_lo1: 0,
        page_mask: PAGE_MASK_4K,
    };
    if is_odd_page(badvaddr) {
        pair.entry_lo1 = entry_lo(phys);
    } else {
        pair.entry_lo0 = entry_lo(phys);
    }
    tlb_regs::tlb_write_random(pair);
    RefillOutcome::Filled
}

/// TLB Invalid exception: the pair exists but the matching half isn't
/// valid (e.g. after `tlb_flush`). Updates the existing indexed entry
/// when `tlbp` finds it, otherwise falls back to random replacement.
pub fn handle_invalid(badvaddr: usize, space: &AddressSpace) -> RefillOutcome {
    let Some(phys) = space.mapping_find(badvaddr) else {
        return RefillOutcome::Miss;
    };
    let probe_key = entry_hi(badvaddr, space.asid);
    let mut pair = match tlb_regs::tlb_probe(probe_key) {
        Some(index) => tlb_regs::tlb_read(index),
        None => TlbEntryPair {
            entry_hi: probe_key,
            entry_lo0: 0,
            entry_lo1: 0,
            page_mask: PAGE_MASK_4K,
        },
    };
    if is_odd_page(badvaddr) {
        pair.entry_lo1 = entry_lo(phys);
    } else {
        pair.entry_lo0 = entry_lo(phys);
    }
    match tlb_regs::tlb_probe(probe_key) {
        Some(index) => tlb_regs::tlb_write_indexed(index, pair),
        None => tlb_regs::tlb_write_random(pair),
    }
    RefillOutcome::Filled
}

/// Invalidate any TLB entry mapping `vaddr` under `asid`, overwriting it
/// with an invalid pair. Called from `vma_unmap`.
pub fn flush(vaddr: usize, asid: u8) {
    let key = entry_hi(vaddr, asid);
    if let Some(index) = tlb_regs::tlb_probe(key) {
        tlb_regs::tlb_write_indexed(
            index,
            TlbEntryPair {
                entry_hi: key,
                entry_lo0: 0,
                entry_lo1: 0,
                page_mask: PAGE_MASK_4K,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::vmm::VfMapFlags;

    fn fresh_space() -> AddressSpace {
        crate::mm::frame_allocator::init();
        AddressSpace::create().unwrap()
    }

    #[test]
    fn refill_miss_when_unmapped() {
        init();
        let space = fresh_space();
        assert_eq!(handle_refill(0x4000, &space), RefillOutcome::Miss);
    }

    #[test]
    fn refill_hit_after_map() {
        init();
        let mut space = fresh_space();
        let base = space
            .vma_map(0x1000, crate::mm::vmm::PAGE_SIZE, VfMapFlags::VA_USER)
            .unwrap();
        assert_eq!(handle_refill(base, &space), RefillOutcome::Filled);
    }

    #[test]
    fn flush_then_probe_removes_entry() {
        init();
        let mut space = fresh_space();
        let base = space
            .vma_map(0x1000, crate::mm::vmm::PAGE_SIZE, VfMapFlags::VA_USER)
            .unwrap();
        handle_refill(base, &space);
        flush(base, space.asid);
        assert_eq!(tlb_regs::tlb_probe(entry_hi(base, space.asid)), None);
    }
}
