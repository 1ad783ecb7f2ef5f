//! Raw CP0/TLB register access.
//!
//! [`crate::mm::tlb`] is the software-TLB-refill policy; this module is
//! only the register-level mechanism: `tlbr`/`tlbp`/`tlbwi`/`tlbwr` and
//! the handful of CP0 registers they touch (EntryHi, EntryLo0/1,
//! PageMask, Index, Random, BadVAddr).

pub const NUM_TLB_ENTRIES: usize = 32;
pub const PAGE_MASK_4K: u32 = 0;
pub const ASID_MASK: u32 = 0xff;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlbEntryPair {
    pub entry_hi: u32,
    pub entry_lo0: u32,
    pub entry_lo1: u32,
    pub page_mask: u32,
}

/// EntryLo "valid" bit.
pub const ENTRYLO_VALID: u32 = 1 << 1;

#[cfg(target_os = "none")]
mod hw {
    use super::*;

    pub fn init() {
        for index in 0..NUM_TLB_ENTRIES {
            write_indexed(
                index,
                TlbEntryPair {
                    entry_hi: ASID_MASK,
                    entry_lo0: 0,
                    entry_lo1: 0,
                    page_mask: PAGE_MASK_4K,
                },
            );
        }
        // SAFETY: Wired ($6) controls how many low TLB indices `tlbwr`
        // avoids; 0 means every entry is a random-replacement candidate.
        unsafe { core::arch::asm!("mtc0 $0, $6") };
    }

    pub fn probe(entry_hi: u32) -> Option<usize> {
        // SAFETY: tlbp reads EntryHi, searches the TLB, writes Index.
        unsafe {
            core::arch::asm!("mtc0 {0}, $10", "tlbp", in(reg) entry_hi);
        }
        let index: u32;
        // SAFETY: reading back Index ($0) after tlbp.
        unsafe { core::arch::asm!("mfc0 {0}, $0", out(reg) index) };
        if index & 0x8000_0000 != 0 {
            None
        } else {
            Some((index & 0x3f) as usize)
        }
    }

    pub fn read(index: usize) -> TlbEntryPair {
        // SAFETY: tlbr loads EntryHi/EntryLo0/EntryLo1/PageMask from the
        // TLB entry selected by Index.
        unsafe {
            core::arch::asm!("mtc0 {0}, $0", "tlbr", in(reg) index as u32);
        }
        let (entry_hi, entry_lo0, entry_lo1, page_mask);
        unsafe {
            core::arch::asm!("mfc0 {0}, $10", out(reg) entry_hi);
            core::arch::asm!("mfc0 {0}, $2", out(reg) entry_lo0);
            core::arch::asm!("mfc0 {0}, $3", out(reg) entry_lo1);
            core::arch::asm!("mfc0 {0}, $5", out(reg) page_mask);
        }
        TlbEntryPair {
            entry_hi,
            entry_lo0,
            entry_lo1,
            page_mask,
        }
    }

    pub fn write_indexed(index: usize, pair: TlbEntryPair) {
        load_entry_regs(pair);
        // SAFETY: tlbwi writes the TLB entry selected by Index from the
        // EntryHi/EntryLo0/EntryLo1/PageMask registers just loaded.
        unsafe {
            core::arch::asm!("mtc0 {0}, $0", "tlbwi", in(reg) index as u32);
        }
    }

    pub fn write_random(pair: TlbEntryPair) {
        load_entry_regs(pair);
        // SAFETY: tlbwr picks a non-wired index itself.
        unsafe { core::arch::asm!("tlbwr") };
    }

    fn load_entry_regs(pair: TlbEntryPair) {
        // SAFETY: ordinary CP0 register loads ahead of a tlbw{i,r}.
        unsafe {
            core::arch::asm!("mtc0 {0}, $10", in(reg) pair.entry_hi);
            core::arch::asm!("mtc0 {0}, $2", in(reg) pair.entry_lo0);
            core::arch::asm!("mtc0 {0}, $3", in(reg) pair.entry_lo1);
            core::arch::asm!("mtc0 {0}, $5", in(reg) pair.page_mask);
        }
    }

    pub fn bad_vaddr() -> u32 {
        let addr: u32;
        // SAFETY: BadVAddr ($8) is read-only and always valid to read.
        unsafe { core::arch::asm!("mfc0 {0}, $8", out(reg) addr) };
        addr
    }
}

#[cfg(not(target_os = "none"))]
mod hw {
    use super::*;
    use spin::Mutex;

    static TLB: Mutex<[TlbEntryPair; NUM_TLB_ENTRIES]> =
        Mutex::new([TlbEntryPair {
            entry_hi: ASID_MASK,
            entry_lo0: 0,
            entry_lo1: 0,
            page_mask: PAGE_MASK_4K,
        }; NUM_TLB_ENTRIES]);
    static NEXT_RANDOM: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);
    static BAD_VADDR: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

    pub fn init() {
        let mut tlb = TLB.lock();
        for entry in tlb.iter_mut() {
            *entry = TlbEntryPair {
                entry_hi: ASID_MASK,
                entry_lo0: 0,
                entry_lo1: 0,
                page_mask: PAGE_MASK_4K,
            };
        }
    }

    fn vpn2_asid(entry_hi: u32) -> u32 {
        entry_hi
    }

    pub fn probe(entry_hi: u32) -> Option<usize> {
        let tlb = TLB.lock();
        tlb.iter()
            .position(|e| vpn2_asid(e.entry_hi) == vpn2_asid(entry_hi))
    }

    pub fn read(index: usize) -> TlbEntryPair {
        TLB.lock()[index]
    }

    pub fn write_indexed(index: usize, pair: TlbEntryPair) {
        TLB.lock()[index] = pair;
    }

    pub fn write_random(pair: TlbEntryPair) {
        let idx = NEXT_RANDOM.fetch_add(1, core::sync::atomic::Ordering::Relaxed) % NUM_TLB_ENTRIES;
        TLB.lock()[idx] = pair;
    }

    pub fn bad_vaddr() -> u32 {
        BAD_VADDR.load(core::sync::atomic::Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn set_bad_vaddr(addr: u32) {
        BAD_VADDR.store(addr, core::sync::atomic::Ordering::Relaxed);
    }
}

pub fn tlb_init() {
    hw::init();
}

pub fn tlb_probe(entry_hi: u32) -> Option<usize> {
    hw::probe(entry_hi)
}

pub fn tlb_read(index: usize) -> TlbEntryPair {
    hw::read(index)
}

pub fn tlb_write_indexed(index: usize, pair: TlbEntryPair) {
    hw::write_indexed(index, pair);
}

pub fn tlb_write_random(pair: TlbEntryPair) {
    hw::write_random(pair);
}

pub fn bad_vaddr() -> u32 {
    hw::bad_vaddr()
}

#[cfg(test)]
pub fn set_bad_vaddr_for_test(addr: u32) {
    #[cfg(not(target_os = "none"))]
    hw::set_bad_vaddr(addr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_miss_on_fresh_tlb() {
        tlb_init();
        assert_eq!(tlb_probe(5), None);
    }

    #[test]
    fn write_indexed_then_probe_hits() {
        tlb_init();
        tlb_write_indexed(
            3,
            TlbEntryPair {
                entry_hi: 0x1234,
                entry_lo0: 1,
                entry_lo1: 2,
                page_mask: PAGE_MASK_4K,
            },
        );
        assert_eq!(tlb_probe(0x1234), Some(3));
        assert_eq!(tlb_read(3).entry_lo0, 1);
    }
}
