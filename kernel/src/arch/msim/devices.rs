//! Device collaborators, as narrow external contracts.
//!
//! Each device is a single MMIO register (or register pair) with no
//! internal buffering of its own — the kernel-side buffering (keyboard
//! ring, disk request serialization) lives in [`crate::drivers`], not
//! here. This module only knows how to read/write the hardware.

const DEVICE_CONSOLE_ADDR: usize = 0x1000_0000;
const DEVICE_KEYBOARD_ADDR: usize = 0x1000_0008;
const DEVICE_DISK_ADDR: usize = 0x1000_0020;
const DEVICE_DORDER_ADDR: usize = 0x1000_0040;

pub fn console_init() {}
pub fn keyboard_init() {}

/// Write one byte to the console. No flow control.
pub fn console_put_char(c: u8) {
    #[cfg(target_os = "none")]
    // SAFETY: fixed MMIO register, byte-wide write, no alignment
    // requirement beyond natural byte alignment.
    unsafe {
        core::ptr::write_volatile(DEVICE_CONSOLE_ADDR as *mut u8, c);
    }
    #[cfg(not(target_os = "none"))]
    host_sim::console_put_char(c);
}

/// Read the raw keyboard register. Only meaningful right after a
/// keyboard IRQ; returns garbage otherwise (same contract as the
/// original `kbd_getchar`).
pub fn keyboard_read_raw() -> u8 {
    #[cfg(target_os = "none")]
    // SAFETY: fixed MMIO register.
    unsafe {
        core::ptr::read_volatile(DEVICE_KEYBOARD_ADDR as *const u8)
    }
    #[cfg(not(target_os = "none"))]
    host_sim::keyboard_read_raw()
}

/// Disk block device: 512-byte blocks, interrupt-driven completion. The
/// MMIO contract here is request/ack; [`crate::drivers::disk`] is
/// responsible for blocking the caller until the IRQ handler completes
/// the request.
pub mod disk {
    pub const BLOCK_SIZE: usize = 512;

    pub fn nblocks() -> usize {
        #[cfg(target_os = "none")]
        // SAFETY: fixed MMIO register, read-only block count.
        unsafe {
            core::ptr::read_volatile((super::DEVICE_DISK_ADDR) as *const u32) as usize
        }
        #[cfg(not(target_os = "none"))]
        super::host_sim::disk::nblocks()
    }

    /// Issue a read of `block` into `buf`. Returns once the simulated
    /// IRQ has completed the transfer.
    pub fn read(block: usize, buf: &mut [u8; BLOCK_SIZE]) {
        #[cfg(target_os = "none")]
        unsafe {
            issue(block, buf.as_mut_ptr(), false);
        }
        #[cfg(not(target_os = "none"))]
        super::host_sim::disk::read(block, buf);
    }

    pub fn write(block: usize, buf: &[u8; BLOCK_SIZE]) {
        #[cfg(target_os = "none")]
        unsafe {
            issue(block, buf.as_ptr() as *mut u8, true);
        }
        #[cfg(not(target_os = "none"))]
        super::host_sim::disk::write(block, buf);
    }

    #[cfg(target_os = "none")]
    /// # Safety
    /// `ptr` must point at a live `BLOCK_SIZE`-byte buffer for the
    /// duration of the request.
    unsafe fn issue(block: usize, ptr: *mut u8, is_write: bool) {
        let base = super::DEVICE_DISK_ADDR;
        core::ptr::write_volatile((base + 4) as *mut u32, block as u32);
        core::ptr::write_volatile((base + 8) as *mut u32, ptr as u32);
        core::ptr::write_volatile((base + 12) as *mut u32, is_write as u32);
        // The real completion wait happens in crate::drivers::disk via
        // an IRQ-signalled wait queue; this just kicks off the request.
    }
}

/// IPI device ("dorder" in the original): cross-CPU signalling.
pub mod dorder {
    pub const MSG_BUF_SIZE: usize = 128;

    pub fn cpuid() -> u32 {
        #[cfg(target_os = "none")]
        // SAFETY: fixed MMIO register.
        unsafe {
            core::ptr::read_volatile(super::DEVICE_DORDER_ADDR as *const u32)
        }
        #[cfg(not(target_os = "none"))]
        super::host_sim::dorder::cpuid()
    }

    /// Raise the IPI line on `target_cpu`. Message delivery itself is
    /// handled by [`crate::drivers::ipi`]'s software ring buffer; this
    /// only pokes the hardware.
    pub fn assert(target_cpu: u32) {
        #[cfg(target_os = "none")]
        // SAFETY: fixed MMIO register.
        unsafe {
            core::ptr::write_volatile(super::DEVICE_DORDER_ADDR as *mut u32, 1 << target_cpu);
        }
        #[cfg(not(target_os = "none"))]
        super::host_sim::dorder::assert(target_cpu);
    }

    pub fn deassert(target_cpu: u32) {
        #[cfg(target_os = "none")]
        // SAFETY: fixed MMIO register.
        unsafe {
            core::ptr::write_volatile((super::DEVICE_DORDER_ADDR + 4) as *mut u32, 1 << target_cpu);
        }
        #[cfg(not(target_os = "none"))]
        super::host_sim::dorder::deassert(target_cpu);
    }
}

#[cfg(all(test, not(target_os = "none")))]
pub use host_sim::inject_key;
#[cfg(all(test, not(target_os = "none")))]
pub use host_sim::dorder::set_cpu_id;

#[cfg(not(target_os = "none"))]
mod host_sim {
    //! Pure-software stand-ins for the MMIO devices, used only when
    //! running the test suite on the host. Just enough fidelity for
    //! `crate::drivers` unit tests to exercise buffering/blocking logic
    //! without real hardware.
    use spin::Mutex;

    pub fn console_put_char(_c: u8) {}

    static LAST_KEY: Mutex<u8> = Mutex::new(0);

    pub fn keyboard_read_raw() -> u8 {
        *LAST_KEY.lock()
    }

    #[cfg(test)]
    pub fn inject_key(byte: u8) {
        *LAST_KEY.lock() = byte;
    }

    pub mod disk {
        use spin::Mutex;

        const NBLOCKS: usize = 1024;
        static STORAGE: Mutex<Option<alloc::vec::Vec<[u8; super::super::disk::BLOCK_SIZE]>>> =
            Mutex::new(None);

        extern crate alloc;

        fn with_storage<R>(f: impl FnOnce(&mut alloc::vec::Vec<[u8; super::super::disk::BLOCK_SIZE]>) -> R) -> R {
            let mut guard = STORAGE.lock();
            if guard.is_none() {
                *guard = Some(alloc::vec![[0u8; super::super::disk::BLOCK_SIZE]; NBLOCKS]);
            }
            f(guard.as_mut().unwrap())
        }

        pub fn nblocks() -> usize {
            NBLOCKS
        }

        pub fn read(block: usize, buf: &mut [u8; super::super::disk::BLOCK_SIZE]) {
            with_storage(|s| buf.copy_from_slice(&s[block]));
        }

        pub fn write(block: usize, buf: &[u8; super::super::disk::BLOCK_SIZE]) {
            with_storage(|s| s[block].copy_from_slice(buf));
        }
    }

    pub mod dorder {
        use core::sync::atomic::{AtomicU32, Ordering};
        static CPU_ID: AtomicU32 = AtomicU32::new(0);

        pub fn cpuid() -> u32 {
            CPU_ID.load(Ordering::Relaxed)
        }

        #[cfg(test)]
        pub fn set_cpu_id(id: u32) {
            CPU_ID.store(id, Ordering::Relaxed);
        }

        pub fn assert(_target_cpu: u32) {}
        pub fn deassert(_target_cpu: u32) {}
    }
}
