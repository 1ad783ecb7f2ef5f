//! Kernel library: the core of a small, educational MIPS/MSIM kernel.
//!
//! Built as a library so the scheduler, allocators, synchronization
//! primitives and syscall gate can be exercised by the host `#[test]`
//! harness without a real MIPS target; `main.rs` links this crate and
//! adds only the bare-metal entry point and panic handler.

#![no_std]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare metal: a real heap, backed by the BSS region reserved in the
// linker script and handed to `linked_list_allocator` once `mm::init`
// knows the kernel image's extent. Host tests: delegate to the system
// allocator so `Vec`/`Box`/`BTreeMap` work under `cargo test` without a
// second allocator implementation to maintain.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(target_os = "none")]
const GLOBAL_HEAP_SIZE: usize = 4 * 1024 * 1024;
#[cfg(target_os = "none")]
static mut GLOBAL_HEAP: [u8; GLOBAL_HEAP_SIZE] = [0; GLOBAL_HEAP_SIZE];

/// Hand the global allocator a backing region. Must run once, before
/// anything touches `Box`/`Vec`/`Arc` — first in [`bootstrap::kernel_init`].
#[cfg(target_os = "none")]
pub fn init_global_heap() {
    // SAFETY: called once, before any other code allocates.
    unsafe {
        ALLOCATOR
            .lock()
            .init(core::ptr::addr_of_mut!(GLOBAL_HEAP) as *mut u8, GLOBAL_HEAP_SIZE);
    }
}

#[cfg(not(target_os = "none"))]
pub fn init_global_heap() {}

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod adt;
pub mod arch;
pub mod bootstrap;
pub mod drivers;
pub mod error;
pub mod irq;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod thread;
pub mod timer;
pub mod utils;

/// Heap allocation error handler. Panic is intentional: allocation
/// failure in a `no_std` kernel has nowhere left to propagate to.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
