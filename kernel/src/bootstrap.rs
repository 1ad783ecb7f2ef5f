//! Boot sequence: bring subsystems up in dependency order, then hand
//! off to the scheduler. Split out of `main.rs` so the same sequence
//! can be driven by a future multi-CPU entry point without duplicating
//! it per architecture.

use crate::arch;
use crate::drivers;
use crate::mm;
use crate::sched;
use crate::thread::{self, ThreadFlags};
use crate::timer;

fn idle_main(_: usize) -> usize {
    loop {
        arch::halt();
    }
}

/// Runs once, on the bootstrap processor, before any other kernel code.
/// Order matters: the global allocator must exist before anything
/// touches `Box`/`Vec`, the frame allocator and TLB before any address
/// space is created, drivers before any thread can block on one, and
/// the idle thread must be installed before `sched::schedule` can ever
/// run out of ready threads.
pub fn kernel_init() {
    crate::init_global_heap();
    // Build identity, stamped in by build.rs: target triple and commit
    // hash, logged once so a hung or crashed simulator run can be traced
    // back to the image that produced it.
    log::info!(
        "msim-kernel {}.{}.{} target={} commit={}",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
        "mips-msim",
        option_env!("GIT_HASH").unwrap_or("unknown"),
    );
    arch::init();
    mm::init();
    drivers::init();

    let idle = thread::create(idle_main, 0, ThreadFlags::empty(), None)
        .expect("bootstrap: failed to create idle thread");
    sched::set_idle_thread(arch::cpu_id(), idle);

    timer::init();

    log::info!("bootstrap: kernel initialized");
}

/// Transfer control to the scheduler. Never returns.
pub fn run() -> ! {
    kernel_init();
    println!("kernel ready");
    thread::yield_now();
    idle_main(0);
    unreachable!()
}
