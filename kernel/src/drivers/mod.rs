//! Device collaborators sitting directly on the MMIO contracts in
//! [`crate::arch::msim::devices`]. Each driver owns exactly the
//! buffering/blocking behavior the hardware itself doesn't provide.

pub mod console;
pub mod disk;
pub mod ipi;
pub mod keyboard;

pub fn init() {
    keyboard::init();
    disk::init();
}
