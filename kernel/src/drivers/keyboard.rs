//! Keyboard: a 128-byte circular buffer fed by the IRQ handler, drained
//! by blocking/non-blocking reads. Directly mirrors the original
//! `kbd.c`'s `kbd_head`/`kbd_tail` ring plus a single wait queue woken on
//! every keypress.

use spin::Mutex;

use crate::arch::msim::devices;
use crate::error::{KernelError, KernelResult};
use crate::thread::WaitQueue;

pub const BUF_SIZE: usize = 128;

struct Ring {
    buf: [u8; BUF_SIZE],
    head: usize,
    tail: usize,
    count: usize,
}

impl Ring {
    const fn new() -> Self {
        Self {
            buf: [0; BUF_SIZE],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        // A full buffer drops the oldest byte, matching a ring that
        // never blocks the IRQ handler itself.
        if self.count == BUF_SIZE {
            self.tail = (self.tail + 1) % BUF_SIZE;
            self.count -= 1;
        }
        self.buf[self.head] = byte;
        self.head = (self.head + 1) % BUF_SIZE;
        self.count += 1;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.count == 0 {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % BUF_SIZE;
        self.count -= 1;
        Some(byte)
    }
}

static RING: Mutex<Ring> = Mutex::new(Ring::new());
static WAITERS: Mutex<WaitQueue> = Mutex::new(WaitQueue::new());

pub fn init() {}

/// Keyboard IRQ handler: read the raw register, buffer it, wake one
/// blocked reader.
pub fn handle_interrupt() {
    let byte = devices::keyboard_read_raw();
    RING.lock().push(byte);
    WAITERS.lock().wake_one();
}

/// Non-blocking read. `WouldBlock` if the buffer is empty.
pub fn getc_try() -> KernelResult<u8> {
    RING.lock().pop().ok_or(KernelError::WouldBlock)
}

/// Block until a byte is available.
pub fn getc() -> u8 {
    loop {
        if let Ok(b) = getc_try() {
            return b;
        }
        WAITERS.lock().park();
        crate::thread::reschedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::msim::devices::inject_key;

    #[test]
    fn interrupt_buffers_byte_for_try_read() {
        *RING.lock() = Ring::new();
        inject_key(b'x');
        handle_interrupt();
        assert_eq!(getc_try(), Ok(b'x'));
        assert_eq!(getc_try(), Err(KernelError::WouldBlock));
    }

    #[test]
    fn full_ring_drops_oldest() {
        *RING.lock() = Ring::new();
        for i in 0..(BUF_SIZE + 3) {
            inject_key(i as u8);
            handle_interrupt();
        }
        assert_eq!(getc_try(), Ok(3));
    }
}
