//! Inter-processor signalling ("dorder" in the original). A small shared
//! message ring plus the assert/deassert IPI line: `send` drops a word
//! in the ring and pokes the target CPU, `handle_interrupt` (run from
//! the IPI exception) drains it and wakes anyone blocked in `wait`.

use spin::Mutex;

use crate::arch::msim::devices::dorder;
use crate::thread::WaitQueue;

pub const MSG_BUF_SIZE: usize = dorder::MSG_BUF_SIZE;
/// Wakes every thread parked in [`wait`]; carries no further payload.
pub const MSG_SIGNAL: u32 = 0x0000_CAFE;

struct Ring {
    buf: [u32; MSG_BUF_SIZE],
    head: usize,
    tail: usize,
    count: usize,
}

impl Ring {
    const fn new() -> Self {
        Self {
            buf: [0; MSG_BUF_SIZE],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, msg: u32) {
        if self.count == MSG_BUF_SIZE {
            self.tail = (self.tail + 1) % MSG_BUF_SIZE;
            self.count -= 1;
        }
        self.buf[self.head] = msg;
        self.head = (self.head + 1) % MSG_BUF_SIZE;
        self.count += 1;
    }

    fn pop(&mut self) -> Option<u32> {
        if self.count == 0 {
            return None;
        }
        let m = self.buf[self.tail];
        self.tail = (self.tail + 1) % MSG_BUF_SIZE;
        self.count -= 1;
        Some(m)
    }
}

static RING: Mutex<Ring> = Mutex::new(Ring::new());
static WAITERS: Mutex<WaitQueue> = Mutex::new(WaitQueue::new());

/// Enqueue `msg` and raise the IPI line on `target_cpu`.
pub fn send(target_cpu: u32, msg: u32) {
    RING.lock().push(msg);
    dorder::assert(target_cpu);
}

/// Run from the IPI exception handler: drain the ring, wake every
/// waiter, then drop the line.
pub fn handle_interrupt() {
    let had_any = {
        let mut ring = RING.lock();
        let mut any = false;
        while ring.pop().is_some() {
            any = true;
        }
        any
    };
    if had_any {
        WAITERS.lock().wake_all();
    }
    dorder::deassert(dorder::cpuid());
}

pub fn probe() -> Option<u32> {
    RING.lock().pop()
}

/// Block until the next IPI message.
pub fn wait() -> u32 {
    loop {
        if let Some(m) = probe() {
            return m;
        }
        WAITERS.lock().park();
        crate::thread::reschedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_probe_sees_message() {
        *RING.lock() = Ring::new();
        send(0, MSG_SIGNAL);
        assert_eq!(probe(), Some(MSG_SIGNAL));
        assert_eq!(probe(), None);
    }
}
