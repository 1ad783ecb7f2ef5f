//! Syscall gate: one dispatch table indexed by syscall number, every
//! user pointer validated against the calling process's address space
//! before it's touched. A thread that passes a bad pointer, or unlocks
//! or destroys a mutex it doesn't hold, gets back [`KernelError::Killed`]
//! — [`crate::irq::on_syscall`] turns that into an actual kill rather
//! than an errno.

use crate::drivers::keyboard;
use crate::error::{KernelError, KernelResult};
use crate::process::{self, Process};
use crate::thread;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Exit = 0,
    Putc = 1,
    Putstr = 2,
    Getc = 3,
    VmaMap = 4,
    VmaUnmap = 5,
    ThreadCreate = 6,
    ThreadSelf = 7,
    ThreadUsleep = 8,
    ThreadJoin = 9,
    ThreadFinish = 10,
    MutexInit = 11,
    MutexLock = 12,
    MutexUnlock = 13,
    MutexDestroy = 14,
}

impl Syscall {
    fn from_u32(n: u32) -> KernelResult<Self> {
        Ok(match n {
            0 => Self::Exit,
            1 => Self::Putc,
            2 => Self::Putstr,
            3 => Self::Getc,
            4 => Self::VmaMap,
            5 => Self::VmaUnmap,
            6 => Self::ThreadCreate,
            7 => Self::ThreadSelf,
            8 => Self::ThreadUsleep,
            9 => Self::ThreadJoin,
            10 => Self::ThreadFinish,
            11 => Self::MutexInit,
            12 => Self::MutexLock,
            13 => Self::MutexUnlock,
            14 => Self::MutexDestroy,
            _ => {
                return Err(KernelError::InvalidArgument {
                    reason: "syscall: unknown syscall number",
                })
            }
        })
    }
}

/// Dispatch one syscall for `proc`. `a0..a3` are the raw argument
/// registers; the return value becomes `v0`.
pub fn dispatch(proc: &Process, num: u32, a0: usize, a1: usize, a2: usize, a3: usize) -> KernelResult<usize> {
    match Syscall::from_u32(num)? {
        Syscall::Exit => {
            proc.set_retval(a0 as i32);
            thread::finish(a0);
        }
        Syscall::Putc => {
            crate::drivers::console::put_char(a0 as u8);
            Ok(1)
        }
        Syscall::Putstr => {
            let bytes = proc.read_user_bytes(a0, a1)?;
            for b in &bytes {
                crate::drivers::console::put_char(*b);
            }
            Ok(bytes.len())
        }
        Syscall::Getc => Ok(keyboard::getc() as usize),
        Syscall::VmaMap => proc.vma_map_user(a0, a1).map(|()| 0),
        Syscall::VmaUnmap => proc.vma_unmap_user(a0).map(|()| 0),
        Syscall::ThreadCreate => {
            let handle = proc.spawn_user_thread(a1, a2, a3)?;
            proc.write_user_bytes(a0, &handle.to_ne_bytes())?;
            Ok(0)
        }
        Syscall::ThreadSelf => {
            let handle = thread::current_ptr()
                .and_then(|t| proc.handle_for(t))
                .unwrap_or(process::MAIN_THREAD_HANDLE);
            Ok(handle as usize)
        }
        Syscall::ThreadUsleep => {
            thread::sleep_ticks(a0 as u64);
            Ok(0)
        }
        Syscall::ThreadJoin => {
            let handle = a0 as u32;
            let t = proc.user_thread(handle).ok_or(KernelError::InvalidArgument {
                reason: "thread_join: unknown handle",
            })?;
            // SAFETY: handle came from this process's own table, which
            // only ever holds live threads it created.
            let retval = unsafe { thread::join(t) }?;
            proc.write_user_bytes(a1, &retval.to_ne_bytes())?;
            Ok(0)
        }
        Syscall::ThreadFinish => thread::finish(a0),
        Syscall::MutexInit => {
            let handle = proc.create_user_mutex();
            proc.write_user_bytes(a0, &handle.to_ne_bytes())?;
            Ok(0)
        }
        Syscall::MutexLock => {
            proc.with_user_mutex(a0 as u32, |m| m.lock())?;
            Ok(0)
        }
        Syscall::MutexUnlock => {
            proc.with_user_mutex(a0 as u32, |m| m.unlock())??;
            Ok(0)
        }
        Syscall::MutexDestroy => {
            proc.destroy_user_mutex(a0 as u32)?;
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscall_number_is_rejected() {
        assert!(Syscall::from_u32(999).is_err());
    }

    #[test]
    fn thread_self_resolves_the_main_thread_handle() {
        crate::mm::frame_allocator::init();
        crate::sched::reset_for_test();
        let proc = Process::spawn(&[0u8], 0).unwrap();
        let r = dispatch(&proc, Syscall::ThreadSelf as u32, 0, 0, 0, 0).unwrap();
        assert_eq!(r, process::MAIN_THREAD_HANDLE as usize);
    }

    #[test]
    fn mutex_init_lock_unlock_round_trip() {
        crate::mm::frame_allocator::init();
        crate::sched::reset_for_test();
        let proc = Process::spawn(&[0u8], 0).unwrap();
        let out_ptr = proc.user_stack_top - 4096;
        proc.write_user_bytes(out_ptr, &0u32.to_ne_bytes()).unwrap();
        dispatch(&proc, Syscall::MutexInit as u32, out_ptr, 0, 0, 0).unwrap();
        let bytes = proc.read_user_bytes(out_ptr, 4).unwrap();
        let handle = u32::from_ne_bytes(bytes.try_into().unwrap());

        dispatch(&proc, Syscall::MutexLock as u32, handle as usize, 0, 0, 0).unwrap();
        dispatch(&proc, Syscall::MutexUnlock as u32, handle as usize, 0, 0, 0).unwrap();
    }

    fn idle_entry(_: usize) -> usize {
        0
    }

    #[test]
    fn mutex_unlock_by_non_owner_is_reported_as_killed() {
        crate::mm::frame_allocator::init();
        crate::sched::reset_for_test();
        let proc = Process::spawn(&[0u8], 0).unwrap();
        let handle = proc.create_user_mutex();

        let owner = thread::create(idle_entry, 0, thread::ThreadFlags::empty(), None).unwrap();
        crate::sched::set_idle_thread(crate::arch::cpu_id(), owner);
        proc.with_user_mutex(handle, |m| m.lock()).unwrap();

        let other = thread::create(idle_entry, 0, thread::ThreadFlags::empty(), None).unwrap();
        crate::sched::set_idle_thread(crate::arch::cpu_id(), other);
        let r = dispatch(&proc, Syscall::MutexUnlock as u32, handle as usize, 0, 0, 0);
        assert_eq!(r, Err(KernelError::Killed));
    }

    #[test]
    fn thread_create_with_an_out_pointer_in_kernel_space_is_killed() {
        crate::mm::frame_allocator::init();
        crate::sched::reset_for_test();
        let proc = Process::spawn(&[0u8], 0).unwrap();
        // *tid at 0x8000_0000 is past USER_ADDR_LIMIT — not a valid
        // pointer into this process's address space.
        let r = dispatch(
            &proc,
            Syscall::ThreadCreate as u32,
            crate::mm::USER_ADDR_LIMIT,
            proc.image_base,
            0,
            0,
        );
        assert_eq!(r, Err(KernelError::Killed));
    }

    #[test]
    fn destroying_a_locked_mutex_is_reported_as_killed() {
        crate::mm::frame_allocator::init();
        crate::sched::reset_for_test();
        let proc = Process::spawn(&[0u8], 0).unwrap();
        let handle = proc.create_user_mutex();
        proc.with_user_mutex(handle, |m| m.lock()).unwrap();
        let r = dispatch(&proc, Syscall::MutexDestroy as u32, handle as usize, 0, 0, 0);
        assert_eq!(r, Err(KernelError::Killed));
    }
}
