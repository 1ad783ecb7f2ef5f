//! Process: a user address space plus the bookkeeping needed for the
//! syscall gate to validate handles. Mirrors the original layout — a
//! fixed image base, a stack growing down from the top of user space,
//! and per-process tables of the user threads and user mutexes it has
//! created, looked up by small integer handles a user program passes
//! back into syscalls.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::phys_to_virt;
use crate::mm::vmm::{AddressSpace, VfMapFlags, PAGE_SIZE};
use crate::sync::KMutex;
use crate::thread::{self, Thread, ThreadFlags};

/// No syscall handle is ever 0: it doubles as the main thread's handle,
/// fixed rather than drawn from `next_handle` since it's created before
/// any syscall could ask for one.
pub const MAIN_THREAD_HANDLE: Handle = 0;

/// Where a process's image is mapped, per the external ABI.
pub const IMAGE_BASE: usize = 0x0000_1000;
/// Top of user address space; the initial stack sits just below it.
pub const USER_STACK_TOP: usize = 0x7FFF_F000;
pub const USER_STACK_SIZE: usize = 16 * PAGE_SIZE;

pub type Handle = u32;

struct PackedEntry {
    pc: usize,
    sp: usize,
    /// Delivered in `$a0`/`$a1` to the user entry function — `THREAD_CREATE`'s
    /// `data`/`udata`; both 0 for the process's implicit main thread.
    arg0: usize,
    arg1: usize,
}

fn user_mode_trampoline(data: usize) -> usize {
    // SAFETY: `data` is a `Box<PackedEntry>` pointer handed to us once,
    // by `Process::spawn`/`spawn_user_thread`, immediately before this
    // thread first ran.
    let packed = unsafe { Box::from_raw(data as *mut PackedEntry) };
    crate::arch::enter_user_mode(packed.pc, packed.sp, packed.arg0, packed.arg1)
}

pub struct Process {
    pub address_space: Arc<Mutex<AddressSpace>>,
    pub image_base: usize,
    pub image_size: usize,
    pub main_thread: NonNull<Thread>,
    pub user_stack_top: usize,
    retval: Mutex<Option<i32>>,
    user_threads: Mutex<BTreeMap<Handle, NonNull<Thread>>>,
    user_mutexes: Mutex<BTreeMap<Handle, Box<KMutex>>>,
    next_handle: AtomicU32,
    /// Top of the next additional user thread's stack; decremented by
    /// [`USER_STACK_SIZE`] for each one handed out.
    next_stack_top: Mutex<usize>,
}

unsafe impl Send for Process {}
unsafe impl Sync for Process {}

impl Process {
    /// Map `image` at [`IMAGE_BASE`], lay down a user stack, and create
    /// the main thread parked at `entry_offset` into the image.
    pub fn spawn(image: &[u8], entry_offset: usize) -> KernelResult<Box<Process>> {
        let mut space = AddressSpace::create()?;

        let image_size = crate::mm::round_up_to_frame(image.len().max(1));
        let base = space.vma_map(IMAGE_BASE, image_size, VfMapFlags::VA_USER)?;
        copy_into_user(&space, base, image);

        let stack_base = USER_STACK_TOP - USER_STACK_SIZE;
        space.vma_map(stack_base, USER_STACK_SIZE, VfMapFlags::VA_USER)?;

        let address_space = Arc::new(Mutex::new(space));
        let packed = Box::new(PackedEntry {
            pc: base + entry_offset,
            sp: USER_STACK_TOP,
            arg0: 0,
            arg1: 0,
        });
        let data = Box::into_raw(packed) as usize;

        let main_thread = thread::create(
            user_mode_trampoline,
            data,
            ThreadFlags::empty(),
            Some(address_space.clone()),
        )?;

        let mut user_threads = BTreeMap::new();
        user_threads.insert(MAIN_THREAD_HANDLE, main_thread);

        Ok(Box::new(Process {
            address_space,
            image_base: base,
            image_size,
            main_thread,
            user_stack_top: USER_STACK_TOP,
            retval: Mutex::new(None),
            user_threads: Mutex::new(user_threads),
            user_mutexes: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU32::new(MAIN_THREAD_HANDLE as u32 + 1),
            next_stack_top: Mutex::new(stack_base),
        }))
    }

    fn alloc_handle(&self) -> Handle {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Create an additional user thread sharing this process's address
    /// space. `entry` is an absolute user-space vaddr (as passed by
    /// `THREAD_CREATE`); `data`/`udata` are delivered to it in `$a0`/`$a1`.
    /// A fresh stack is carved out below the lowest one handed out so
    /// far. Returns the handle `THREAD_JOIN`/`THREAD_SELF` will know it by.
    pub fn spawn_user_thread(&self, entry: usize, data: usize, udata: usize) -> KernelResult<Handle> {
        let stack_top = {
            let mut next_stack_top = self.next_stack_top.lock();
            let top = *next_stack_top;
            let base = top
                .checked_sub(USER_STACK_SIZE)
                .ok_or(KernelError::InvalidArgument { reason: "out of stack space" })?;
            self.address_space.lock().vma_map(base, USER_STACK_SIZE, VfMapFlags::VA_USER)?;
            *next_stack_top = base;
            top
        };

        let packed = Box::new(PackedEntry {
            pc: entry,
            sp: stack_top,
            arg0: data,
            arg1: udata,
        });
        let trampoline_data = Box::into_raw(packed) as usize;
        let t = thread::create(
            user_mode_trampoline,
            trampoline_data,
            ThreadFlags::empty(),
            Some(self.address_space.clone()),
        )?;
        let handle = self.alloc_handle();
        self.user_threads.lock().insert(handle, t);
        Ok(handle)
    }

    pub fn user_thread(&self, handle: Handle) -> Option<NonNull<Thread>> {
        self.user_threads.lock().get(&handle).copied()
    }

    /// Linear lookup of the handle a thread pointer is known by, for
    /// `THREAD_SELF`.
    pub fn handle_for(&self, t: NonNull<Thread>) -> Option<Handle> {
        self.user_threads
            .lock()
            .iter()
            .find(|(_, &v)| v == t)
            .map(|(&h, _)| h)
    }

    pub fn create_user_mutex(&self) -> Handle {
        let handle = self.alloc_handle();
        self.user_mutexes.lock().insert(handle, Box::new(KMutex::new()));
        handle
    }

    pub fn with_user_mutex<R>(&self, handle: Handle, f: impl FnOnce(&KMutex) -> R) -> KernelResult<R> {
        let table = self.user_mutexes.lock();
        let m = table.get(&handle).ok_or(KernelError::InvalidArgument {
            reason: "bad user mutex handle",
        })?;
        Ok(f(m))
    }

    /// Destroy a user mutex handle. Destroying one that's still locked
    /// kills the calling thread rather than panicking the kernel — the
    /// syscall-layer equivalent of the kernel mutex's fatal "destroy of a
    /// locked primitive" invariant.
    pub fn destroy_user_mutex(&self, handle: Handle) -> KernelResult<()> {
        let mut table = self.user_mutexes.lock();
        let m = table.get(&handle).ok_or(KernelError::InvalidArgument {
            reason: "bad user mutex handle",
        })?;
        if m.is_locked() {
            return Err(KernelError::Killed);
        }
        table.remove(&handle);
        Ok(())
    }

    /// `VMA_MAP` syscall body: read the requested base out of user memory
    /// at `from_ptr` (0 means "let the kernel pick"), map it, then write
    /// the resulting base back.
    pub fn vma_map_user(&self, from_ptr: usize, size: usize) -> KernelResult<()> {
        let requested = self.read_user_usize(from_ptr)?;
        let flags = if requested == 0 {
            VfMapFlags::VA_AUTO
        } else {
            VfMapFlags::VA_USER
        };
        let base = self.address_space.lock().vma_map(requested, size, flags)?;
        self.write_user_bytes(from_ptr, &base.to_ne_bytes())
    }

    pub fn vma_unmap_user(&self, from: usize) -> KernelResult<()> {
        self.address_space.lock().vma_unmap(from)
    }

    fn read_user_usize(&self, addr: usize) -> KernelResult<usize> {
        let bytes = self.read_user_bytes(addr, core::mem::size_of::<usize>())?;
        let mut buf = [0u8; core::mem::size_of::<usize>()];
        buf.copy_from_slice(&bytes);
        Ok(usize::from_ne_bytes(buf))
    }

    pub fn set_retval(&self, code: i32) {
        *self.retval.lock() = Some(code);
    }

    pub fn retval(&self) -> Option<i32> {
        *self.retval.lock()
    }

    /// `true` iff `[addr, addr+len)` lies entirely inside a valid VMA of
    /// this process's address space. Used by the syscall gate to
    /// validate every user pointer before dereferencing it.
    pub fn check_user_range(&self, addr: usize, len: usize) -> bool {
        self.address_space.lock().check_user(addr, len)
    }

    /// Copy `len` bytes starting at user address `addr` into a kernel
    /// buffer. `Killed` if the range isn't entirely mapped — callers
    /// treat that as a contract violation by the calling thread.
    pub fn read_user_bytes(&self, addr: usize, len: usize) -> KernelResult<alloc::vec::Vec<u8>> {
        if !self.check_user_range(addr, len) {
            return Err(KernelError::Killed);
        }
        let space = self.address_space.lock();
        let mut out = alloc::vec::Vec::with_capacity(len);
        let mut vaddr = addr;
        while out.len() < len {
            let chunk = (len - out.len()).min(PAGE_SIZE - (vaddr % PAGE_SIZE));
            let phys = space.mapping_find(vaddr).ok_or(KernelError::Killed)?;
            // SAFETY: `phys` was just resolved from a checked, currently
            // valid user mapping.
            let src = unsafe { core::slice::from_raw_parts(phys_to_virt(phys), chunk) };
            out.extend_from_slice(src);
            vaddr += chunk;
        }
        Ok(out)
    }

    /// Copy `data` into user memory starting at `addr`.
    pub fn write_user_bytes(&self, addr: usize, data: &[u8]) -> KernelResult<()> {
        if !self.check_user_range(addr, data.len()) {
            return Err(KernelError::Killed);
        }
        let space = self.address_space.lock();
        let mut remaining = data;
        let mut vaddr = addr;
        while !remaining.is_empty() {
            let chunk = remaining.len().min(PAGE_SIZE - (vaddr % PAGE_SIZE));
            let phys = space.mapping_find(vaddr).ok_or(KernelError::Killed)?;
            // SAFETY: `phys` was just resolved from a checked, currently
            // valid user mapping.
            unsafe {
                core::ptr::copy_nonoverlapping(remaining.as_ptr(), phys_to_virt(phys), chunk);
            }
            remaining = &remaining[chunk..];
            vaddr += chunk;
        }
        Ok(())
    }
}

fn copy_into_user(space: &AddressSpace, base: usize, image: &[u8]) {
    let mut remaining = image;
    let mut vaddr = base;
    while !remaining.is_empty() {
        let chunk = remaining.len().min(PAGE_SIZE - (vaddr % PAGE_SIZE));
        if let Some(phys) = space.mapping_find(vaddr) {
            // SAFETY: `phys` was just returned by a fresh mapping backing
            // this VMA; the destination page is exclusively owned by
            // this not-yet-running process.
            unsafe {
                core::ptr::copy_nonoverlapping(remaining.as_ptr(), phys_to_virt(phys), chunk);
            }
        }
        remaining = &remaining[chunk..];
        vaddr += chunk;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_maps_image_and_stack() {
        crate::mm::frame_allocator::init();
        crate::sched::reset_for_test();
        let image = [0x01u8, 0x02, 0x03, 0x04];
        let proc = Process::spawn(&image, 0).unwrap();
        assert!(proc.check_user_range(proc.image_base, 4));
        assert!(proc.check_user_range(proc.user_stack_top - 4, 4));
    }

    #[test]
    fn bad_user_mutex_handle_is_rejected() {
        crate::mm::frame_allocator::init();
        crate::sched::reset_for_test();
        let proc = Process::spawn(&[0u8], 0).unwrap();
        assert!(proc.with_user_mutex(999, |_| ()).is_err());
    }

    #[test]
    fn main_thread_resolves_under_the_fixed_handle() {
        crate::mm::frame_allocator::init();
        crate::sched::reset_for_test();
        let proc = Process::spawn(&[0u8], 0).unwrap();
        assert_eq!(proc.user_thread(MAIN_THREAD_HANDLE), Some(proc.main_thread));
        assert_eq!(proc.handle_for(proc.main_thread), Some(MAIN_THREAD_HANDLE));
    }

    #[test]
    fn destroying_a_locked_mutex_is_killed_not_fatal() {
        crate::mm::frame_allocator::init();
        crate::sched::reset_for_test();
        let proc = Process::spawn(&[0u8], 0).unwrap();
        let handle = proc.create_user_mutex();
        proc.with_user_mutex(handle, |m| m.lock()).unwrap();
        assert_eq!(proc.destroy_user_mutex(handle), Err(KernelError::Killed));
        proc.with_user_mutex(handle, |m| m.unlock().unwrap()).unwrap();
        assert!(proc.destroy_user_mutex(handle).is_ok());
    }

    #[test]
    fn vma_map_user_writes_the_chosen_base_back() {
        crate::mm::frame_allocator::init();
        crate::sched::reset_for_test();
        let proc = Process::spawn(&[0u8], 0).unwrap();
        let out_ptr = proc.user_stack_top - 2 * PAGE_SIZE;
        proc.write_user_bytes(out_ptr, &0usize.to_ne_bytes()).unwrap();
        proc.vma_map_user(out_ptr, PAGE_SIZE).unwrap();
        let base = proc.read_user_usize(out_ptr).unwrap();
        assert!(proc.check_user_range(base, PAGE_SIZE));
    }
}
