//! Fiber stack memory.

use std::num::NonZeroUsize;
use std::{ffi, io, ptr};

/// Anonymous memory mapping used as a fiber's stack, lowest pages protected.
#[derive(Debug)]
pub(super) struct Stack {
    pointer: *mut u8,
    length: usize,
}

impl Stack {
    /// Allocates a general purpose stack.
    /// Demand paging ensures that physical memory is allocated only as necessary, during a page fault.
    /// The stack is protected from overflow using guard pages.
    pub(super) fn new(guard_pages: NonZeroUsize, usable_pages: NonZeroUsize) -> io::Result<Self> {
        let page_size = page_size();
        let length = (guard_pages.get() + usable_pages.get()) * page_size;

        // kernel allocates an unused block of virtual memory
        let pointer = unsafe {
            libc::mmap(
                ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if pointer == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // if guarding memory goes wrong then mmap gets cleaned up in Stack's drop
        let stack = Stack {
            pointer: pointer as *mut u8,
            length,
        };

        // located at the lowest addresses since the stack grows downward
        let result =
            unsafe { libc::mprotect(pointer, guard_pages.get() * page_size, libc::PROT_NONE) };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(stack)
    }

    /// Highest address of the mapping, where the stack starts growing down from.
    pub(super) fn base(&self) -> *mut u8 {
        // safety: part of same allocation, can't overflow
        unsafe { self.pointer.add(self.length) }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let result = unsafe { libc::munmap(self.pointer as *mut ffi::c_void, self.length) };
        debug_assert_eq!(result, 0);
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
