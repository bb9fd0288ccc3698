//! Abstraction over cancellable non-blocking syscalls.
//!
//! Linux only, every syscall goes through io_uring.

#[cfg(not(target_os = "linux"))]
compile_error!("ringfence only supports Linux");

#[cfg(target_os = "linux")]
use std::io;

#[cfg(target_os = "linux")]
pub(super) struct Interface {
    io_uring: io_uring::IoUring,
}

#[cfg(target_os = "linux")]
const ASYNC_CANCELLATION_USER_DATA: u64 = u64::MAX;

/// Marks syscalls that no fiber is waiting on.
#[cfg(target_os = "linux")]
const DETACHED_BIT: u64 = 1 << 63;

#[cfg(target_os = "linux")]
impl Interface {
    pub(super) fn new(entries: u32) -> io::Result<Self> {
        let mut builder = io_uring::IoUring::builder();
        builder.setup_clamp(); // won't panic if IORING_MAX_ENTRIES is too large
        let io_uring = builder.build(entries)?;
        Ok(Interface { io_uring })
    }

    /// Submits pending entries and blocks the thread until at least one completes.
    pub(super) fn wait_for_completed(&mut self) {
        loop {
            match self.io_uring.submit_and_wait(1) {
                Ok(_) => break,
                Err(error) if error.raw_os_error() == Some(libc::EINTR) => continue,
                Err(error) => panic!("io_uring_enter failed: {error}"),
            }
        }
    }

    /// Collects the results of every completed syscall.
    pub(super) fn process_completed(&mut self) -> impl Iterator<Item = (Id, i32)> {
        let mut results = vec![]; // TODO: return iterator (to avoid allocating) that mutably borrows io_uring by holding cq

        for cqe in self.io_uring.completion() {
            if cqe.user_data() == ASYNC_CANCELLATION_USER_DATA {
                continue;
            }

            results.push((Id(cqe.user_data()), cqe.result()));
        }

        results.into_iter()
    }

    /// Queues a syscall, submitting to the kernel early only when the submission queue is full.
    pub(super) fn issue(&mut self, id: Id, sqe: io_uring::squeue::Entry) {
        let sqe = sqe.user_data(id.0);

        let mut sq = self.io_uring.submission();
        while sq.is_full() {
            drop(sq); // avoid borrowing io_uring more than once
            if let Err(error) = self.io_uring.submit() {
                log::warn!("early io_uring submission failed: {error}");
            }
            sq = self.io_uring.submission();
        }
        unsafe { sq.push(&sqe).expect("submission queue isn't full") };
    }

    /// Asks the kernel to stop an in-flight syscall, its completion still arrives.
    pub(super) fn cancel(&mut self, target: Id) {
        let sqe = io_uring::opcode::AsyncCancel::new(target.0).build();
        self.issue(Id(ASYNC_CANCELLATION_USER_DATA), sqe);
    }
}

/// Identifies a syscall in its completion.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(super) struct Id(pub(super) u64);

impl Id {
    /// Syscall parked on by a fiber.
    pub(super) fn fiber(index: usize) -> Self {
        Id(index as u64)
    }

    /// Syscall whose completion runs a callback instead of waking a fiber.
    pub(super) fn detached(key: usize) -> Self {
        Id(key as u64 | DETACHED_BIT)
    }

    /// Slab key of a detached syscall.
    pub(super) fn detached_key(self) -> Option<usize> {
        (self.0 & DETACHED_BIT != 0).then(|| (self.0 & !DETACHED_BIT) as usize)
    }
}
