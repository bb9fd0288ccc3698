//! Timers for fibers.
//!
//! Racing [sleep] against a suspension point in a sibling fiber and cancelling the loser is how timeouts are composed.

use std::time::Duration;

use crate::{runtime, Error};

/// Puts the current fiber to sleep for at least [duration].
pub fn sleep(duration: Duration) -> crate::CancellableResult<()> {
    let timespec = io_uring::types::Timespec::new()
        .sec(duration.as_secs())
        .nsec(duration.subsec_nanos());

    let sqe = io_uring::opcode::Timeout::new(&timespec).build();

    match runtime::syscall(sqe) {
        Ok(_) => Ok(()),
        Err(Error::Original(error)) if error.raw_os_error() == Some(libc::ETIME) => Ok(()),
        Err(Error::Original(error)) => panic!("unexpected timeout failure: {error}"),
        Err(Error::Cancelled) => Err(Error::Cancelled),
    }
}
