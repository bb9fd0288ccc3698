//! Counting notification channel backed by an eventfd.
//!
//! The kernel keeps a 64-bit counter that producers add to and the consumer reads-and-resets in one go.
//! Signals sent between two drains coalesce, so a single drain may report many of them.
//!
//! Producers hold a [Notifier] and may signal from any thread without ever blocking or suspending:
//! the eventfd is non-blocking, so a counter that can't take the amount fails the signal instead of stalling it.
//! A failed delivery is reported to the producer's failure handler, it is never retried.
//! On a thread running a ringfence runtime the handler runs later from the event loop,
//! elsewhere it runs before the signal returns.
//!
//! The consumer calls [Channel::drain] from a fiber, which waits for readiness on io_uring before reading.
//! Only one fiber may drain a channel at a time: concurrent drains each wait for their own wakeup,
//! so one of them may sleep through counts that another already took.
//!
//! # Examples
//! ```no_run
//! use ringfence::runtime;
//! use ringfence::sync::Channel;
//!
//! runtime::start(|| {
//!     let channel = Channel::new().unwrap();
//!     let notifier = channel.notifier();
//!
//!     std::thread::spawn(move || {
//!         notifier.signal(2).unwrap();
//!         notifier.signal(3).unwrap();
//!     })
//!     .join()
//!     .unwrap();
//!
//!     assert_eq!(channel.drain().unwrap(), 5);
//! })
//! .unwrap();
//! ```

use std::num::NonZeroU64;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::{io, mem};

use super::ChannelError;
use crate::{runtime, Error};

/// Size of the counter transferred by every eventfd read and write.
const COUNTER_SIZE: u32 = mem::size_of::<u64>() as u32;

/// Owned non-blocking eventfd descriptor, closed when the last handle to it goes away.
#[derive(Debug)]
struct EventFd(RawFd);

impl EventFd {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(EventFd(fd))
    }

    /// Adds to the counter, failing with [io::ErrorKind::WouldBlock] if it would overflow.
    fn write(&self, amount: u64) -> io::Result<()> {
        let bytes = amount.to_ne_bytes();

        loop {
            let written =
                unsafe { libc::write(self.0, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
            if written >= 0 {
                return check_transfer(written as u32, io::ErrorKind::WriteZero);
            }

            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }

    /// Takes and resets the counter, failing with [io::ErrorKind::WouldBlock] if it's zero.
    fn read(&self) -> io::Result<u64> {
        let mut counter = [0_u8; COUNTER_SIZE as usize];

        loop {
            let read = unsafe {
                libc::read(self.0, counter.as_mut_ptr() as *mut libc::c_void, counter.len())
            };
            if read >= 0 {
                check_transfer(read as u32, io::ErrorKind::UnexpectedEof)?;
                return Ok(u64::from_ne_bytes(counter));
            }

            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

/// Whole-counter transfers are the only valid outcome of an eventfd read or write.
fn check_transfer(bytes: u32, kind: io::ErrorKind) -> io::Result<()> {
    if bytes == COUNTER_SIZE {
        return Ok(());
    }

    let message = format!("transferred {bytes} of {COUNTER_SIZE} counter bytes");
    Err(io::Error::new(kind, message))
}

/// Producer side of a [Channel], cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct Notifier(Arc<EventFd>);

impl Notifier {
    /// Adds [amount] to the counter, logging delivery failures.
    ///
    /// Fails immediately with [ChannelError::InvalidArgument] if [amount] is zero.
    pub fn signal(&self, amount: u64) -> Result<(), ChannelError> {
        self.signal_with(amount, move |error| {
            log::warn!("lost a signal of {amount}: {error}");
        })
    }

    /// Adds [amount] to the counter, calling [on_failure] if it can't be delivered.
    ///
    /// Never blocks or suspends.
    /// A counter too full to take [amount] is a delivery failure, nothing is added in that case.
    /// On a runtime thread [on_failure] runs later on that thread, elsewhere it runs before this returns.
    pub fn signal_with(
        &self,
        amount: u64,
        on_failure: impl FnOnce(ChannelError) + 'static,
    ) -> Result<(), ChannelError> {
        let amount = NonZeroU64::new(amount).ok_or(ChannelError::InvalidArgument)?;
        self.deliver(amount, on_failure);
        Ok(())
    }

    pub(crate) fn deliver(&self, amount: NonZeroU64, on_failure: impl FnOnce(ChannelError) + 'static) {
        let error = match self.0.write(amount.get()) {
            Ok(()) => return,
            Err(error) => ChannelError::DeliveryFailure(error),
        };

        // the event loop reports it, never the signalling call itself
        let report = move |_: io::Result<u32>| on_failure(error);
        let sqe = io_uring::opcode::Nop::new().build();

        if let Err(report) = runtime::submit_detached(sqe, report) {
            report(Ok(0));
        }
    }
}

/// Consumer side of a notification channel, owning the eventfd together with its [Notifier]s.
#[derive(Debug)]
pub struct Channel {
    notifier: Notifier,
}

impl Channel {
    /// Allocates a fresh eventfd with a zeroed counter.
    pub fn new() -> Result<Self, ChannelError> {
        let eventfd = EventFd::new().map_err(ChannelError::ResourceExhausted)?;
        log::trace!("created notification channel on eventfd {}", eventfd.0);

        Ok(Channel {
            notifier: Notifier(Arc::new(eventfd)),
        })
    }

    /// Hands out a producer handle to this channel.
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Same as [Notifier::signal].
    #[inline]
    pub fn signal(&self, amount: u64) -> Result<(), ChannelError> {
        self.notifier.signal(amount)
    }

    /// Same as [Notifier::signal_with].
    #[inline]
    pub fn signal_with(
        &self,
        amount: u64,
        on_failure: impl FnOnce(ChannelError) + 'static,
    ) -> Result<(), ChannelError> {
        self.notifier.signal_with(amount, on_failure)
    }

    /// Suspends the running fiber until the counter is non-zero, then takes and resets it.
    ///
    /// Returns [Error::Cancelled] if the fiber is cancelled first, no counts are lost in that case.
    ///
    /// # Panics
    /// If not called from a fiber.
    pub fn drain(&self) -> Result<u64, Error<ChannelError>> {
        loop {
            self.readable()?;

            match self.notifier.0.read() {
                Ok(count) => {
                    log::trace!("drained {count} from eventfd {}", self.as_raw_fd());
                    return Ok(count);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {} // raced by another reader
                Err(error) => return Err(Error::Original(ChannelError::DeliveryFailure(error))),
            }
        }
    }

    /// Suspends until the counter is non-zero, leaving it untouched.
    fn readable(&self) -> Result<(), Error<ChannelError>> {
        let fd = io_uring::types::Fd(self.as_raw_fd());
        let sqe = io_uring::opcode::PollAdd::new(fd, libc::POLLIN as u32).build();

        runtime::syscall(sqe).map_err(|error| error.map(ChannelError::DeliveryFailure))?;
        Ok(())
    }

    /// Whether the counter is currently non-zero, without touching it.
    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        let mut pollfd = libc::pollfd {
            fd: self.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut pollfd, 1, 0) };
        assert_ne!(ready, -1, "{}", io::Error::last_os_error());

        ready == 1
    }
}

impl AsRawFd for Channel {
    fn as_raw_fd(&self) -> RawFd {
        self.notifier.0 .0
    }
}
