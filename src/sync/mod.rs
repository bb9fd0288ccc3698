//! Cross-thread notification and admission control primitives.
//!
//! Producers may live on any thread, consumers are fibers on a ringfence runtime.
//!
//! Use [notification::Channel] to wake a single consumer with accumulated counts,
//! [unbounded::unbounded] for a producer/consumer pair that never pushes back,
//! and [limiter::Limiter] to bound how much work may be outstanding at once.

use std::io;

pub mod limiter;
pub mod notification;
pub mod unbounded;

pub use limiter::{Job, Limiter};
pub use notification::{Channel, Notifier};

/// Failure of a notification channel.
#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    /// The kernel refused to allocate the eventfd, usually due to file descriptor limits.
    #[error("couldn't allocate an eventfd: {0}")]
    ResourceExhausted(#[source] io::Error),

    /// Signalled an amount of zero.
    #[error("signalled amount must be non-zero")]
    InvalidArgument,

    /// A write to or read from the eventfd didn't transfer the whole counter.
    #[error("eventfd counter transfer failed: {0}")]
    DeliveryFailure(#[source] io::Error),
}
