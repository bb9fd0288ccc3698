//! Producer/consumer pair without any limit on outstanding work.
//!
//! Producers report how much work they produced, the consumer learns how much to consume.
//! Producers never suspend, however far ahead of the consumer they get.
//! Only a single [Consumer] exists and consuming borrows it mutably, so there's never more than one drain in flight.

use super::notification::{Channel, Notifier};
use super::ChannelError;
use crate::Error;

/// Creates a producer/consumer pair on a fresh eventfd.
///
/// # Examples
/// ```no_run
/// use ringfence::runtime;
/// use ringfence::sync::unbounded::unbounded;
///
/// runtime::start(|| {
///     let (producer, mut consumer) = unbounded().unwrap();
///
///     std::thread::spawn(move || producer.produced(3).unwrap());
///
///     let mut consumed = 0;
///     while consumed < 3 {
///         consumed += consumer.consume().unwrap();
///     }
/// })
/// .unwrap();
/// ```
pub fn unbounded() -> Result<(Producer, Consumer), ChannelError> {
    let channel = Channel::new()?;
    let producer = Producer(channel.notifier());

    Ok((producer, Consumer(channel)))
}

/// Sends the amount of work produced to the [Consumer].
#[derive(Debug, Clone)]
pub struct Producer(Notifier);

impl Producer {
    /// Reports [count] new units of work, logging delivery failures.
    pub fn produced(&self, count: u64) -> Result<(), ChannelError> {
        self.0.signal(count)
    }

    /// Reports [count] new units of work, calling [on_failure] if they can't be delivered.
    pub fn produced_with(
        &self,
        count: u64,
        on_failure: impl FnOnce(ChannelError) + 'static,
    ) -> Result<(), ChannelError> {
        self.0.signal_with(count, on_failure)
    }
}

/// Learns how much work was produced.
#[derive(Debug)]
pub struct Consumer(Channel);

impl Consumer {
    /// Suspends until work was produced, then returns how much since the last call.
    pub fn consume(&mut self) -> Result<u64, Error<ChannelError>> {
        self.0.drain()
    }

    /// Hands out another producer for this consumer.
    pub fn producer(&self) -> Producer {
        Producer(self.0.notifier())
    }
}
