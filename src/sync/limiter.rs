//! Admission control for work flowing through a ringfence runtime.
//!
//! A [Limiter] hands out one [Job] per unit of work and suspends the caller of [Limiter::next_job]
//! while [Limiter::limit] jobs are outstanding. Completing a job, explicitly or by dropping it,
//! signals the limiter's eventfd from whichever thread the job ended up on.
//! The limiter drains those completions whenever a fiber has to wait for room.
//!
//! Only one fiber drains the eventfd at a time, every other waiting fiber parks until that drain finishes
//! and then re-checks its own condition. Completions coalesce, so one drain may free several slots.
//!
//! A limit of zero means unbounded.
//!
//! # Examples
//! ```no_run
//! use ringfence::runtime;
//! use ringfence::sync::Limiter;
//!
//! runtime::start(|| {
//!     let limiter = Limiter::new(2).unwrap();
//!
//!     for n in 0..10 {
//!         let mut job = limiter.next_job().unwrap(); // suspends while 2 jobs are outstanding
//!         std::thread::spawn(move || {
//!             println!("processing #{n} on another thread");
//!             job.complete();
//!         });
//!     }
//!
//!     limiter.wait_for_all_outstanding().unwrap();
//! })
//! .unwrap();
//! ```

use std::collections::VecDeque;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::notification::{Channel, Notifier};
use super::ChannelError;
use crate::runtime::{self, Waker};
use crate::Error;

/// Bounds the number of outstanding [Job]s.
///
/// Admission and draining happen on the fibers of a single runtime,
/// while jobs may complete and the limit may change from any thread.
#[derive(Debug)]
pub struct Limiter {
    channel: Channel,
    limit: AtomicU64,
    outstanding: Arc<AtomicU64>,
    /// Synthetic wakes written to the eventfd that no drain has accounted for yet.
    pending_wakes: Arc<AtomicU64>,
    waiters: Mutex<Waiters>,
}

impl Limiter {
    /// Creates a limiter admitting up to [limit] outstanding jobs, zero meaning unbounded.
    pub fn new(limit: u64) -> Result<Self, ChannelError> {
        Ok(Limiter {
            channel: Channel::new()?,
            limit: AtomicU64::new(limit),
            outstanding: Arc::new(AtomicU64::new(0)),
            pending_wakes: Arc::new(AtomicU64::new(0)),
            waiters: Mutex::new(Waiters::default()),
        })
    }

    /// The maximum number of outstanding jobs, zero meaning unbounded.
    #[inline]
    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::SeqCst)
    }

    /// The number of admitted jobs whose completion hasn't been drained yet.
    #[inline]
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Admits another job, suspending while the limit is reached.
    ///
    /// A cancelled fiber is still admitted if there's room, otherwise it gets [Error::Cancelled] and nothing is admitted.
    ///
    /// # Panics
    /// If it has to suspend outside of a fiber.
    pub fn next_job(&self) -> Result<Job, Error<ChannelError>> {
        self.wait_until(Self::has_room)?;

        let outstanding = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        log::trace!("admitted job, {outstanding} outstanding");

        Ok(Job {
            notifier: self.channel.notifier(),
            completed: false,
        })
    }

    /// Suspends until every admitted job has completed, returns immediately if none are outstanding.
    pub fn wait_for_all_outstanding(&self) -> Result<(), Error<ChannelError>> {
        self.wait_until(|limiter| limiter.outstanding() == 0)
    }

    /// Raises the limit by [by] and wakes fibers waiting for room, returning the new limit.
    ///
    /// Raising an unbounded limiter bounds it at [by].
    pub fn increase_limit(&self, by: u64) -> u64 {
        let (previous, limit) = self.update_limit(|limit| limit.saturating_add(by));
        log::debug!("limit increased from {previous} to {limit}");

        if limit != 0 {
            self.wake();
        }

        limit
    }

    /// Lowers the limit by [by], returning the new limit.
    ///
    /// A bounded limit never drops below one, since zero would lift the bound altogether.
    /// Jobs already admitted stay outstanding.
    pub fn decrease_limit(&self, by: u64) -> u64 {
        let (previous, limit) = self.update_limit(|limit| match limit {
            0 => 0,
            limit => limit.saturating_sub(by).max(1),
        });
        log::debug!("limit decreased from {previous} to {limit}");

        limit
    }

    /// Makes fibers waiting on this limiter re-check their condition, without counting as a completion.
    ///
    /// Callable from any thread.
    pub fn wake(&self) {
        self.pending_wakes.fetch_add(1, Ordering::SeqCst);

        let pending_wakes = self.pending_wakes.clone();
        let outstanding = self.outstanding.clone();
        self.channel.notifier().deliver(NonZeroU64::MIN, move |error| {
            log::warn!("lost a limiter wake: {error}");
            uncount_wake(&pending_wakes, &outstanding);
        });
    }

    /// Returns the previous and the new limit.
    fn update_limit(&self, f: impl Fn(u64) -> u64) -> (u64, u64) {
        let previous = match self
            .limit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |limit| Some(f(limit)))
        {
            Ok(previous) | Err(previous) => previous,
        };

        (previous, f(previous))
    }

    fn has_room(&self) -> bool {
        let limit = self.limit();
        limit == 0 || self.outstanding() < limit
    }

    /// Suspends until [condition] holds, draining completions in the meantime.
    ///
    /// Holds the invariant that at most one fiber drains the eventfd, the rest park until that drain is over.
    fn wait_until(&self, condition: impl Fn(&Self) -> bool) -> Result<(), Error<ChannelError>> {
        loop {
            if condition(self) {
                return Ok(());
            }

            if runtime::is_cancelled() {
                return Err(Error::Cancelled);
            }

            let is_draining = {
                let mut waiters = self.waiters();
                let is_draining = waiters.is_draining;
                waiters.is_draining = true;
                is_draining
            };

            if is_draining {
                let mut ticket = 0;
                runtime::park(|waker| ticket = self.waiters().park(waker)); // woken up by end of drain or cancellation
                self.waiters().forget(ticket);
                continue;
            }

            let result = self.collect_completions();
            self.waiters().finish_drain();
            result?;
        }
    }

    /// Drains the eventfd once, subtracting completed jobs from the outstanding count.
    fn collect_completions(&self) -> Result<u64, Error<ChannelError>> {
        let count = self.channel.drain()?;

        // whatever isn't a wake is a completion
        let wakes = match self
            .pending_wakes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |wakes| {
                Some(wakes - wakes.min(count))
            }) {
            Ok(wakes) | Err(wakes) => wakes.min(count),
        };
        let completed = count - wakes;

        if completed > 0 {
            let previous = match self
                .outstanding
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |outstanding| {
                    Some(outstanding.saturating_sub(completed))
                }) {
                Ok(previous) | Err(previous) => previous,
            };

            if completed > previous {
                log::warn!("drained {completed} completions but only {previous} jobs were outstanding");
            }
        }

        log::trace!("drained {completed} completions and {wakes} wakes");
        Ok(completed)
    }

    fn waiters(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Takes back a wake that never reached the eventfd.
///
/// If a drain already charged a real completion against it, that completion is returned to the count instead.
fn uncount_wake(pending_wakes: &AtomicU64, outstanding: &AtomicU64) {
    let uncounted = pending_wakes
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |wakes| wakes.checked_sub(1))
        .is_ok();

    if !uncounted {
        let _ = outstanding.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |outstanding| {
            outstanding.checked_sub(1)
        });
    }
}

/// Fibers waiting for the draining fiber to finish.
#[derive(Debug, Default)]
struct Waiters {
    is_draining: bool,
    next_ticket: u64,
    parked: VecDeque<(u64, Waker)>,
}

impl Waiters {
    fn park(&mut self, waker: Waker) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.parked.push_back((ticket, waker));
        ticket
    }

    /// Drops the waker of a fiber that was resumed by cancellation instead.
    fn forget(&mut self, ticket: u64) {
        self.parked.retain(|(parked, _)| *parked != ticket);
    }

    fn finish_drain(&mut self) {
        self.is_draining = false;

        for (_, waker) in self.parked.drain(..) {
            waker.schedule();
        }
    }
}

/// An admitted unit of work, outstanding until completed.
///
/// Completes on drop if it hasn't been completed yet, so early returns and panics never leak a slot.
/// May be moved to and completed on any thread.
#[derive(Debug)]
pub struct Job {
    notifier: Notifier,
    completed: bool,
}

impl Job {
    /// Marks the job as completed, logging delivery failures.
    ///
    /// Does nothing if the job is already completed.
    pub fn complete(&mut self) {
        self.complete_with(|error| log::warn!("lost a job completion: {error}"));
    }

    /// Marks the job as completed, calling [on_failure] if the limiter can't be notified.
    ///
    /// A failed notification isn't retried and the job stays completed,
    /// so the limiter's outstanding count stays one too high.
    /// Does nothing if the job is already completed.
    pub fn complete_with(&mut self, on_failure: impl FnOnce(ChannelError) + 'static) {
        if self.completed {
            return;
        }

        self.completed = true;
        self.notifier.deliver(NonZeroU64::MIN, on_failure);
    }

    /// Whether the job has been completed.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        self.complete_with(|_| {});
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fmt::Debug;
    use std::rc::Rc;
    use std::thread;
    use std::time::Duration;

    use impls::impls;
    use proptest::prelude::*;

    use super::*;
    use crate::runtime::{spawn, start, yield_now};
    use crate::time::sleep;

    /// Lets the other fibers run until they suspend.
    fn settle() {
        sleep(Duration::from_millis(20)).unwrap();
    }

    mod next_job {
        use super::*;

        #[test]
        fn admits_immediately_below_limit() {
            start(|| {
                let limiter = Limiter::new(2).unwrap();

                let _first = limiter.next_job().unwrap();
                let _second = limiter.next_job().unwrap();

                assert_eq!(limiter.outstanding(), 2);
            })
            .unwrap();
        }

        #[test]
        fn admits_without_runtime_below_limit() {
            let limiter = Limiter::new(1).unwrap();

            let job = limiter.next_job().unwrap();

            assert_eq!(limiter.outstanding(), 1);
            assert!(!job.is_completed());
        }

        #[test]
        fn unbounded_never_suspends() {
            start(|| {
                let limiter = Limiter::new(0).unwrap();

                let jobs: Vec<_> = (0..1_000).map(|_| limiter.next_job().unwrap()).collect();

                assert_eq!(limiter.outstanding(), 1_000);
                drop(jobs);
                limiter.wait_for_all_outstanding().unwrap();
            })
            .unwrap();
        }

        #[test]
        fn suspends_at_limit() {
            start(|| {
                let limiter = Rc::new(Limiter::new(1).unwrap());
                let mut first = limiter.next_job().unwrap();
                let admitted = Rc::new(Cell::new(false));

                let handle = spawn({
                    let limiter = limiter.clone();
                    let admitted = admitted.clone();
                    move || {
                        let _job = limiter.next_job().unwrap();
                        admitted.set(true);
                    }
                });

                settle();
                assert!(!admitted.get());
                assert_eq!(limiter.outstanding(), 1);

                first.complete();
                handle.join().unwrap();

                assert!(admitted.get());
            })
            .unwrap();
        }

        #[test]
        fn one_completion_admits_one_waiter() {
            start(|| {
                let limiter = Rc::new(Limiter::new(2).unwrap());
                let mut held = vec![limiter.next_job().unwrap(), limiter.next_job().unwrap()];
                let admissions = Rc::new(Channel::new().unwrap());
                let admitted = Rc::new(Cell::new(0));

                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        let limiter = limiter.clone();
                        let admissions = admissions.clone();
                        let admitted = admitted.clone();
                        spawn(move || {
                            let job = limiter.next_job().unwrap();
                            admitted.set(admitted.get() + 1);
                            admissions.signal(1).unwrap();
                            job
                        })
                    })
                    .collect();

                settle();
                assert_eq!(admitted.get(), 0);

                held.pop().unwrap().complete();
                assert_eq!(admissions.drain().unwrap(), 1);
                settle();
                assert_eq!(admitted.get(), 1);
                assert_eq!(limiter.outstanding(), 2);

                held.pop().unwrap().complete();
                assert_eq!(admissions.drain().unwrap(), 1);
                assert_eq!(admitted.get(), 2);
                assert_eq!(limiter.outstanding(), 2);

                for handle in handles {
                    drop(handle.join().unwrap());
                }
                limiter.wait_for_all_outstanding().unwrap();
                assert_eq!(limiter.outstanding(), 0);
            })
            .unwrap();
        }

        #[test]
        fn never_exceeds_limit() {
            start(|| {
                let limiter = Rc::new(Limiter::new(10).unwrap());
                let highest = Rc::new(Cell::new(0));

                for _ in 0..100 {
                    let limiter = limiter.clone();
                    let highest = highest.clone();
                    spawn(move || {
                        let mut job = limiter.next_job().unwrap();
                        highest.set(highest.get().max(limiter.outstanding()));
                        yield_now();
                        job.complete();
                    });
                }

                yield_now();
                limiter.wait_for_all_outstanding().unwrap();

                assert_eq!(limiter.outstanding(), 0);
                assert_eq!(highest.get(), 10);
            })
            .unwrap();
        }

        #[test]
        fn cancelled_waiter_isnt_admitted() {
            start(|| {
                let limiter = Rc::new(Limiter::new(1).unwrap());
                let held = limiter.next_job().unwrap();

                let handle = spawn({
                    let limiter = limiter.clone();
                    move || limiter.next_job().map(drop)
                });
                settle();

                handle.cancel();

                assert!(matches!(handle.join().unwrap(), Err(Error::Cancelled)));
                assert_eq!(limiter.outstanding(), 1);

                drop(held);
                limiter.wait_for_all_outstanding().unwrap();
            })
            .unwrap();
        }

        #[test]
        fn cancelled_parked_waiter_leaves_drainer_working() {
            start(|| {
                let limiter = Rc::new(Limiter::new(1).unwrap());
                let mut held = limiter.next_job().unwrap();

                let drainer = spawn({
                    let limiter = limiter.clone();
                    move || limiter.next_job().map(drop)
                });
                let parked = spawn({
                    let limiter = limiter.clone();
                    move || limiter.next_job().map(drop)
                });
                settle();

                parked.cancel();
                assert!(matches!(parked.join().unwrap(), Err(Error::Cancelled)));

                held.complete();
                assert!(drainer.join().unwrap().is_ok());

                limiter.wait_for_all_outstanding().unwrap();
            })
            .unwrap();
        }

        #[test]
        fn cancelled_fiber_is_admitted_if_room() {
            start(|| {
                let limiter = Limiter::new(1).unwrap();

                runtime::cancel();

                assert!(limiter.next_job().is_ok());
                assert!(matches!(limiter.next_job(), Err(Error::Cancelled)));
            })
            .unwrap();
        }
    }

    mod limit {
        use super::*;

        #[test]
        fn increase_returns_new_limit() {
            let limiter = Limiter::new(1).unwrap();

            assert_eq!(limiter.increase_limit(5), 6);
            assert_eq!(limiter.limit(), 6);
        }

        #[test]
        fn decrease_returns_new_limit() {
            let limiter = Limiter::new(6).unwrap();

            assert_eq!(limiter.decrease_limit(2), 4);
            assert_eq!(limiter.limit(), 4);
        }

        #[test]
        fn decrease_keeps_bound() {
            let limiter = Limiter::new(3).unwrap();

            assert_eq!(limiter.decrease_limit(10), 1);
        }

        #[test]
        fn increase_bounds_unbounded_limiter() {
            let limiter = Limiter::new(0).unwrap();
            let _held: Vec<_> = (0..3).map(|_| limiter.next_job().unwrap()).collect();

            assert_eq!(limiter.increase_limit(3), 3);
            assert_eq!(limiter.limit(), 3);
            assert!(!limiter.has_room());
        }

        #[test]
        fn decrease_leaves_unbounded_limiter() {
            let limiter = Limiter::new(0).unwrap();

            assert_eq!(limiter.decrease_limit(3), 0);
        }

        #[test]
        fn increase_admits_without_completion() {
            start(|| {
                let limiter = Rc::new(Limiter::new(1).unwrap());
                let held = limiter.next_job().unwrap();

                let handle = spawn({
                    let limiter = limiter.clone();
                    move || limiter.next_job().unwrap()
                });
                settle();

                limiter.increase_limit(1);
                let second = handle.join().unwrap();

                assert!(!held.is_completed());
                assert_eq!(limiter.outstanding(), 2);
                drop((held, second));
                limiter.wait_for_all_outstanding().unwrap();
            })
            .unwrap();
        }

        #[test]
        fn wakes_arent_counted_as_completions() {
            start(|| {
                let limiter = Limiter::new(2).unwrap();
                let mut first = limiter.next_job().unwrap();
                let mut second = limiter.next_job().unwrap();

                limiter.wake();
                limiter.wake();
                first.complete();
                settle();

                // drains both wakes and the single completion
                let _third = limiter.next_job().unwrap();
                assert_eq!(limiter.outstanding(), 2);

                second.complete();
            })
            .unwrap();
        }

        #[test]
        fn decrease_holds_back_admissions() {
            start(|| {
                let limiter = Rc::new(Limiter::new(3).unwrap());
                let mut held: Vec<_> = (0..2).map(|_| limiter.next_job().unwrap()).collect();

                limiter.decrease_limit(2);
                let admitted = Rc::new(Cell::new(false));
                let handle = spawn({
                    let limiter = limiter.clone();
                    let admitted = admitted.clone();
                    move || {
                        let _job = limiter.next_job().unwrap();
                        admitted.set(true);
                    }
                });

                held.pop().unwrap().complete();
                settle();
                assert!(!admitted.get());

                held.pop().unwrap().complete();
                handle.join().unwrap();
                assert!(admitted.get());
            })
            .unwrap();
        }
    }

    mod accounting {
        use super::*;

        #[test]
        fn failed_wake_is_uncounted() {
            let limiter = Limiter::new(1).unwrap();
            // a full counter can't take the wake
            limiter.channel.signal(u64::MAX - 1).unwrap();

            limiter.wake();

            assert_eq!(limiter.pending_wakes.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn failed_wake_leaves_other_wakes_pending() {
            let pending_wakes = AtomicU64::new(2);
            let outstanding = AtomicU64::new(3);

            uncount_wake(&pending_wakes, &outstanding);

            assert_eq!(pending_wakes.load(Ordering::SeqCst), 1);
            assert_eq!(outstanding.load(Ordering::SeqCst), 3);
        }

        #[test]
        fn failed_wake_returns_completion_charged_against_it() {
            // a drain already took one completion for the wake
            let pending_wakes = AtomicU64::new(0);
            let outstanding = AtomicU64::new(3);

            uncount_wake(&pending_wakes, &outstanding);

            assert_eq!(pending_wakes.load(Ordering::SeqCst), 0);
            assert_eq!(outstanding.load(Ordering::SeqCst), 2);
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn outstanding_is_admitted_minus_completed(operations in prop::collection::vec(0_u8..4, 1..60)) {
                let (outstanding, expected) = start(move || {
                    let limiter = Limiter::new(1_000).unwrap();
                    let mut held = VecDeque::new();
                    let mut threads = vec![];
                    let (mut admitted, mut completed) = (0, 0);

                    for operation in operations {
                        match operation {
                            0 => {
                                held.push_back(limiter.next_job().unwrap());
                                admitted += 1;
                            }
                            1 => {
                                if let Some(mut job) = held.pop_back() {
                                    spawn(move || job.complete());
                                    completed += 1;
                                }
                            }
                            2 => {
                                if let Some(mut job) = held.pop_front() {
                                    threads.push(thread::spawn(move || job.complete()));
                                    completed += 1;
                                }
                            }
                            _ => limiter.wake(),
                        }
                    }

                    let expected = admitted - completed;
                    limiter
                        .wait_until(|limiter| limiter.outstanding() <= expected)
                        .unwrap();
                    let outstanding = limiter.outstanding();

                    for thread in threads {
                        thread.join().unwrap();
                    }
                    drop(held);
                    limiter.wait_for_all_outstanding().unwrap();

                    (outstanding, expected)
                })
                .unwrap();

                prop_assert_eq!(outstanding, expected);
            }
        }
    }

    mod wait_for_all_outstanding {
        use super::*;

        #[test]
        fn returns_immediately_when_idle() {
            start(|| {
                let limiter = Limiter::new(3).unwrap();

                limiter.wait_for_all_outstanding().unwrap();
            })
            .unwrap();
        }

        #[test]
        fn returns_immediately_when_idle_even_if_cancelled() {
            start(|| {
                let limiter = Limiter::new(3).unwrap();

                runtime::cancel();

                assert!(limiter.wait_for_all_outstanding().is_ok());
            })
            .unwrap();
        }

        #[test]
        fn waits_for_jobs_on_other_threads() {
            start(|| {
                let limiter = Limiter::new(4).unwrap();

                for n in 0..4 {
                    let mut job = limiter.next_job().unwrap();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(n));
                        job.complete();
                    });
                }

                limiter.wait_for_all_outstanding().unwrap();

                assert_eq!(limiter.outstanding(), 0);
            })
            .unwrap();
        }

        #[test]
        fn shares_drain_with_waiting_producer() {
            start(|| {
                let limiter = Rc::new(Limiter::new(1).unwrap());
                let mut held = limiter.next_job().unwrap();

                let producer = spawn({
                    let limiter = limiter.clone();
                    move || limiter.next_job().unwrap()
                });
                let barrier = spawn({
                    let limiter = limiter.clone();
                    move || limiter.wait_for_all_outstanding().unwrap()
                });
                settle();

                held.complete();
                let mut admitted = producer.join().unwrap();
                admitted.complete();
                barrier.join().unwrap();

                assert_eq!(limiter.outstanding(), 0);
            })
            .unwrap();
        }
    }

    mod job {
        use super::*;

        #[test]
        fn completes_once() {
            start(|| {
                let limiter = Limiter::new(5).unwrap();
                let mut job = limiter.next_job().unwrap();

                job.complete();
                job.complete();
                assert!(job.is_completed());
                drop(job);

                limiter.wait_for_all_outstanding().unwrap();
                settle();

                assert_eq!(limiter.outstanding(), 0);
                assert!(!limiter.channel.is_pending());
            })
            .unwrap();
        }

        #[test]
        fn completes_on_drop() {
            start(|| {
                let limiter = Limiter::new(1).unwrap();

                let job = limiter.next_job().unwrap();
                drop(job);

                let _next = limiter.next_job().unwrap();
                assert_eq!(limiter.outstanding(), 1);
            })
            .unwrap();
        }

        #[test]
        fn completes_on_panic() {
            start(|| {
                let limiter = Rc::new(Limiter::new(1).unwrap());

                let result = spawn({
                    let limiter = limiter.clone();
                    move || {
                        let _job = limiter.next_job().unwrap();
                        panic!("work failed");
                    }
                })
                .join();
                assert!(result.is_err());

                limiter.wait_for_all_outstanding().unwrap();
            })
            .unwrap();
        }

        #[test]
        fn completes_on_another_thread() {
            start(|| {
                let limiter = Limiter::new(1).unwrap();
                let mut job = limiter.next_job().unwrap();

                thread::spawn(move || job.complete()).join().unwrap();

                assert!(limiter.channel.is_pending());
                limiter.wait_for_all_outstanding().unwrap();
            })
            .unwrap();
        }

        #[test]
        fn outlives_limiter() {
            start(|| {
                let limiter = Limiter::new(1).unwrap();
                let mut job = limiter.next_job().unwrap();

                drop(limiter);

                job.complete();
            })
            .unwrap();
        }
    }

    #[test]
    fn trait_implementations() {
        assert!(impls!(Limiter: Debug & Send & Sync & !Clone));
        assert!(impls!(Job: Debug & Send & Sync & !Clone & !Copy));
    }
}
