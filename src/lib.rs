//! Eventfd notification channels and admission control for a single-threaded io_uring runtime.
//!
//! Producers on any thread signal counts into a kernel-maintained counter,
//! a fiber on the runtime drains it without polling.
//! On top of that, [sync::limiter::Limiter] bounds how much work may be outstanding at once.
//!
//! # Examples
//!
//! ```no_run
//! use ringfence::runtime;
//! use ringfence::sync::limiter::Limiter;
//!
//! runtime::start(|| {
//!     let limiter = Limiter::new(10).unwrap();
//!
//!     for n in 0..100 {
//!         let job = limiter.next_job().unwrap(); // suspends while 10 jobs are outstanding
//!         runtime::spawn(move || {
//!             println!("processing #{n}");
//!             drop(job);
//!         });
//!     }
//!
//!     limiter.wait_for_all_outstanding().unwrap();
//! })
//! .unwrap();
//! ```

use std::io;

#[cfg(feature = "macros")]
pub use ringfence_macros::start;

pub mod concurrent_map;
pub mod runtime;
pub mod sync;
pub mod time;

/// Outcome of an operation that may be interrupted by fiber cancellation.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error<E> {
    /// The operation itself failed.
    #[error("{0}")]
    Original(#[from] E),

    /// The fiber was cancelled before the operation could finish.
    #[error("operation cancelled")]
    Cancelled,
}

impl<E> Error<E> {
    /// Converts the original error, leaving cancellation untouched.
    pub fn map<F>(self, f: impl FnOnce(E) -> F) -> Error<F> {
        match self {
            Error::Original(error) => Error::Original(f(error)),
            Error::Cancelled => Error::Cancelled,
        }
    }
}

/// Result of an operation whose only failure mode is cancellation.
pub type CancellableResult<T> = Result<T, Error<()>>;

/// Result of a cancellable I/O operation.
pub type IoResult<T> = Result<T, Error<io::Error>>;
