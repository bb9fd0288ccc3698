//! Thread local storage for the runtime.
//!
//! Every borrow of the runtime goes through this module and never spans a context switch.

use std::cell::RefCell;

/// Cache padded to avoid potential performance hit due to false sharing.
#[repr(align(128))]
struct Runtime(RefCell<Option<super::RuntimeState>>);

thread_local! {
    /// Each thread gets its own independent runtime.
    static RUNTIME: Runtime = Runtime(RefCell::new(None));
}

/// Installs [state] as this thread's runtime for the duration of [f].
///
/// # Panics
/// If this thread already runs a runtime.
pub(super) fn exclusive_runtime<T>(state: super::RuntimeState, f: impl FnOnce() -> T) -> T {
    RUNTIME.with(|thread_local| {
        let mut cell = thread_local.0.borrow_mut();
        assert!(
            cell.is_none(),
            "a ringfence runtime is already running on this thread"
        );
        *cell = Some(state);
    });

    let output = f();

    // taken out first so that destructors may look for the runtime without a double borrow
    let state = RUNTIME.with(|thread_local| thread_local.0.borrow_mut().take());
    drop(state);

    output
}

/// Borrows this thread's runtime.
///
/// # Panics
/// If there's no runtime on this thread.
pub(super) fn runtime<T>(f: impl FnOnce(&mut super::RuntimeState) -> T) -> T {
    RUNTIME.with(|thread_local| {
        let mut cell = thread_local.0.borrow_mut();
        let runtime = cell
            .as_mut()
            .expect("not running on a ringfence runtime, use runtime::start");
        f(runtime)
    })
}

/// Borrows this thread's runtime if there is one and it isn't already borrowed.
pub(super) fn try_runtime<T>(f: impl FnOnce(&mut super::RuntimeState) -> T) -> Option<T> {
    RUNTIME
        .try_with(|thread_local| {
            let mut cell = thread_local.0.try_borrow_mut().ok()?;
            cell.as_mut().map(f)
        })
        .ok()
        .flatten()
}
