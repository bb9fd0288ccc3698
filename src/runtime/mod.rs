//! Single-threaded fiber runtime driven by io_uring.
//!
//! Fibers are stackful tasks that switch cooperatively, only at suspension points ([park] and everything built on it).
//! Syscalls are queued on io_uring and the parked fiber resumes once its completion arrives.
//! Detached syscalls complete without any fiber waiting on them, their callback runs later on the runtime thread.

use std::any::Any;
use std::collections::{BTreeSet, VecDeque};
use std::num::NonZeroUsize;
use std::{cmp, hint, io, marker, mem, panic, thread};

mod context_switch;
mod stack;
mod syscall;
mod tls;

/// Settings for a runtime started with [start_with].
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of io_uring submission queue entries, clamped to what the kernel supports.
    pub ring_entries: u32,

    /// Usable memory of every fiber stack, a guard page is added below it.
    pub stack_pages: NonZeroUsize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ring_entries: 1024,
            stack_pages: NonZeroUsize::MIN.saturating_add(31),
        }
    }
}

/// Runs [f] as the root fiber of a new runtime on the current thread, using the default [Config].
///
/// Returns once the root fiber, all of its descendants, and all detached syscalls have completed.
///
/// # Panics
/// If the current thread is already running a runtime.
pub fn start<F: FnOnce() -> T, T>(f: F) -> thread::Result<T> {
    start_with(&Config::default(), f)
}

/// Runs [f] as the root fiber of a new runtime on the current thread.
///
/// # Panics
/// If the current thread is already running a runtime, or io_uring can't be set up.
pub fn start_with<F: FnOnce() -> T, T>(config: &Config, f: F) -> thread::Result<T> {
    let state = RuntimeState::new(config).expect("failed to set up io_uring");

    tls::exclusive_runtime(state, || {
        let (original, root) = tls::runtime(|runtime| {
            let root_fiber = runtime.create_fiber(f, start_trampoline::<F, T>, false);
            runtime.running_fiber = Some(root_fiber);

            (
                runtime.original.as_mut_ptr(),
                &runtime.running().continuation as *const context_switch::Continuation,
            )
        });

        unsafe { context_switch::jump(original, root) };
        tls::runtime(|rt| unsafe { rt.running().base().union_ref::<thread::Result<T>>().read() })
    })
}

extern "C" fn start_trampoline<F: FnOnce() -> T, T>() -> ! {
    // execute closure
    let closure: F = tls::runtime(|rt| unsafe { rt.running().base().union_ref::<F>().read() });
    let result = panic::catch_unwind(panic::AssertUnwindSafe(closure));
    hint::black_box(&result); // removing this causes a segfault in release mode

    tls::runtime(|runtime| {
        let fiber = runtime.running();
        fiber.is_completed = true;
        fiber.is_cancelled = true; // prevent cancel scheduling while waiting for children
        unsafe { fiber.base().union_mut::<thread::Result<T>>().write(result) };
    });

    // wait for children
    if tls::runtime(|rt| !rt.running().children.is_empty()) {
        park(|_| {}); // woken up by last child
    }

    // wait for detached syscalls, their callbacks may issue more
    loop {
        run_detached_callbacks();

        if tls::runtime(|rt| rt.detached.is_empty()) {
            break;
        }

        park(|waker| tls::runtime(|rt| rt.detached_drained = Some(waker))); // woken up by last detached completion
    }

    // return to original thread
    let mut dummy = mem::MaybeUninit::uninit();
    let original = tls::runtime(|runtime| runtime.original.as_ptr());
    unsafe { context_switch::jump(dummy.as_mut_ptr(), original) };
    unreachable!();
}

type DetachedCallback = Box<dyn FnOnce(io::Result<u32>)>;

struct RuntimeState {
    kernel: syscall::Interface, // dropped first, the kernel may still reference detached buffers
    fibers: slab::Slab<FiberState>,
    ready_fibers: VecDeque<FiberIndex>,
    running_fiber: Option<FiberIndex>,
    stack_pool: Vec<stack::Stack>,
    stack_pages: NonZeroUsize,
    detached: slab::Slab<DetachedCallback>,
    finished_detached: Vec<(DetachedCallback, io::Result<u32>)>,
    detached_drained: Option<Waker>,
    original: mem::MaybeUninit<context_switch::Continuation>,
}

impl RuntimeState {
    fn new(config: &Config) -> io::Result<Self> {
        Ok(RuntimeState {
            kernel: syscall::Interface::new(config.ring_entries)?,
            fibers: slab::Slab::new(),
            ready_fibers: VecDeque::new(),
            running_fiber: None,
            stack_pool: Vec::new(),
            stack_pages: config.stack_pages,
            detached: slab::Slab::new(),
            finished_detached: Vec::new(),
            detached_drained: None,
            original: mem::MaybeUninit::uninit(),
        })
    }

    fn create_fiber<F: FnOnce() -> T, T>(
        &mut self,
        f: F,
        trampoline: extern "C" fn() -> !,
        is_cancelled: bool,
    ) -> FiberIndex {
        let stack = match self.stack_pool.pop() {
            Some(stack) => stack,
            None => stack::Stack::new(NonZeroUsize::MIN, self.stack_pages)
                .expect("failed to allocate a fiber stack"),
        };

        let base = StackBase(stack.base());
        unsafe { base.union_mut::<F>().write(f) };
        let continuation =
            unsafe { context_switch::prepare_stack(base.after_union::<F, T>(), trampoline) };

        let index = self.fibers.insert(FiberState {
            stack,
            continuation,
            join_handle: JoinHandleState::Unused,
            parent: None,
            children: BTreeSet::new(),
            syscall_result: None,
            is_completed: false,
            is_cancelled,
        });

        FiberIndex(index)
    }

    fn running(&mut self) -> &mut FiberState {
        let fiber_index = self
            .running_fiber
            .expect("not running inside a ringfence fiber");
        &mut self.fibers[fiber_index.0]
    }

    /// Removes a completed fiber, keeping its stack for the next spawn.
    fn release_fiber(&mut self, fiber: FiberIndex) {
        let state = self.fibers.remove(fiber.0);
        self.stack_pool.push(state.stack);
    }

    fn process_io(&mut self) -> *const context_switch::Continuation {
        loop {
            for (id, result) in self.kernel.process_completed() {
                match id.detached_key() {
                    Some(key) => self.finish_detached(key, result),
                    None => {
                        let fiber = FiberIndex(id.0 as usize);
                        self.fibers[fiber.0].syscall_result = Some(result);
                        Waker(fiber).schedule_with(self);
                    }
                }
            }

            if let Some(fiber) = self.ready_fibers.pop_front() {
                self.running_fiber = Some(fiber);
                break &self.fibers[fiber.0].continuation as *const context_switch::Continuation;
            }

            self.kernel.wait_for_completed();
        }
    }

    /// Queues the detached callback, it runs once some fiber resumes.
    fn finish_detached(&mut self, key: usize, result: i32) {
        let callback = self.detached.remove(key);
        self.finished_detached.push((callback, into_io_result(result)));

        if self.detached.is_empty() {
            if let Some(waker) = self.detached_drained.take() {
                waker.schedule_with(self);
            }
        }
    }

    fn cancel(&mut self, root: FiberIndex) {
        if !self.fibers[root.0].is_cancelled && Some(root) != self.running_fiber {
            Waker(root).schedule_with(self);
        }

        self.fibers[root.0].is_cancelled = true;

        for child in self.fibers[root.0].children.clone() {
            self.cancel(child);
        }
    }

    // TODO: is_contained flag
    fn nearest_contained(&self, _fiber: FiberIndex) -> FiberIndex {
        FiberIndex(0)
    }
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FiberIndex(usize);

#[derive(Debug)]
struct FiberState {
    stack: stack::Stack,
    continuation: context_switch::Continuation,
    join_handle: JoinHandleState,
    parent: Option<FiberIndex>,
    children: BTreeSet<FiberIndex>,
    syscall_result: Option<i32>,
    is_completed: bool,
    is_cancelled: bool,
}

impl FiberState {
    fn base(&self) -> StackBase {
        StackBase(self.stack.base())
    }
}

#[derive(Debug)]
enum JoinHandleState {
    Unused,
    Waiting(Option<Waker>), // option for taking ownership from mutable reference
    Dropped,
}

/// Upper address of a fiber's stack memory, stack addresses grow downwards.
/// The union of the user's closure and its output is stored at the top of the stack to save space in [FiberState].
#[derive(Debug, Copy, Clone)]
struct StackBase(*mut u8);

impl StackBase {
    unsafe fn union_ref<U>(&self) -> *const U {
        (self.0 as *const U).sub(1)
    }

    unsafe fn union_mut<U>(&self) -> *mut U {
        (self.0 as *mut U).sub(1)
    }

    /// Where the call stack starts, right below the union.
    unsafe fn after_union<F, T>(&self) -> *mut u8 {
        let union_size = cmp::max(mem::size_of::<F>(), mem::size_of::<thread::Result<T>>());
        self.0.sub(union_size)
    }
}

/// Spawns a new fiber, returning a [JoinHandle] for it.
///
/// The child inherits the cancellation of its parent, and the parent doesn't complete until all its children do.
pub fn spawn<F: FnOnce() -> T + 'static, T: 'static>(f: F) -> JoinHandle<T> {
    let child_fiber = tls::runtime(|runtime| {
        let is_cancelled = runtime.running().is_cancelled;
        let child_fiber = runtime.create_fiber(f, spawn_trampoline::<F, T>, is_cancelled);
        runtime.ready_fibers.push_back(child_fiber);

        // parent child relationship
        runtime.running().children.insert(child_fiber);
        runtime.fibers[child_fiber.0].parent = runtime.running_fiber;

        child_fiber
    });

    JoinHandle::new(child_fiber)
}

extern "C" fn spawn_trampoline<F: FnOnce() -> T, T>() -> ! {
    run_detached_callbacks();

    // execute closure
    let closure: F = tls::runtime(|rt| unsafe { rt.running().base().union_ref::<F>().read() });
    let result = panic::catch_unwind(panic::AssertUnwindSafe(closure));
    hint::black_box(&result); // removing this causes a segfault in release mode
    let result_is_error = result.is_err();

    tls::runtime(|runtime| {
        let fiber = runtime.running();

        fiber.is_completed = true;
        fiber.is_cancelled = true; // prevent cancel scheduling while waiting for children
        unsafe { fiber.base().union_mut::<thread::Result<T>>().write(result) };
    });

    // wait for children
    if tls::runtime(|rt| !rt.running().children.is_empty()) {
        park(|_| {}); // woken up by last child
    }

    // schedule joining fiber
    tls::runtime(|runtime| {
        if let JoinHandleState::Waiting(waker) = &mut runtime.running().join_handle {
            if let Some(waker) = waker.take() {
                waker.schedule_with(runtime);
            }
        } else if result_is_error {
            let running = runtime.running_fiber.expect("fiber is running");
            let nearest_contained = runtime.nearest_contained(running);
            runtime.cancel(nearest_contained);
        }
    });

    // cleanup parent
    tls::runtime(|runtime| {
        let running = runtime.running_fiber.expect("fiber is running");
        let parent_index = runtime.fibers[running.0]
            .parent
            .expect("spawned fibers have a parent");
        let parent = &mut runtime.fibers[parent_index.0];

        parent.children.remove(&running);

        if parent.is_completed && parent.children.is_empty() {
            Waker(parent_index).schedule_with(runtime);
        }
    });

    // deallocate stack, it stays mapped in the pool until this fiber jumps away
    tls::runtime(|runtime| {
        if let JoinHandleState::Dropped = runtime.running().join_handle {
            let running = runtime.running_fiber.expect("fiber is running");
            runtime.release_fiber(running);
        }
    });

    // continue to next fiber
    let mut dummy = mem::MaybeUninit::uninit();
    let next = tls::runtime(|runtime| runtime.process_io());
    unsafe { context_switch::jump(dummy.as_mut_ptr(), next) };
    unreachable!()
}

/// Handle for joining or cancelling a fiber.
#[derive(Debug)]
pub struct JoinHandle<T> {
    fiber: FiberIndex,
    output: marker::PhantomData<T>,
}

impl<T> JoinHandle<T> {
    fn new(fiber: FiberIndex) -> Self {
        JoinHandle {
            fiber,
            output: marker::PhantomData,
        }
    }

    /// Waits for the fiber to complete, returning its output or panic payload.
    ///
    /// If the joining fiber is cancelled, returns [crate::Error::Cancelled] unless the joined fiber is also cancelled,
    /// in which case it keeps waiting for the output.
    pub fn join(self) -> Result<T, crate::Error<Box<dyn Any + Send + 'static>>> {
        if tls::runtime(|rt| rt.fibers[self.fiber.0].is_completed) {
            return self.read_output();
        }

        if is_cancelled() && !tls::runtime(|rt| rt.fibers[self.fiber.0].is_cancelled) {
            return Err(crate::Error::Cancelled);
        }

        park(|waker| {
            tls::runtime(|runtime| {
                let fiber = &mut runtime.fibers[self.fiber.0];
                assert!(!fiber.is_completed);
                fiber.join_handle = JoinHandleState::Waiting(Some(waker));
            });
        }); // woken up by completion or cancellation

        if tls::runtime(|rt| rt.fibers[self.fiber.0].is_completed) {
            return self.read_output();
        }

        assert!(is_cancelled());
        if !tls::runtime(|rt| rt.fibers[self.fiber.0].is_cancelled) {
            return Err(crate::Error::Cancelled);
        }
        park(|_| {}); // woken up by completion

        self.read_output()
    }

    fn read_output(self) -> Result<T, crate::Error<Box<dyn Any + Send>>> {
        let result = tls::runtime(|runtime| {
            let fiber = &runtime.fibers[self.fiber.0];
            unsafe { fiber.base().union_ref::<thread::Result<T>>().read() }
        });

        result.map_err(crate::Error::Original)
    }

    /// Cancels the fiber and its descendants.
    pub fn cancel(&self) {
        tls::runtime(|runtime| {
            runtime.cancel(self.fiber);
        })
    }

    /// Cancels the nearest contained ancestor of the fiber, along with all of its descendants.
    pub fn cancel_propagating(&self) {
        tls::runtime(|runtime| {
            let nearest_contained = runtime.nearest_contained(self.fiber);
            runtime.cancel(nearest_contained);
        })
    }
}

impl<T> Drop for JoinHandle<T> {
    fn drop(&mut self) {
        tls::runtime(|runtime| {
            runtime.fibers[self.fiber.0].join_handle = JoinHandleState::Dropped;

            if runtime.fibers[self.fiber.0].is_completed {
                runtime.release_fiber(self.fiber);
            }
        });
    }
}

/// Suspends the running fiber until the [Waker] handed to [schedule] is used.
///
/// Cancellation of the fiber also resumes it, check [is_cancelled] after parking.
pub fn park(schedule: impl FnOnce(Waker)) {
    let running = tls::runtime(|runtime| {
        runtime
            .running_fiber
            .expect("not running inside a ringfence fiber")
    });

    schedule(Waker(running));

    // continue to next fiber
    let (running, next) = tls::runtime(|runtime| {
        (
            &mut runtime.running().continuation as *mut context_switch::Continuation,
            runtime.process_io(),
        )
    });
    unsafe { context_switch::jump(running, next) };

    run_detached_callbacks();
}

/// Handle for scheduling a parked fiber.
///
/// Only meaningful on the thread of the runtime that handed it out.
#[repr(transparent)]
#[derive(Debug)]
pub struct Waker(FiberIndex);

impl Waker {
    /// Wake up the parked fiber to be run at some point.
    pub fn schedule(self) {
        tls::runtime(|runtime| {
            self.schedule_with(runtime);
        });
    }

    fn schedule_with(self, runtime: &mut RuntimeState) {
        // FIXME: slow
        if !runtime.ready_fibers.contains(&self.0) {
            runtime.ready_fibers.push_back(self.0);
        }
    }
}

/// Lets every other ready fiber run before continuing.
pub fn yield_now() {
    park(|waker| waker.schedule());
}

/// Cancels the running fiber and its descendants.
pub fn cancel() {
    tls::runtime(|runtime| {
        let running = runtime.running_fiber.expect("fiber is running");
        runtime.cancel(running);
    })
}

/// Cancels the nearest contained ancestor of the running fiber.
pub fn cancel_propagating() {
    tls::runtime(|runtime| {
        let running = runtime.running_fiber.expect("fiber is running");
        let nearest_contained = runtime.nearest_contained(running);
        runtime.cancel(nearest_contained);
    })
}

/// Whether the running fiber has been cancelled.
pub fn is_cancelled() -> bool {
    tls::runtime(|runtime| runtime.running().is_cancelled)
}

/// Issues [sqe] and parks the running fiber until it completes.
pub(crate) fn syscall(sqe: io_uring::squeue::Entry) -> crate::IoResult<u32> {
    if is_cancelled() {
        return Err(crate::Error::Cancelled);
    }

    let syscall_id = tls::runtime(|runtime| {
        let fiber = runtime.running_fiber.expect("fiber is running");
        assert!(runtime.fibers[fiber.0].syscall_result.is_none());

        let syscall_id = syscall::Id::fiber(fiber.0);
        runtime.kernel.issue(syscall_id, sqe);
        syscall_id
    });

    park(|_| {}); // woken up by CQE or cancellation

    if tls::runtime(|rt| rt.running().syscall_result.is_some()) {
        return read_syscall_result();
    }

    assert!(is_cancelled());
    tls::runtime(|rt| rt.kernel.cancel(syscall_id));
    park(|_| {}); // woken up by CQE

    read_syscall_result()
}

fn read_syscall_result() -> crate::IoResult<u32> {
    let result = tls::runtime(|rt| rt.running().syscall_result.take())
        .expect("woken up by a completion");

    into_io_result(result).map_err(|error| match error.raw_os_error() {
        Some(libc::ECANCELED) => crate::Error::Cancelled,
        _ => crate::Error::Original(error),
    })
}

/// Issues [sqe] without parking, [on_complete] later runs on this thread with the syscall's result.
///
/// Hands [on_complete] back if the current thread doesn't run a runtime (or is busy inside it).
/// Whatever [sqe] points to must be kept alive by [on_complete].
pub(crate) fn submit_detached<C>(sqe: io_uring::squeue::Entry, on_complete: C) -> Result<(), C>
where
    C: FnOnce(io::Result<u32>) + 'static,
{
    if tls::try_runtime(|_| ()).is_none() {
        return Err(on_complete);
    }

    tls::runtime(|runtime| {
        let key = runtime.detached.insert(Box::new(on_complete));
        runtime.kernel.issue(syscall::Id::detached(key), sqe);
    });

    Ok(())
}

fn run_detached_callbacks() {
    let finished = tls::runtime(|runtime| mem::take(&mut runtime.finished_detached));

    for (callback, result) in finished {
        callback(result);
    }
}

fn into_io_result(result: i32) -> io::Result<u32> {
    if result >= 0 {
        Ok(result as u32)
    } else {
        Err(io::Error::from_raw_os_error(-result))
    }
}
