//! Thread lifecycle management for the Strand kernel.
//!
//! [`Thread`] wraps one native execution context in a
//! `NotStarted -> Running -> Finished` state machine with cross-thread-safe
//! `start`/`wait`/`exit`/`terminate` operations. The unit of work is an
//! injected closure rather than a subclass override; inside it, the body may
//! call [`exec`](Thread::exec) any number of times to pump the thread's own
//! event loop, and other threads may [`post`](Thread::post) callables or
//! request an exit at any point.
//!
//! # Example
//!
//! ```no_run
//! use strand_core::Thread;
//!
//! let thread = Thread::new(|thread| {
//!     // Pump posted callables until someone calls quit()/exit().
//!     let code = thread.exec();
//!     println!("loop finished with {code}");
//! });
//!
//! thread.start().expect("spawn failed");
//! thread.quit();
//! assert!(thread.wait());
//! ```
//!
//! # Termination
//!
//! [`terminate`](Thread::terminate) is a last resort: it skips the body's
//! ordinary cleanup. A thread can protect a critical section by disabling
//! termination; a request received while disabled stays pending and is
//! applied the moment the thread re-enables termination. See
//! [`set_termination_enabled`](Thread::set_termination_enabled).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use static_assertions::assert_impl_all;

use crate::error::ThreadError;
use crate::event_loop::{EventLoop, TerminationRequest};
use crate::logging::targets;
use crate::registry;
use crate::signal::{ConnectionId, Signal};

/// Default name for kernel threads.
const DEFAULT_THREAD_NAME: &str = "strand-thread";

/// Lifecycle state of a [`Thread`].
///
/// Transitions are monotonic and irreversible per instance:
/// `NotStarted -> Running -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// `start()` has not been called (or spawning failed).
    NotStarted,
    /// The native context is executing the body.
    Running,
    /// The body returned, panicked, or the thread was terminated.
    Finished,
}

/// Scheduling priority hint for a [`Thread`].
///
/// Priorities are best-effort hints, not enforced guarantees. `Inherit` is
/// the default: no explicit priority, the thread keeps whatever the spawning
/// context had. The value round-trips exactly while the thread is `Running`
/// and reads as `Inherit` before start and after finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Scheduled only when no other thread is runnable.
    Idle,
    /// Scheduled less often than `Low`.
    Lowest,
    /// Scheduled less often than `Normal`.
    Low,
    /// Default OS priority.
    Normal,
    /// Scheduled more often than `Normal`.
    High,
    /// Scheduled more often than `High`.
    Highest,
    /// Scheduled as often as possible.
    TimeCritical,
    /// Inherit the spawning context's priority.
    #[default]
    Inherit,
}

/// Tri-state latch capturing an exit request issued while no loop activation
/// is active, so a request racing loop entry is neither lost nor
/// double-applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitLatch {
    /// No outstanding request.
    NoRequest,
    /// An exit was requested; the next `exec()` returns this code at entry.
    Pending(i32),
    /// The latched request was consumed by an `exec()`.
    Consumed,
}

/// The boxed unit of work.
type BoxedBody = Box<dyn FnOnce(&Thread) + Send + 'static>;

/// State guarded by the per-thread mutex.
#[derive(Debug)]
struct StateData {
    state: ThreadState,
    priority: Priority,
    /// Stack size hint in bytes; 0 means platform default.
    stack_size: usize,
    termination_enabled: bool,
    /// A terminate() arrived while termination was disabled.
    terminate_pending: bool,
    /// terminate() was applied; any event pump on this context must unwind.
    cancelled: bool,
    exit_latch: ExitLatch,
    /// Native identifier, assigned at spawn (or adoption).
    native_id: Option<ThreadId>,
}

/// Shared state behind a [`Thread`] handle.
pub(crate) struct ThreadInner {
    name: String,
    state: Mutex<StateData>,
    /// Signalled on the `Running -> Finished` transition.
    state_changed: Condvar,
    event_loop: EventLoop,
    started: Signal,
    finished: Signal,
    /// Taken by the entry shim when the native context starts.
    body: Mutex<Option<BoxedBody>>,
    /// Joinable handle; taken by the first successful `wait()`, or dropped
    /// (detached) on forced termination.
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Ensures the finish sequence runs at most once.
    finish_once: AtomicBool,
}

/// An owned handle to one native execution context with an embedded,
/// nestable event loop.
///
/// `Thread` is a cheap clone; all clones refer to the same underlying
/// thread. Handles compare equal when they refer to the same thread.
///
/// # Thread Safety
///
/// `start`, `wait`, `exit`/`quit`, `terminate`, `post`, the state getters and
/// the priority accessors are callable from any thread. `exec` and
/// `set_termination_enabled` must be called from the thread's own body.
#[derive(Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

assert_impl_all!(Thread: Send, Sync, Clone);

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Thread {}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for creating [`Thread`]s with a custom name or stack size.
#[derive(Debug)]
pub struct ThreadBuilder {
    name: String,
    stack_size: usize,
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self {
            name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: 0,
        }
    }
}

impl ThreadBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the native thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the stack size hint in bytes. `0` defers to the platform default.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Build a thread around the given body.
    ///
    /// The thread does not run until [`Thread::start`] is called.
    pub fn build<F>(self, body: F) -> Thread
    where
        F: FnOnce(&Thread) + Send + 'static,
    {
        Thread {
            inner: Arc::new(ThreadInner {
                name: self.name,
                state: Mutex::new(StateData {
                    state: ThreadState::NotStarted,
                    priority: Priority::Inherit,
                    stack_size: self.stack_size,
                    termination_enabled: true,
                    terminate_pending: false,
                    cancelled: false,
                    exit_latch: ExitLatch::NoRequest,
                    native_id: None,
                }),
                state_changed: Condvar::new(),
                event_loop: EventLoop::new(),
                started: Signal::new(),
                finished: Signal::new(),
                body: Mutex::new(Some(Box::new(body))),
                handle: Mutex::new(None),
                finish_once: AtomicBool::new(false),
            }),
        }
    }
}

impl Thread {
    /// Create a thread around the given body with default settings.
    ///
    /// Equivalent to `Thread::builder().build(body)`.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&Thread) + Send + 'static,
    {
        ThreadBuilder::new().build(body)
    }

    /// Create a [`ThreadBuilder`] for custom configuration.
    pub fn builder() -> ThreadBuilder {
        ThreadBuilder::new()
    }

    /// Internal constructor for contexts the kernel did not spawn.
    ///
    /// The adopted thread reads as `Running` with no body and no joinable
    /// handle; it exists so `Thread::current()` works everywhere.
    pub(crate) fn adopt() -> Self {
        let current = thread::current();
        Self {
            inner: Arc::new(ThreadInner {
                name: current.name().unwrap_or("adopted").to_string(),
                state: Mutex::new(StateData {
                    state: ThreadState::Running,
                    priority: Priority::Inherit,
                    stack_size: 0,
                    termination_enabled: true,
                    terminate_pending: false,
                    cancelled: false,
                    exit_latch: ExitLatch::NoRequest,
                    native_id: Some(current.id()),
                }),
                state_changed: Condvar::new(),
                event_loop: EventLoop::new(),
                started: Signal::new(),
                finished: Signal::new(),
                body: Mutex::new(None),
                handle: Mutex::new(None),
                finish_once: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ThreadInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ThreadInner> {
        Arc::downgrade(&self.inner)
    }

    /// The thread's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The native identifier, assigned at spawn. `None` before `start()`.
    pub fn id(&self) -> Option<ThreadId> {
        self.inner.state.lock().native_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ThreadState {
        self.inner.state.lock().state
    }

    /// Whether the thread is currently running.
    pub fn is_running(&self) -> bool {
        self.state() == ThreadState::Running
    }

    /// Whether the thread has finished.
    pub fn is_finished(&self) -> bool {
        self.state() == ThreadState::Finished
    }

    /// Start the thread with an inherited priority.
    ///
    /// See [`start_with_priority`](Self::start_with_priority).
    pub fn start(&self) -> Result<(), ThreadError> {
        self.start_with_priority(Priority::Inherit)
    }

    /// Spawn the native execution context and run the body on it.
    ///
    /// Returns immediately. On success the thread is observably `Running`
    /// before this returns, and the started signal fires on the new context
    /// before the body's first side effect. Calling `start` on a thread that
    /// is already running, or has finished, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadError::Spawn`] if the native context could not be
    /// created; the thread then remains `NotStarted`.
    pub fn start_with_priority(&self, priority: Priority) -> Result<(), ThreadError> {
        let mut st = self.inner.state.lock();
        if st.state != ThreadState::NotStarted {
            tracing::debug!(
                target: targets::THREAD,
                name = %self.inner.name,
                state = ?st.state,
                "start() ignored; thread already started"
            );
            return Ok(());
        }

        let mut builder = thread::Builder::new().name(self.inner.name.clone());
        if st.stack_size > 0 {
            builder = builder.stack_size(st.stack_size);
        }

        let entry_handle = self.clone();
        let handle = builder
            .spawn(move || thread_entry(entry_handle))
            .map_err(ThreadError::Spawn)?;

        // Publish under the state lock; the entry shim synchronizes on this
        // same lock before it touches anything, so the spawned context cannot
        // observe a half-initialized handle.
        st.state = ThreadState::Running;
        st.priority = priority;
        st.native_id = Some(handle.thread().id());
        *self.inner.handle.lock() = Some(handle);

        tracing::debug!(
            target: targets::THREAD,
            name = %self.inner.name,
            ?priority,
            "thread started"
        );
        Ok(())
    }

    /// Enter the event loop and pump it until stopped.
    ///
    /// Processes posted callables and fired timers in arrival order until
    /// [`quit`](Self::quit)/[`exit`](Self::exit) stops this activation.
    /// An exit request latched before entry is consumed immediately: `exec`
    /// then returns the latched code without processing other queued work.
    ///
    /// `exec` may be nested; a stop request only ever terminates the
    /// innermost activation.
    ///
    /// # Panics
    ///
    /// Panics when called from a context that does not own this thread's
    /// event loop.
    pub fn exec(&self) -> i32 {
        let current = thread::current().id();
        let index = {
            let mut st = self.inner.state.lock();
            if st.native_id != Some(current) {
                drop(st);
                panic!(
                    "exec() called from a thread that does not own this event loop \
                     (thread {:?}, owner {:?}); the loop may only be pumped by its own thread",
                    current,
                    self.id()
                );
            }
            if let ExitLatch::Pending(code) = st.exit_latch {
                st.exit_latch = ExitLatch::Consumed;
                tracing::trace!(
                    target: targets::THREAD,
                    name = %self.inner.name,
                    code,
                    "exec() consumed latched exit request"
                );
                return code;
            }
            self.inner.event_loop.enter()
        };

        self.inner
            .event_loop
            .pump(index, || self.inner.state.lock().cancelled);
        self.inner.event_loop.leave(index)
    }

    /// Ask the innermost active event loop activation to stop with code 0.
    ///
    /// Equivalent to `exit(0)`.
    pub fn quit(&self) {
        self.exit(0);
    }

    /// Ask the innermost active event loop activation to stop with `code`.
    ///
    /// Thread-safe. If no activation is active yet, the request is latched
    /// and the next `exec()` returns `code` at entry, so a request issued
    /// between `start()` and the first `exec()` is not lost.
    pub fn exit(&self, code: i32) {
        let mut st = self.inner.state.lock();
        if self.inner.event_loop.request_stop(code) {
            tracing::trace!(
                target: targets::THREAD,
                name = %self.inner.name,
                code,
                "exit: stopping innermost activation"
            );
        } else {
            st.exit_latch = ExitLatch::Pending(code);
            tracing::trace!(
                target: targets::THREAD,
                name = %self.inner.name,
                code,
                "exit: no active loop, request latched"
            );
        }
    }

    /// Enqueue a callable into this thread's event loop queue.
    ///
    /// The callable runs on this thread, inside one of its `exec()`
    /// activations, preserving thread affinity for whatever state it touches.
    pub fn post<F>(&self, callable: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.event_loop.post(Box::new(callable));
    }

    /// Block until the thread has finished.
    ///
    /// Returns `true` once the thread is `Finished` (including when it
    /// already was, or was never started). Waiting on the current thread is
    /// a programming error; it is diagnosed and returns `false`.
    pub fn wait(&self) -> bool {
        self.wait_impl(None)
    }

    /// Block until the thread has finished or the timeout elapses.
    ///
    /// Returns whether the thread finished. A `false` return has no side
    /// effect; the thread keeps running and can be waited on again.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_impl(Some(timeout))
    }

    fn wait_impl(&self, timeout: Option<Duration>) -> bool {
        if self.id() == Some(thread::current().id()) {
            tracing::warn!(
                target: targets::THREAD,
                name = %self.inner.name,
                "thread attempted to wait on itself"
            );
            return false;
        }

        {
            let mut st = self.inner.state.lock();
            if st.state == ThreadState::NotStarted {
                // Nothing to wait for.
                return true;
            }
            let deadline = timeout.map(|t| Instant::now() + t);
            while st.state != ThreadState::Finished {
                match deadline {
                    None => self.inner.state_changed.wait(&mut st),
                    Some(deadline) => {
                        let result = self.inner.state_changed.wait_until(&mut st, deadline);
                        if result.timed_out() && st.state != ThreadState::Finished {
                            return false;
                        }
                    }
                }
            }
        }

        // Reap the native handle; later waiters see None and skip this.
        if let Some(handle) = self.inner.handle.lock().take() {
            let _ = handle.join();
        }
        true
    }

    /// Forcibly cancel the thread.
    ///
    /// This skips the body's ordinary cleanup and is documented as a last
    /// resort. If termination is currently disabled for the thread, the
    /// request stays pending and is applied the moment the thread re-enables
    /// termination; a thread that finishes normally first drops the request.
    ///
    /// After a forced termination the thread is observably `Finished`:
    /// finished listeners have fired (on the calling thread, in this one
    /// case), `wait()` returns `true`, and any event pump on the doomed
    /// context unwinds at its next scheduling point. Calling `terminate` on
    /// a thread that is not running is a no-op.
    pub fn terminate(&self) {
        let mut st = self.inner.state.lock();
        if st.state != ThreadState::Running {
            tracing::debug!(
                target: targets::THREAD,
                name = %self.inner.name,
                state = ?st.state,
                "terminate() ignored; thread not running"
            );
            return;
        }
        if !st.termination_enabled {
            st.terminate_pending = true;
            tracing::debug!(
                target: targets::THREAD,
                name = %self.inner.name,
                "termination disabled; request queued"
            );
            return;
        }
        st.cancelled = true;
        drop(st);

        tracing::warn!(
            target: targets::THREAD,
            name = %self.inner.name,
            "terminating thread; body cleanup is skipped"
        );
        // Unblock a pump waiting on an empty queue so it observes the cancel
        // flag promptly.
        self.inner.event_loop.wake();
        // Detach the native handle; the context may run briefly past this
        // point but the thread is observably finished now.
        let _ = self.inner.handle.lock().take();
        self.inner.finish();
    }

    /// Enable or disable [`terminate`](Self::terminate) for this thread.
    ///
    /// Must be called from the thread's own body; it lets the body protect a
    /// critical section from forced termination. Re-enabling termination
    /// applies a pending request immediately: this call then does not return,
    /// the thread unwinds, transitions to `Finished` and fires the finished
    /// signal.
    ///
    /// # Panics
    ///
    /// Panics when called from any other thread.
    pub fn set_termination_enabled(&self, enabled: bool) {
        let current = thread::current().id();
        let mut st = self.inner.state.lock();
        if st.native_id != Some(current) {
            drop(st);
            panic!(
                "set_termination_enabled() called from a foreign thread ({:?}); \
                 it may only be called from the thread's own body",
                current
            );
        }
        st.termination_enabled = enabled;
        if enabled && st.terminate_pending {
            st.terminate_pending = false;
            st.cancelled = true;
            drop(st);
            tracing::debug!(
                target: targets::THREAD,
                name = %self.inner.name,
                "applying queued termination request"
            );
            std::panic::panic_any(TerminationRequest);
        }
    }

    /// Set the scheduling priority hint.
    ///
    /// Only has an effect while the thread is `Running`; calls before start
    /// or after finish are ignored. The priority is a best-effort hint, not
    /// an enforced guarantee.
    pub fn set_priority(&self, priority: Priority) {
        let mut st = self.inner.state.lock();
        if st.state == ThreadState::Running {
            st.priority = priority;
            tracing::trace!(
                target: targets::THREAD,
                name = %self.inner.name,
                ?priority,
                "priority updated"
            );
        } else {
            tracing::debug!(
                target: targets::THREAD,
                name = %self.inner.name,
                ?priority,
                "priority hint ignored; thread not running"
            );
        }
    }

    /// The current priority.
    ///
    /// Reports `Inherit` unless the thread is `Running`, in which case the
    /// last value passed to [`set_priority`](Self::set_priority) (or to
    /// [`start_with_priority`](Self::start_with_priority)) is returned.
    pub fn priority(&self) -> Priority {
        let st = self.inner.state.lock();
        if st.state == ThreadState::Running {
            st.priority
        } else {
            Priority::Inherit
        }
    }

    /// Set the stack size hint in bytes. `0` defers to the platform default.
    ///
    /// Only settable while the thread is `NotStarted`; later calls are
    /// diagnosed and ignored.
    pub fn set_stack_size(&self, size: usize) {
        let mut st = self.inner.state.lock();
        if st.state == ThreadState::NotStarted {
            st.stack_size = size;
        } else {
            tracing::warn!(
                target: targets::THREAD,
                name = %self.inner.name,
                size,
                "set_stack_size() ignored; thread already started"
            );
        }
    }

    /// The stack size hint in bytes; `0` means platform default.
    pub fn stack_size(&self) -> usize {
        self.inner.state.lock().stack_size
    }

    /// Connect a listener fired once when the thread transitions to
    /// `Running`, on the new thread, before the body runs.
    ///
    /// Listeners connected after the transition are never retroactively
    /// invoked; connect before `start()` to observe the signal
    /// deterministically.
    pub fn connect_started<F>(&self, listener: F) -> ConnectionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.started.connect(listener)
    }

    /// Connect a listener fired once when the thread transitions to
    /// `Finished`, on the finishing thread.
    pub fn connect_finished<F>(&self, listener: F) -> ConnectionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.finished.connect(listener)
    }

    /// Disconnect a started listener.
    pub fn disconnect_started(&self, id: ConnectionId) -> bool {
        self.inner.started.disconnect(id)
    }

    /// Disconnect a finished listener.
    pub fn disconnect_finished(&self, id: ConnectionId) -> bool {
        self.inner.finished.disconnect(id)
    }

    /// The calling execution context's own `Thread` handle.
    ///
    /// Works for any context: threads the kernel did not spawn (the process's
    /// initial thread included) are adopted lazily on first call.
    pub fn current() -> Thread {
        registry::current()
    }

    /// The calling execution context's native identifier.
    pub fn current_id() -> ThreadId {
        thread::current().id()
    }

    /// The number of logical processors on this machine. Always > 0.
    pub fn ideal_thread_count() -> usize {
        thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    }
}

impl ThreadInner {
    /// Run the finish sequence at most once: fire the finished signal, then
    /// flip the state and release waiters.
    ///
    /// The signal fires before the state flip so that it happens-before any
    /// `wait()` returning `true`.
    fn finish(&self) {
        if self.finish_once.swap(true, Ordering::AcqRel) {
            return;
        }
        self.finished.emit();
        let mut st = self.state.lock();
        st.state = ThreadState::Finished;
        st.priority = Priority::Inherit;
        st.terminate_pending = false;
        tracing::debug!(target: targets::THREAD, name = %self.name, "thread finished");
        self.state_changed.notify_all();
    }
}

/// Entry shim executed on the new native context.
fn thread_entry(thread: Thread) {
    // Synchronize with start(): it publishes state, native id and handle
    // under this lock before the spawned context proceeds.
    drop(thread.inner.state.lock());

    registry::register_current(&thread);
    thread.inner.started.emit();

    let body = thread.inner.body.lock().take();
    let result = catch_unwind(AssertUnwindSafe(|| {
        if let Some(body) = body {
            body(&thread);
        }
    }));

    match result {
        Ok(()) => {}
        Err(payload) if payload.is::<TerminationRequest>() => {
            tracing::debug!(
                target: targets::THREAD,
                name = %thread.inner.name,
                "thread unwound on termination request"
            );
        }
        Err(payload) => {
            // A failing body terminates only this thread, never the process.
            tracing::error!(
                target: targets::THREAD,
                name = %thread.inner.name,
                message = panic_message(payload.as_ref()),
                "thread body panicked; contained at the thread boundary"
            );
        }
    }

    thread.inner.event_loop.clear_activations();
    thread.inner.finish();
    registry::deregister_current();
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
