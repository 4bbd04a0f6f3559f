//! Process-wide registry mapping native execution contexts to their owning
//! [`Thread`] handles.
//!
//! Two layers back the lookup:
//!
//! - A thread-local strong back-reference, so `Thread::current()` is stable
//!   for the lifetime of the context and never requires the global lock on
//!   the hot path.
//! - A process-wide `ThreadId -> Weak<ThreadInner>` table, populated when a
//!   kernel thread starts and removed when its native context exits.
//!
//! Contexts the kernel did not spawn — the process's initial thread in
//! particular — are **adopted** lazily on first lookup: a handle with state
//! `Running`, no body and no joinable handle is created and registered, so
//! `Thread::current()` works everywhere. The registry is a bijection between
//! live contexts and handles.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{OnceLock, Weak};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::logging::targets;
use crate::thread::{Thread, ThreadInner};

/// Global native-id to handle table.
static REGISTRY: OnceLock<Mutex<HashMap<ThreadId, Weak<ThreadInner>>>> = OnceLock::new();

thread_local! {
    /// Strong back-reference to the calling context's own handle.
    static CURRENT: RefCell<Option<Thread>> = const { RefCell::new(None) };
}

fn table() -> &'static Mutex<HashMap<ThreadId, Weak<ThreadInner>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register `thread` as the handle owning the calling execution context.
///
/// Called from a kernel thread's entry shim before the started signal fires.
pub(crate) fn register_current(thread: &Thread) {
    let id = std::thread::current().id();
    table().lock().insert(id, thread.downgrade());
    CURRENT.with(|current| {
        *current.borrow_mut() = Some(thread.clone());
    });
    tracing::trace!(target: targets::REGISTRY, ?id, name = %thread.name(), "thread registered");
}

/// Remove the calling execution context's entry from the global table.
///
/// Called from a kernel thread's exit shim, after the finish sequence has run.
/// The thread-local back-reference is dropped by the runtime when the context
/// exits.
pub(crate) fn deregister_current() {
    let id = std::thread::current().id();
    table().lock().remove(&id);
    tracing::trace!(target: targets::REGISTRY, ?id, "thread deregistered");
}

/// Resolve the calling execution context's own [`Thread`] handle.
///
/// Contexts not spawned by the kernel (the initial thread included) are
/// adopted on first call; repeated calls return the same handle.
pub(crate) fn current() -> Thread {
    let existing = CURRENT.with(|current| current.borrow().clone());
    if let Some(thread) = existing {
        return thread;
    }

    let thread = Thread::adopt();
    let id = std::thread::current().id();
    table().lock().insert(id, thread.downgrade());
    CURRENT.with(|current| {
        *current.borrow_mut() = Some(thread.clone());
    });
    tracing::debug!(target: targets::REGISTRY, ?id, "adopted foreign thread");
    thread
}

/// Look up the handle owning a native execution context, if it is still alive.
#[allow(dead_code)]
pub(crate) fn lookup(id: ThreadId) -> Option<Thread> {
    table()
        .lock()
        .get(&id)
        .and_then(Weak::upgrade)
        .map(Thread::from_inner)
}
