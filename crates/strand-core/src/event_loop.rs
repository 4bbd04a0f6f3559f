//! Per-thread event loop: a FIFO queue of posted callables plus a stack of
//! nested activations.
//!
//! The loop is owned by exactly one [`Thread`](crate::Thread) and is pumped
//! only from that thread, but it is reentrant as *nesting*: each `exec()`
//! call pushes an activation with its own exit code and stop flag, and a stop
//! request only ever terminates the innermost activation. Outer activations
//! resume pumping once the inner one returns.
//!
//! Cross-thread entry points (`post`, `request_stop`, `wake`) synchronize
//! internally; everything else is owner-thread-only.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::logging::targets;

/// A work item posted into the queue.
pub(crate) type QueuedCallable = Box<dyn FnOnce() + Send + 'static>;

/// Panic payload used to unwind a thread that is being terminated.
///
/// The thread entry shim recognizes this payload and treats the unwind as a
/// termination rather than a body failure.
pub(crate) struct TerminationRequest;

/// One `exec()` activation: ephemeral, pushed on entry and popped on return.
#[derive(Debug)]
struct Activation {
    /// The code the matching `exec()` will return.
    exit_code: i32,
    /// Whether this activation has been asked to stop.
    stopped: bool,
}

/// A single-owner, nestable message pump.
pub(crate) struct EventLoop {
    /// Producer half of the FIFO; shared with any thread that posts.
    sender: Sender<QueuedCallable>,
    /// Consumer half; drained only by the owning thread.
    receiver: Receiver<QueuedCallable>,
    /// Stack of active `exec()` activations. Depth 0 outside `exec()`.
    activations: Mutex<Vec<Activation>>,
}

impl EventLoop {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            activations: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a callable. Arrival order is execution order.
    pub(crate) fn post(&self, callable: QueuedCallable) {
        // The receiver lives as long as self, so the channel cannot be
        // disconnected here.
        let _ = self.sender.send(callable);
    }

    /// Wake a pump blocked on an empty queue without doing any work.
    pub(crate) fn wake(&self) {
        let _ = self.sender.send(Box::new(|| {}));
    }

    /// Current nesting depth (number of active `exec()` calls).
    pub(crate) fn depth(&self) -> usize {
        self.activations.lock().len()
    }

    /// Push a new activation and return its stack index.
    pub(crate) fn enter(&self) -> usize {
        let mut activations = self.activations.lock();
        activations.push(Activation {
            exit_code: 0,
            stopped: false,
        });
        let index = activations.len() - 1;
        tracing::trace!(target: targets::EVENT_LOOP, depth = index + 1, "entering event loop");
        index
    }

    /// Pop the activation at `index` (which must be the top) and return its
    /// exit code.
    pub(crate) fn leave(&self, index: usize) -> i32 {
        let mut activations = self.activations.lock();
        debug_assert_eq!(index, activations.len() - 1, "activations must unwind in LIFO order");
        let activation = activations.pop().expect("leave() without a matching enter()");
        tracing::trace!(
            target: targets::EVENT_LOOP,
            depth = activations.len(),
            exit_code = activation.exit_code,
            "leaving event loop"
        );
        activation.exit_code
    }

    /// Ask the innermost activation to stop with `code`.
    ///
    /// Returns `false` if no activation is active; the caller is then
    /// responsible for latching the request.
    pub(crate) fn request_stop(&self, code: i32) -> bool {
        let mut activations = self.activations.lock();
        match activations.last_mut() {
            Some(top) => {
                top.stopped = true;
                top.exit_code = code;
                drop(activations);
                // The pump may be blocked on an empty queue.
                self.wake();
                true
            }
            None => false,
        }
    }

    /// Whether the activation at `index` has been asked to stop.
    fn stopped(&self, index: usize) -> bool {
        self.activations
            .lock()
            .get(index)
            .map(|activation| activation.stopped)
            .unwrap_or(true)
    }

    /// Pump queued callables until the activation at `index` is stopped.
    ///
    /// `cancelled` is checked at every scheduling point; when it reports true
    /// the pump unwinds the whole thread with [`TerminationRequest`].
    pub(crate) fn pump<F>(&self, index: usize, cancelled: F)
    where
        F: Fn() -> bool,
    {
        loop {
            if cancelled() {
                tracing::debug!(target: targets::EVENT_LOOP, "event loop cancelled; unwinding");
                std::panic::panic_any(TerminationRequest);
            }
            if self.stopped(index) {
                break;
            }
            let callable = match self.receiver.recv() {
                Ok(callable) => callable,
                Err(_) => break,
            };
            callable();
        }
    }

    /// Drop all activations without running their epilogues.
    ///
    /// Used by the thread boundary when the body unwinds through active
    /// `exec()` calls, so the depth-returns-to-zero invariant holds.
    pub(crate) fn clear_activations(&self) {
        let mut activations = self.activations.lock();
        if !activations.is_empty() {
            tracing::trace!(
                target: targets::EVENT_LOOP,
                abandoned = activations.len(),
                "clearing activations abandoned by unwind"
            );
            activations.clear();
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("depth", &self.depth())
            .field("queued", &self.receiver.len())
            .finish()
    }
}
