//! Lifecycle signal hub for the Strand kernel.
//!
//! This module provides [`Signal`], an ordered list of zero-argument listener
//! callbacks. Threads expose two of these — started and finished — and fire
//! them exactly once per lifecycle transition, synchronously **on the
//! transitioning thread** (never on the thread that registered the listener).
//!
//! Any state a listener touches must therefore be synchronized by the caller;
//! `Arc<Mutex<_>>` or atomics are the usual choices.
//!
//! # Example
//!
//! ```
//! use strand_core::Signal;
//!
//! let signal = Signal::new();
//! let id = signal.connect(|| println!("fired"));
//! signal.emit();
//! signal.disconnect(id);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::logging::targets;

/// A unique identifier for a signal-listener connection.
///
/// Returned by [`Signal::connect`]; pass it to [`Signal::disconnect`] to
/// remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

type Listener = Arc<dyn Fn() + Send + Sync + 'static>;

/// An ordered, thread-safe list of zero-argument listeners.
///
/// Listeners are invoked in registration order, on whichever thread calls
/// [`emit`](Self::emit). A listener registered after an emission is never
/// retroactively invoked for it.
///
/// # Thread Safety
///
/// `Signal` is `Send + Sync`; listeners must be `Fn() + Send + Sync` since
/// they may run on a thread other than the registering one.
pub struct Signal {
    /// Listeners in registration order.
    listeners: Mutex<Vec<(ConnectionId, Listener)>>,
    /// Counter for connection IDs.
    next_id: AtomicU64,
}

impl Signal {
    /// Create a new signal with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Connect a listener to this signal.
    ///
    /// Returns a [`ConnectionId`] that can be used to disconnect the listener
    /// later. Listeners fire in the order they were connected.
    pub fn connect<F>(&self, listener: F) -> ConnectionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Disconnect a specific listener by its connection ID.
    ///
    /// Returns `true` if the connection was found and removed.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(conn_id, _)| *conn_id != id);
        listeners.len() != before
    }

    /// Disconnect all listeners from this signal.
    pub fn disconnect_all(&self) {
        self.listeners.lock().clear();
    }

    /// Get the number of connected listeners.
    pub fn connection_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Invoke all connected listeners, in registration order.
    ///
    /// The listener list is snapshotted before invocation, so a listener may
    /// connect or disconnect others without deadlocking; such changes take
    /// effect on the next emission.
    pub fn emit(&self) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        tracing::trace!(
            target: targets::SIGNAL,
            listener_count = snapshot.len(),
            "emitting signal"
        );
        for listener in snapshot {
            listener();
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("connection_count", &self.connection_count())
            .finish()
    }
}
