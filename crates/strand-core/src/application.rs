//! Application entry object anchoring the main thread.
//!
//! [`CoreApplication`] adopts the thread it is constructed on as the
//! process's main thread and exposes that thread's event loop at the
//! application surface. At most one application exists per process; a second
//! construction attempt is reported as an error rather than silently creating
//! a rival main thread.
//!
//! # Example
//!
//! ```no_run
//! use strand_core::CoreApplication;
//!
//! let app = CoreApplication::new().expect("already initialized");
//! let handle = app.thread().clone();
//! std::thread::spawn(move || {
//!     handle.post(|| println!("runs on the main thread"));
//!     handle.exit(0);
//! });
//! let code = app.exec();
//! assert_eq!(code, 0);
//! ```

use std::sync::OnceLock;

use crate::error::ApplicationError;
use crate::logging::targets;
use crate::thread::Thread;

/// The adopted main thread, set once by the first `CoreApplication::new()`.
static MAIN_THREAD: OnceLock<Thread> = OnceLock::new();

/// The application object owning the main thread's event loop.
///
/// Construct it on the thread that should become the main thread, then call
/// [`exec`](Self::exec) from that same thread to enter the loop.
#[derive(Debug)]
pub struct CoreApplication {
    main_thread: Thread,
}

impl CoreApplication {
    /// Create the application, adopting the calling thread as the main
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationError::AlreadyInitialized`] if an application has
    /// already been created in this process.
    pub fn new() -> Result<Self, ApplicationError> {
        let current = Thread::current();
        MAIN_THREAD
            .set(current.clone())
            .map_err(|_| ApplicationError::AlreadyInitialized)?;
        tracing::debug!(
            target: targets::APPLICATION,
            thread = %current.name(),
            "application initialized"
        );
        Ok(Self {
            main_thread: current,
        })
    }

    /// The main thread's handle.
    pub fn thread(&self) -> &Thread {
        &self.main_thread
    }

    /// Enter the main thread's event loop and pump it until stopped.
    ///
    /// Must be called from the main thread. Returns the exit code passed to
    /// [`exit`](Self::exit) (or `0` for [`quit`](Self::quit)).
    pub fn exec(&self) -> i32 {
        self.main_thread.exec()
    }

    /// Ask the innermost main-loop activation to stop with code 0.
    pub fn quit(&self) {
        self.main_thread.quit();
    }

    /// Ask the innermost main-loop activation to stop with `code`.
    ///
    /// Callable from any thread. A request issued before `exec()` is latched
    /// and consumed at loop entry.
    pub fn exit(&self, code: i32) {
        self.main_thread.exit(code);
    }

    /// Enqueue a callable onto the main thread's event loop queue.
    pub fn post<F>(&self, callable: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.main_thread.post(callable);
    }
}

/// The main thread adopted by the application.
///
/// # Errors
///
/// Returns [`ApplicationError::NotInitialized`] if no [`CoreApplication`] has
/// been created yet.
pub fn main_thread() -> Result<Thread, ApplicationError> {
    MAIN_THREAD
        .get()
        .cloned()
        .ok_or(ApplicationError::NotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The main-thread slot is process-global, so the construction paths are
    // exercised in one test to keep ordering deterministic.
    #[test]
    fn application_lifecycle() {
        assert!(matches!(
            main_thread(),
            Err(ApplicationError::NotInitialized)
        ));

        let app = CoreApplication::new().unwrap();
        assert_eq!(*app.thread(), Thread::current());
        assert_eq!(main_thread().unwrap(), Thread::current());

        assert!(matches!(
            CoreApplication::new(),
            Err(ApplicationError::AlreadyInitialized)
        ));

        let handle = app.thread().clone();
        app.post(move || {
            handle.exit(11);
        });
        assert_eq!(app.exec(), 11);

        // A pre-loop exit request is latched and consumed at entry.
        app.exit(4);
        assert_eq!(app.exec(), 4);

        // quit() is exit(0).
        let handle = app.thread().clone();
        app.post(move || handle.quit());
        assert_eq!(app.exec(), 0);
    }
}
