//! # Strand Core
//!
//! A small concurrency kernel built around threads that own nestable event
//! loops.
//!
//! Each [`Thread`] wraps one native execution context in an irreversible
//! `NotStarted -> Running -> Finished` state machine. The unit of work is an
//! injected closure; inside it the body may call [`Thread::exec`] to pump the
//! thread's own FIFO queue of posted callables, and any other thread may
//! [`post`](Thread::post) work or [`exit`](Thread::exit) the loop. `exec`
//! calls nest: each activation carries its own exit code, and a stop request
//! only ever terminates the innermost one.
//!
//! ## Components
//!
//! - [`Thread`]: handle, builder, lifecycle and termination
//! - [`TimerQueue`]: global timer queue with affinity-correct dispatch
//! - [`Signal`]: ordered started/finished listener lists
//! - [`CoreApplication`]: the main-thread anchor
//! - [`logging`]: `tracing` target constants for filtering
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use strand_core::{single_shot, Thread};
//!
//! let worker = Thread::new(|thread| {
//!     let code = thread.exec();
//!     println!("worker loop exited with {code}");
//! });
//! worker.connect_finished(|| println!("worker finished"));
//! worker.start().expect("spawn failed");
//!
//! let handle = worker.clone();
//! single_shot(Duration::from_millis(100), &worker, move || {
//!     handle.exit(42);
//! });
//! assert!(worker.wait());
//! ```

mod application;
mod error;
mod event_loop;
pub mod logging;
mod registry;
mod signal;
mod thread;
mod timer;

pub use application::{main_thread, CoreApplication};
pub use error::{ApplicationError, Result, StrandError, ThreadError, TimerError};
pub use signal::{ConnectionId, Signal};
pub use thread::{Priority, Thread, ThreadBuilder, ThreadState};
pub use timer::{single_shot, TimerId, TimerKind, TimerQueue};
