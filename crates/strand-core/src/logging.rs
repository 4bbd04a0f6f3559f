//! Logging facilities for the Strand kernel.
//!
//! Strand uses the `tracing` crate for instrumentation. To see logs, install
//! a tracing subscriber in your application:
//!
//! ```ignore
//! use tracing_subscriber;
//!
//! fn main() {
//!     tracing_subscriber::fmt::init();
//!
//!     // Your application code...
//! }
//! ```
//!
//! Lifecycle transitions, queue operations, and timer fires are traced at
//! `trace`/`debug` level; misuse diagnostics (double start, waiting on self,
//! stack-size mutation after launch) are emitted at `warn` level.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core kernel target.
    pub const CORE: &str = "strand_core";
    /// Thread lifecycle target.
    pub const THREAD: &str = "strand_core::thread";
    /// Event loop target.
    pub const EVENT_LOOP: &str = "strand_core::event_loop";
    /// Timer queue target.
    pub const TIMER: &str = "strand_core::timer";
    /// Signal hub target.
    pub const SIGNAL: &str = "strand_core::signal";
    /// Thread registry target.
    pub const REGISTRY: &str = "strand_core::registry";
    /// Application lifecycle target.
    pub const APPLICATION: &str = "strand_core::application";
}
