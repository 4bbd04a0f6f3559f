//! Error types for the Strand kernel.

use std::fmt;
use std::io;

/// The main error type for Strand kernel operations.
#[derive(Debug)]
pub enum StrandError {
    /// Application-lifecycle error.
    Application(ApplicationError),
    /// Thread-lifecycle error.
    Thread(ThreadError),
    /// Timer-related error.
    Timer(TimerError),
}

impl fmt::Display for StrandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application(err) => write!(f, "Application error: {err}"),
            Self::Thread(err) => write!(f, "Thread error: {err}"),
            Self::Timer(err) => write!(f, "Timer error: {err}"),
        }
    }
}

impl std::error::Error for StrandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Application(err) => Some(err),
            Self::Thread(err) => Some(err),
            Self::Timer(err) => Some(err),
        }
    }
}

/// Application-lifecycle errors.
#[derive(Debug)]
pub enum ApplicationError {
    /// The application has already been initialized.
    AlreadyInitialized,
    /// The application has not been initialized yet.
    NotInitialized,
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => {
                write!(f, "CoreApplication has already been initialized")
            }
            Self::NotInitialized => {
                write!(
                    f,
                    "CoreApplication has not been initialized. Call CoreApplication::new() first"
                )
            }
        }
    }
}

impl std::error::Error for ApplicationError {}

/// Thread-lifecycle errors.
#[derive(Debug)]
pub enum ThreadError {
    /// The native execution context could not be spawned.
    Spawn(io::Error),
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "Failed to spawn native thread: {err}"),
        }
    }
}

impl std::error::Error for ThreadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
        }
    }
}

/// Timer-specific errors.
#[derive(Debug)]
pub enum TimerError {
    /// The timer ID is invalid, has fired, or has been cancelled.
    InvalidTimerId,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTimerId => write!(f, "Invalid or expired timer ID"),
        }
    }
}

impl std::error::Error for TimerError {}

impl From<ApplicationError> for StrandError {
    fn from(err: ApplicationError) -> Self {
        Self::Application(err)
    }
}

impl From<ThreadError> for StrandError {
    fn from(err: ThreadError) -> Self {
        Self::Thread(err)
    }
}

impl From<TimerError> for StrandError {
    fn from(err: TimerError) -> Self {
        Self::Timer(err)
    }
}

/// A specialized Result type for Strand kernel operations.
pub type Result<T> = std::result::Result<T, StrandError>;
