//! Result extension trait for logging errors with context.
//!
//! Background loops must never stop on a single failure, so they log and
//! move on. `ResultExt::log` keeps that pattern to one call.

use std::fmt::Display;
use tracing::{error, warn};

/// Extension trait for logging errors with context.
pub trait ResultExt<T, E> {
    /// Log the error at `error` level with context if this is an `Err`.
    ///
    /// # Arguments
    ///
    /// * `context` - A context message to include in the log
    ///
    /// # Returns
    ///
    /// The original `Result` unchanged.
    fn log<S: ToString>(self, context: S) -> Result<T, E>;

    /// Log the error at `warn` level with context if this is an `Err`.
    ///
    /// # Arguments
    ///
    /// * `context` - A context message to include in the log
    fn log_warn<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                target: "casework_engine",
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }

    #[track_caller]
    fn log_warn<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            warn!(
                target: "casework_engine",
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }
}
