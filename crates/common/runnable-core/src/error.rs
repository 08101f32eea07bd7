//! Error types for runnable-core.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors raised by
//! leaf runnables travel through the combinators unchanged; the only wrapping
//! happens at the leaf boundary via [`Error::External`], which keeps the
//! original error reachable through `source()`.

use thiserror::Error;

/// Result type alias for runnable-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for runnable-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The cancellation signal fired (or the deadline elapsed) before or
    /// during the operation.
    #[error("Operation was cancelled")]
    Cancelled,

    /// The propagated recursion budget reached zero.
    #[error("Recursion limit of {limit} reached without hitting a stop condition")]
    RecursionLimitExceeded {
        /// The recursion limit configured at the top-level call.
        limit: i32,
    },

    /// Two chunks could not be merged into one aggregate value.
    #[error("Cannot concatenate {left} and {right}")]
    NotConcatenable {
        /// Shape of the left-hand chunk.
        left: String,
        /// Shape of the right-hand chunk.
        right: String,
    },

    /// Invalid configuration passed to a public entry point.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The input handed to a runnable does not have the expected shape.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A combinator was constructed with invalid arguments.
    #[error("Invalid construction: {0}")]
    Construction(String),

    /// Error parsing or producing JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error applying a run-log patch.
    #[error("Patch error: {0}")]
    Patch(#[from] json_patch::PatchError),

    /// Error raised by an external collaborator (model, tool, user function).
    #[error("{0}")]
    External(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Wrap an error raised by an external collaborator.
    pub fn external(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::External(Box::new(error))
    }

    /// Create a not-concatenable error from the two offending shapes.
    pub fn not_concatenable(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::NotConcatenable {
            left: left.into(),
            right: right.into(),
        }
    }

    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Whether this error reports a fired cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether retrying the failed operation can possibly succeed.
    ///
    /// Cancellation and exhausted recursion budgets are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled | Self::RecursionLimitExceeded { .. } | Self::Construction(_)
        )
    }
}
