//! Default rejection type.

use thiserror::Error as ThisError;

/// Error carried by a rejected promise when callers don't supply their own
/// error type.
///
/// Every variant is cheap to clone: a settled error is handed to each
/// registered continuation.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// A plain runtime failure. Displays as the bare message.
    #[error("{0}")]
    Message(String),
    /// Work was cancelled before it could settle.
    #[error("cancelled")]
    Cancelled,
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },
    #[error("session renewal failed: {0}")]
    RenewalFailed(Box<Error>),
}

impl Error {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}
