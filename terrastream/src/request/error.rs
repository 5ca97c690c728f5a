//! Error types for request scheduling and fetching.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors returned when submitting a request to the scheduler.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The server key could not be derived from the URL.
    #[error("Invalid request URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request is already Issued or Active.
    #[error("Request for '{url}' is already in flight")]
    AlreadyIssued { url: String },

    /// No tokio runtime is available to drive transport calls.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Why a completion handle rejected.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// The request was cancelled before it completed.
    #[error("Request cancelled")]
    Cancelled,

    /// The transport reported a failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RequestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestError::Cancelled)
    }
}

/// Errors from the retrying fetch entry point.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Fetch was called on a request that is Issued or Active.
    #[error("Request for '{url}' is already in flight")]
    AlreadyIssued { url: String },

    /// The request was cancelled. Cancellation is never retried.
    #[error("Request cancelled")]
    Cancelled,

    /// The transport failed and retries were exhausted or declined.
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// The scheduler rejected the submission.
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl From<RequestError> for FetchError {
    fn from(error: RequestError) -> Self {
        match error {
            RequestError::Cancelled => FetchError::Cancelled,
            RequestError::Transport(e) => FetchError::Transport(e),
        }
    }
}
