//! Error types for execution contexts.

use thiserror::Error;

/// Errors raised inside or about an execution context.
///
/// Errors produced by a handler travel back to the orchestrator as
/// [`WorkerEvent::Error`](crate::WorkerEvent::Error); posting to a dead
/// context fails synchronously.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The context was terminated and accepts no further messages.
    #[error("Execution context has been terminated")]
    Terminated,

    /// The chunk fetch backend failed.
    #[error("Frame chunk fetch failed: {0}")]
    Fetch(String),

    /// Label decoding or painting failed.
    #[error("Label painting failed: {0}")]
    Paint(String),

    /// A request did not fit the worker's current state.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The handler panicked while processing a request.
    #[error("Worker panicked: {0}")]
    Panicked(String),
}

impl WorkerError {
    /// Whether the failure came from the external backend rather than
    /// from the context itself.
    pub fn is_backend(&self) -> bool {
        matches!(self, WorkerError::Fetch(_) | WorkerError::Paint(_))
    }
}
