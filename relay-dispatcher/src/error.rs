//! Error types for the dispatcher

use relay_core::ValidationError;
use thiserror::Error;

/// Errors raised by a backend adapter
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("batch service error: {0}")]
    Client(#[from] relay_batch::ClientError),

    #[error("process error: {0}")]
    Process(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected backend response: {0}")]
    Protocol(String),

    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },
}

/// Errors surfaced to callers of the dispatcher
///
/// Every variant raised before launch has already been reported to the job
/// wrapper through the failure hook by the time the caller sees it.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Destination parameters did not match the backend's schema
    #[error("invalid destination parameters: {0}")]
    Validation(#[from] ValidationError),

    /// The command composer could not produce a command
    #[error("failed to compose command: {0:#}")]
    Compose(anyhow::Error),

    /// The backend refused or failed to launch the job
    #[error("submission failed: {0}")]
    Submission(#[source] BackendError),

    /// The job wrapper (persistence collaborator) rejected a call
    #[error("job wrapper call failed: {0:#}")]
    Hook(anyhow::Error),

    /// The monitor task is gone and no longer accepts work
    #[error("dispatcher is shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, DispatchError>;
