//! Reconciliation error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by a [`StreamService`](crate::service::StreamService)
/// implementation.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// No stream exists for the given commonId.
    #[error("Stream not found: {common_id}")]
    NotFound { common_id: String },

    /// The write would violate an aggregate invariant.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backing-store failure.
    #[error("Persistence error: {0}")]
    Backend(String),
}

impl ServiceError {
    /// Create a not-found error.
    pub fn not_found(common_id: impl Into<String>) -> Self {
        Self::NotFound {
            common_id: common_id.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Errors that can occur during reconciliation.
#[derive(Error, Debug)]
pub enum Error {
    /// Persistence failure from the stream store.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Control-client failure while querying the recorder.
    #[error("Control error: {0}")]
    Control(#[from] obs_control::ControlError),

    /// Invalid construction-time configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
