//! Error taxonomy for the experimentation core.
//!
//! Core components raise typed failures; transport-level coordinators map
//! them onto status codes via [`CoreError::status_code`] and the structured
//! envelope of [`CoreError::envelope`].

use serde_json::json;
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Schema or parameter validation failure (bad event type, unknown
    /// targeting operator, bad export format, ...).
    #[error("{0}")]
    InvalidArgument(String),

    /// Missing experiment, variant key, or other referenced resource.
    #[error("{0}")]
    NotFound(String),

    /// Lifecycle transition rejected for the current status.
    #[error("{0}")]
    Conflict(String),

    /// Launch attempted with a non-positive ramp.
    #[error("{0}")]
    ValidationFailed(String),

    /// Operation requires a running experiment.
    #[error("{0}")]
    InvalidState(String),

    /// Experiment configuration cannot support the operation.
    #[error("{0}")]
    Misconfigured(String),

    /// Session deadline expired before the operation committed.
    #[error("operation deadline exceeded")]
    Timeout,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        CoreError::InvalidArgument(message.into())
    }

    /// Stable machine-readable tag for the error envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            CoreError::InvalidArgument(_) => "invalid_argument",
            CoreError::NotFound(_) => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::ValidationFailed(_) => "validation_failed",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::Misconfigured(_) => "misconfigured",
            CoreError::Timeout => "timeout",
            CoreError::Storage(_) => "internal_server_error",
            CoreError::Serialization(_) => "internal_server_error",
        }
    }

    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::InvalidArgument(_) => 400,
            CoreError::NotFound(_) => 404,
            CoreError::Conflict(_) => 409,
            CoreError::ValidationFailed(_) => 422,
            CoreError::InvalidState(_) => 400,
            CoreError::Misconfigured(_) => 400,
            CoreError::Timeout => 504,
            CoreError::Storage(_) | CoreError::Serialization(_) => 500,
        }
    }

    /// Structured error envelope: `{"error": {"type", "message", "request_id"}}`.
    pub fn envelope(&self, request_id: Option<&str>) -> serde_json::Value {
        json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "request_id": request_id,
            }
        })
    }
}
