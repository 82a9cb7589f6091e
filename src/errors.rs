use thiserror::Error;

use crate::types::{Priority, RequestId};

/// Errors raised by an embedding backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend request failed: {message}")]
    Request { message: String },

    #[error("Backend API error: {status_code} - {message}")]
    Api { status_code: u16, message: String },

    #[error("Invalid embedding response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Error taxonomy for the embedding service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Invalid input: {reason}")]
    Validation { reason: String },

    #[error("{priority} lane is full (max depth: {max_depth})")]
    Capacity { priority: Priority, max_depth: usize },

    #[error("Request {id} not found")]
    NotFound { id: RequestId },

    #[error("Embedding backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Embedding backend timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl ServiceError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        ServiceError::Validation { reason: reason.into() }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ServiceError::Internal { message: message.into() }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        ServiceError::Config { reason: reason.into() }
    }

    /// Create a user-friendly error message for API clients
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Validation { reason } => {
                format!("The submitted text was rejected: {}", reason)
            }
            ServiceError::Capacity { priority, .. } => {
                format!("The {} priority queue is full. Please retry later.", priority)
            }
            ServiceError::NotFound { id } => {
                format!("No request with id '{}' is known. It may have expired.", id)
            }
            ServiceError::Backend(e) => {
                format!("The embedding backend failed: {}", e)
            }
            ServiceError::Timeout { timeout_ms } => {
                format!("The embedding backend did not answer within {} seconds.", timeout_ms / 1000)
            }
            ServiceError::Internal { .. } => {
                "An internal error occurred while processing the request.".to_string()
            }
            ServiceError::Config { reason } => {
                format!("The service configuration is invalid: {}", reason)
            }
        }
    }

    /// HTTP status code a transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation { .. } => 400,
            ServiceError::Capacity { .. } => 429,
            ServiceError::NotFound { .. } => 404,
            ServiceError::Backend(_) => 502,
            ServiceError::Timeout { .. } => 504,
            ServiceError::Internal { .. } | ServiceError::Config { .. } => 500,
        }
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<ServiceError> for String {
    fn from(error: ServiceError) -> Self {
        error.user_message()
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(error: serde_json::Error) -> Self {
        ServiceError::config(error.to_string())
    }
}
