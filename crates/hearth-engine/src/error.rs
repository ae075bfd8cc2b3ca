//! Container runtime error types.

use http::StatusCode;
use thiserror::Error;

/// Errors returned by a [`ContainerRuntime`](crate::ContainerRuntime).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The referenced container, image, or network does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The container references a network that no longer exists.
    #[error("network not found: {0}")]
    NetworkNotFound(String),

    /// The object already exists or is in a conflicting state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("engine returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("decode error: {0}")]
    Decode(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_network_not_found(&self) -> bool {
        matches!(self, Self::NetworkNotFound(_))
    }
}

/// Result type alias for runtime operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Map an engine error response to a typed error.
///
/// This is the only place engine message text is inspected.
pub fn classify(status: StatusCode, message: &str) -> EngineError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("network") && lower.contains("not found") {
        return EngineError::NetworkNotFound(message.to_string());
    }
    match status {
        StatusCode::NOT_FOUND => EngineError::NotFound(message.to_string()),
        StatusCode::CONFLICT => EngineError::Conflict(message.to_string()),
        other => EngineError::Api {
            status: other.as_u16(),
            message: message.to_string(),
        },
    }
}
