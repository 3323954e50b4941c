//! Error types for the remote gallery API crate.

use atelier_core::SyncError;
use thiserror::Error;

/// Result type alias for remote API operations.
pub type Result<T> = std::result::Result<T, RemoteApiError>;

/// Errors raised while talking to the backend REST and storage APIs.
#[derive(Debug, Error)]
pub enum RemoteApiError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the backend
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Local file I/O while staging a download
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid request (malformed path, bad header value, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteApiError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Map an RPC failure into the engine's protocol error class.
    pub fn into_protocol_error(self) -> SyncError {
        let status = self.status_code();
        SyncError::remote(status, self.to_string())
    }

    /// Map a blob transfer failure into the engine's per-item error class.
    pub fn into_transfer_error(self) -> SyncError {
        SyncError::transfer(self.to_string())
    }
}
