//! Error taxonomy for the gallery sync subsystem.

use thiserror::Error;

/// Result type alias for gallery sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// User-facing failure category, used for one-shot notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Auth,
    Sync,
    Storage,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Sync => "sync",
            Self::Storage => "storage",
        }
    }
}

/// Errors surfaced by the sync engine and the asset pipeline.
///
/// All variants hold owned data and the type is `Clone` so a single cycle
/// outcome can fan out to every caller queued behind the in-flight cycle.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Network reachability precondition failed; never retried in-call.
    #[error("No network connection")]
    NoConnection,

    /// No valid authenticated session; never retried in-call.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The sync request queue is full.
    #[error("Sync request queue is full")]
    Busy,

    /// Pull or push RPC failure. Aborts the cycle and is retried with backoff.
    #[error("Remote protocol error: {message}")]
    RemoteProtocol {
        status: Option<u16>,
        message: String,
    },

    /// A single asset upload/download failure. Caught per-item inside batch
    /// transfers; the affected record stays un-synced and retries next cycle.
    #[error("Asset transfer failed: {0}")]
    Transfer(String),

    /// Local file or database failure. Fatal to the running cycle.
    #[error("Local storage error: {0}")]
    Storage(String),
}

impl SyncError {
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::RemoteProtocol {
            status,
            message: message.into(),
        }
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Whether the whole-cycle retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteProtocol { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoConnection => ErrorCategory::Network,
            Self::NotAuthenticated => ErrorCategory::Auth,
            Self::Busy | Self::RemoteProtocol { .. } | Self::Transfer(_) => ErrorCategory::Sync,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }

    /// HTTP status if this is a remote protocol error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RemoteProtocol { status, .. } => *status,
            _ => None,
        }
    }
}
