//! Session and connectivity lookups, injected from the application shell.

use async_trait::async_trait;

/// An authenticated backend session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: String,
    pub access_token: String,
}

/// Resolves the current authenticated session, if any.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_session(&self) -> Option<AuthSession>;
}

/// Network reachability probe backed by the platform's connectivity API.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_connected(&self) -> bool;
}
