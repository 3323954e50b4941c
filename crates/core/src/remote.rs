//! Remote collaborator contracts: the delta-change RPC pair and blob storage.

use std::path::Path;

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{Changeset, PulledChanges};
use crate::session::AuthSession;

/// The two opaque remote procedures of the delta-sync contract.
#[async_trait]
pub trait RemoteChangeProtocol: Send + Sync {
    /// Fetch every change since `last_pulled_at` (epoch millis, 0 on first
    /// run) along with the new server checkpoint.
    async fn pull(&self, session: &AuthSession, last_pulled_at: i64) -> Result<PulledChanges>;

    /// Submit local changes against the checkpoint returned by this cycle's
    /// pull.
    async fn push(
        &self,
        session: &AuthSession,
        changes: &Changeset,
        last_pulled_at: i64,
    ) -> Result<()>;
}

/// Opaque remote object storage for originals and thumbnails.
#[async_trait]
pub trait RemoteBlobStore: Send + Sync {
    /// Upload with overwrite semantics; re-uploading an unchanged asset to
    /// the same path is safe.
    async fn upload(
        &self,
        session: &AuthSession,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    /// Public URL for a stored object path.
    fn public_url(&self, path: &str) -> String;

    /// Stream a URL to a local file, replacing any partial previous attempt.
    async fn download(&self, url: &str, local_path: &Path) -> Result<()>;
}
