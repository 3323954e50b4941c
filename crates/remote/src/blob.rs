//! Object storage client for image originals and thumbnails.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio::io::AsyncWriteExt;

use atelier_core::{AuthSession, RemoteBlobStore, SyncError};

use crate::error::{RemoteApiError, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BUCKET: &str = "gallery";

/// Client for the backend's object storage API.
///
/// Uploads are authenticated and upserting; reads go through the bucket's
/// public URL scheme so cached previews need no token.
#[derive(Debug, Clone)]
pub struct BlobStoreClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

impl BlobStoreClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self::with_bucket(base_url, api_key, DEFAULT_BUCKET)
    }

    pub fn with_bucket(base_url: &str, api_key: &str, bucket: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            bucket: bucket.to_string(),
        }
    }

    fn headers(&self, session: &AuthSession, content_type: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .map_err(|_| RemoteApiError::invalid_request("Invalid content type"))?,
        );
        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| RemoteApiError::invalid_request("Invalid API key format"))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", session.access_token))
                .map_err(|_| RemoteApiError::invalid_request("Invalid access token format"))?,
        );
        // Re-uploading to the same object path must overwrite, not conflict.
        headers.insert("x-upsert", HeaderValue::from_static("true"));
        Ok(headers)
    }

    /// Upload an object.
    ///
    /// POST /storage/v1/object/{bucket}/{path}
    async fn upload_object(
        &self,
        session: &AuthSession,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        debug!("[BlobStore] Uploading {} bytes to {}", bytes.len(), path);

        let response = self
            .client
            .post(&url)
            .headers(self.headers(session, content_type)?)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await?;
        Err(RemoteApiError::api(
            status.as_u16(),
            format!("Upload failed: {}", body),
        ))
    }

    /// Stream a URL into a local file. The bytes land in a `.part` file
    /// first and are renamed into place, so a torn download never leaves a
    /// half-written asset behind.
    async fn download_to_file(&self, url: &str, local_path: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(RemoteApiError::api(
                status.as_u16(),
                format!("Download failed: {}", body),
            ));
        }

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = local_path.with_extension("part");
        let mut file = tokio::fs::File::create(&staging).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&staging, local_path).await?;
        debug!("[BlobStore] Downloaded {} to {}", url, local_path.display());
        Ok(())
    }
}

#[async_trait]
impl RemoteBlobStore for BlobStoreClient {
    async fn upload(
        &self,
        session: &AuthSession,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<(), SyncError> {
        self.upload_object(session, path, bytes, content_type)
            .await
            .map_err(RemoteApiError::into_transfer_error)
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    async fn download(&self, url: &str, local_path: &Path) -> std::result::Result<(), SyncError> {
        self.download_to_file(url, local_path)
            .await
            .map_err(RemoteApiError::into_transfer_error)
    }
}
