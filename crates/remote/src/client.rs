//! REST client for the gallery delta-sync RPC pair.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use atelier_core::{AuthSession, Changeset, PulledChanges, RemoteChangeProtocol, SyncError};

use crate::error::{RemoteApiError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

const PULL_RPC: &str = "get_gallery_changes";
const PUSH_RPC: &str = "sync_gallery_changes";

/// Error body shape returned by the backend REST layer.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Client for the backend's gallery sync RPC endpoints.
///
/// Both RPCs are exposed as stored procedures under `/rest/v1/rpc/`; the
/// server owns all merge semantics, the client only moves changesets.
#[derive(Debug, Clone)]
pub struct GalleryApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GalleryApiClient {
    /// Create a new API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The project base URL (e.g., "https://xyz.supabase.co")
    /// * `api_key` - The project's public API key
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    /// Create headers for an authenticated API request.
    fn headers(&self, session: &AuthSession) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| RemoteApiError::invalid_request("Invalid API key format"))?,
        );
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", session.access_token))
            .map_err(|_| RemoteApiError::invalid_request("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);
        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[GalleryApi] Response status: {}", status);
            return;
        }
        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[GalleryApi] Response error ({}): {}", status, preview);
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorBody>(&body) {
                let code = error.code.unwrap_or_else(|| "error".to_string());
                return Err(RemoteApiError::api(
                    status.as_u16(),
                    format!("{}: {}", code, error.message),
                ));
            }
            return Err(RemoteApiError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize RPC response. Body: {}, Error: {}",
                body,
                e
            );
            RemoteApiError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Check a response where only the status matters.
    async fn expect_success(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await?;
        Self::log_response(status, &body);
        if let Ok(error) = serde_json::from_str::<ApiErrorBody>(&body) {
            let code = error.code.unwrap_or_else(|| "error".to_string());
            return Err(RemoteApiError::api(
                status.as_u16(),
                format!("{}: {}", code, error.message),
            ));
        }
        Err(RemoteApiError::api(
            status.as_u16(),
            format!("Request failed: {}", body),
        ))
    }

    /// Fetch all remote changes since a checkpoint.
    ///
    /// POST /rest/v1/rpc/get_gallery_changes
    async fn pull_changes(
        &self,
        session: &AuthSession,
        last_pulled_at: i64,
    ) -> Result<PulledChanges> {
        let url = self.rpc_url(PULL_RPC);
        debug!("[GalleryApi] Pulling changes since {}", last_pulled_at);

        let response = self
            .client
            .post(&url)
            .headers(self.headers(session)?)
            .json(&serde_json::json!({
                "user_id": session.user_id,
                "last_pulled_at": last_pulled_at,
            }))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Submit local changes against a checkpoint.
    ///
    /// POST /rest/v1/rpc/sync_gallery_changes
    async fn push_changes(
        &self,
        session: &AuthSession,
        changes: &Changeset,
        last_pulled_at: i64,
    ) -> Result<()> {
        let url = self.rpc_url(PUSH_RPC);
        debug!(
            "[GalleryApi] Pushing {} records against checkpoint {}",
            changes.record_count(),
            last_pulled_at
        );

        let response = self
            .client
            .post(&url)
            .headers(self.headers(session)?)
            .json(&serde_json::json!({
                "user_id": session.user_id,
                "changes": changes,
                "last_pulled_at": last_pulled_at,
            }))
            .send()
            .await?;

        Self::expect_success(response).await
    }
}

#[async_trait]
impl RemoteChangeProtocol for GalleryApiClient {
    async fn pull(
        &self,
        session: &AuthSession,
        last_pulled_at: i64,
    ) -> std::result::Result<PulledChanges, SyncError> {
        self.pull_changes(session, last_pulled_at)
            .await
            .map_err(RemoteApiError::into_protocol_error)
    }

    async fn push(
        &self,
        session: &AuthSession,
        changes: &Changeset,
        last_pulled_at: i64,
    ) -> std::result::Result<(), SyncError> {
        self.push_changes(session, changes, last_pulled_at)
            .await
            .map_err(RemoteApiError::into_protocol_error)
    }
}
