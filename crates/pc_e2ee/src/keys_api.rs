//! Keys-API capability.
//!
//! The router and the prekey controller consume this trait; the reqwest
//! client below is the production binding. A missing bundle (404, or a
//! fetch that times out) is reported as `Ok(None)`, never as an error:
//! the router treats "no bundle" as a local routing decision and falls
//! back to v1.

use async_trait::async_trait;

use pc_proto::keys::{
    KeyCountsResponse, PrekeyBundleResponse, UploadKeysRequest, UploadKeysResponse,
};

use crate::error::E2eeError;

#[async_trait]
pub trait KeysApi: Send + Sync {
    /// GET /users/{id}/keys. `Ok(None)` when no bundle is available.
    async fn fetch_prekey_bundle(
        &self,
        user_id: &str,
    ) -> Result<Option<PrekeyBundleResponse>, E2eeError>;

    /// PUT /users/@me/keys. Idempotent for a repeated signed prekey id.
    async fn upload_keys(&self, request: &UploadKeysRequest)
        -> Result<UploadKeysResponse, E2eeError>;

    /// GET /users/@me/keys/count.
    async fn key_counts(&self) -> Result<KeyCountsResponse, E2eeError>;
}

/// Reqwest-backed keys client. Token refresh and retry policy live with
/// the host's HTTP stack; this client sends one request per call.
pub struct HttpKeysClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpKeysClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl KeysApi for HttpKeysClient {
    async fn fetch_prekey_bundle(
        &self,
        user_id: &str,
    ) -> Result<Option<PrekeyBundleResponse>, E2eeError> {
        let response = match self
            .http
            .get(format!("{}/users/{}/keys", self.base_url, user_id))
            .bearer_auth(&self.access_token)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // Timeouts and transport failures mean "no bundle now";
                // the caller falls back to v1 rather than failing the send.
                tracing::warn!(
                    target: "paracord_e2ee",
                    event = "bundle_fetch_unavailable",
                    user_id = %user_id,
                    error = %e
                );
                return Ok(None);
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(E2eeError::Api(format!(
                "GET /users/{}/keys returned {}",
                user_id,
                response.status()
            )));
        }
        let bundle = response
            .json::<PrekeyBundleResponse>()
            .await
            .map_err(|e| E2eeError::Api(e.to_string()))?;
        Ok(Some(bundle))
    }

    async fn upload_keys(
        &self,
        request: &UploadKeysRequest,
    ) -> Result<UploadKeysResponse, E2eeError> {
        let response = self
            .http
            .put(format!("{}/users/@me/keys", self.base_url))
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await
            .map_err(|e| E2eeError::Api(e.to_string()))?;
        if !response.status().is_success() {
            return Err(E2eeError::Api(format!(
                "PUT /users/@me/keys returned {}",
                response.status()
            )));
        }
        response
            .json::<UploadKeysResponse>()
            .await
            .map_err(|e| E2eeError::Api(e.to_string()))
    }

    async fn key_counts(&self) -> Result<KeyCountsResponse, E2eeError> {
        let response = self
            .http
            .get(format!("{}/users/@me/keys/count", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| E2eeError::Api(e.to_string()))?;
        if !response.status().is_success() {
            return Err(E2eeError::Api(format!(
                "GET /users/@me/keys/count returned {}",
                response.status()
            )));
        }
        response
            .json::<KeyCountsResponse>()
            .await
            .map_err(|e| E2eeError::Api(e.to_string()))
    }
}
