//! `reqwest`-based adapter to the server's sync endpoint (§4.6). Separates
//! transport-layer failures (timeouts, connection errors) from protocol-layer
//! failures (non-2xx bodies) so the sync engine can apply §4.5/§7's
//! differing retry policies to each.

use crate::error::{ClientError, ClientResult};
use inbetweenies::{SyncRequest, SyncResponse};

pub struct SyncTransport {
    client: reqwest::Client,
    base_url: String,
}

impl SyncTransport {
    pub fn new(base_url: &str, request_timeout_secs: u64, token: Option<String>) -> ClientResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = token {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ClientError::Internal(format!("invalid bearer token: {e}")))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(request_timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// Posts a `SyncRequest` to `/api/v1/sync/` and returns the parsed
    /// `SyncResponse`. A connection/timeout failure surfaces as
    /// `ClientError::Transport`; a non-2xx body surfaces as
    /// `ClientError::Protocol` carrying the wire `error_kind` (§6.4).
    pub async fn sync(&self, request: &SyncRequest) -> ClientResult<SyncResponse> {
        let response = self
            .client
            .post(format!("{}/api/v1/sync/", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or(serde_json::json!({}));
            let error_kind = body
                .get("error_kind")
                .and_then(|v| v.as_str())
                .unwrap_or("Internal")
                .to_string();
            let detail = body.get("detail").and_then(|v| v.as_str()).unwrap_or("").to_string();
            return Err(ClientError::Protocol { error_kind, detail });
        }

        response.json().await.map_err(ClientError::from)
    }
}
