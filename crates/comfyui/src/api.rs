//! REST client for the ComfyUI HTTP endpoints.
//!
//! Covers the three calls a generation attempt needs: queueing a prompt
//! graph, reading its history entry and downloading an output image.

use std::time::Duration;

use serde::Deserialize;

use crate::history::ImageRef;

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);
const VIEW_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for a single ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier of the queued prompt. Some proxies omit
    /// it on rejection, so absence is checked by the caller.
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// A 2xx response whose body did not carry what the protocol promises.
    #[error("Unexpected ComfyUI response: {0}")]
    Protocol(String),
}

impl ComfyUIApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Queue a prompt graph with `POST /prompt` and return its prompt id.
    pub async fn submit_prompt(
        &self,
        graph: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": graph,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .timeout(SUBMIT_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        submitted
            .prompt_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ComfyUIApiError::Protocol("no prompt_id returned".into()))
    }

    /// Read the history entry of a prompt with `GET /history/{prompt_id}`.
    ///
    /// A 404 means the server has not recorded the prompt yet and is
    /// returned as `Ok(None)`.
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<serde_json::Value>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(HISTORY_TIMEOUT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_response(response).await.map(Some)
    }

    /// Download the raw bytes of an output image with `GET /view`.
    pub async fn view_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .timeout(VIEW_TIMEOUT)
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Turn a non-2xx response into [`ComfyUIApiError::ApiError`] carrying
    /// the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
