//! Seam between the generator and the remote server.
//!
//! [`ImageGenerator`](crate::generator::ImageGenerator) talks to an
//! [`ImageBackend`] so tests can substitute a scripted server.

use async_trait::async_trait;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::ImageRef;

#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Queue a substituted prompt graph and return its prompt id.
    async fn submit(&self, graph: &serde_json::Value) -> Result<String, ComfyUIApiError>;

    /// Raw history body for a prompt, `None` while the server answers 404.
    async fn history(&self, prompt_id: &str)
        -> Result<Option<serde_json::Value>, ComfyUIApiError>;

    /// Bytes of one output image.
    async fn fetch_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError>;
}

#[async_trait]
impl ImageBackend for ComfyUIApi {
    async fn submit(&self, graph: &serde_json::Value) -> Result<String, ComfyUIApiError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let prompt_id = self.submit_prompt(graph, &client_id).await?;
        tracing::info!(prompt_id = %prompt_id, api_url = %self.api_url(), "Prompt submitted to ComfyUI");
        Ok(prompt_id)
    }

    async fn history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<serde_json::Value>, ComfyUIApiError> {
        self.get_history(prompt_id).await
    }

    async fn fetch_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        self.view_image(image).await
    }
}
