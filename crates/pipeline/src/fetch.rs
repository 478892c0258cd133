//! Download of URL-sourced pre-supplied images.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use quill_core::naming::{temp_url_filename, url_image_extension};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Image server returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Failed to store downloaded image: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Download `url` into `dest_dir` under a fresh `temp_url_*` name.
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, FetchError> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(temp_url_filename(&url_image_extension(url)));
        tokio::fs::write(&path, &bytes).await?;

        tracing::debug!(url, path = %path.display(), bytes = bytes.len(), "URL image downloaded");
        Ok(path)
    }
}
