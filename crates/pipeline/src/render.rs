//! Writing finished documents to the output directory.
//!
//! [`MarkdownRenderer`] keeps the illustrated markdown as-is.
//! [`PandocRenderer`] converts it to `.docx` with an external `pandoc`
//! binary and removes the intermediate markdown on success.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Upper bound for one pandoc conversion.
const PANDOC_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to write document: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pandoc not found at {0}")]
    PandocMissing(String),

    #[error("Pandoc conversion failed (exit {code}): {stderr}")]
    PandocFailed { code: i32, stderr: String },

    #[error("Pandoc conversion timed out after {}s", PANDOC_TIMEOUT.as_secs())]
    PandocTimeout,
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render `markdown` as document `stem` inside `output_dir` and return
    /// the artifact's file name.
    async fn render(
        &self,
        stem: &str,
        markdown: &str,
        output_dir: &Path,
    ) -> Result<String, RenderError>;

    /// Whether the artifact embeds its images, so local image files are no
    /// longer referenced once rendering succeeded.
    fn embeds_images(&self) -> bool {
        false
    }
}

async fn write_markdown(stem: &str, markdown: &str, output_dir: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;
    let path = output_dir.join(format!("{stem}.md"));
    tokio::fs::write(&path, markdown).await?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// MarkdownRenderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

#[async_trait]
impl DocumentRenderer for MarkdownRenderer {
    async fn render(
        &self,
        stem: &str,
        markdown: &str,
        output_dir: &Path,
    ) -> Result<String, RenderError> {
        write_markdown(stem, markdown, output_dir).await?;
        Ok(format!("{stem}.md"))
    }
}

// ---------------------------------------------------------------------------
// PandocRenderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PandocRenderer {
    pandoc_path: String,
}

impl PandocRenderer {
    pub fn new(pandoc_path: impl Into<String>) -> Self {
        Self {
            pandoc_path: pandoc_path.into(),
        }
    }
}

#[async_trait]
impl DocumentRenderer for PandocRenderer {
    async fn render(
        &self,
        stem: &str,
        markdown: &str,
        output_dir: &Path,
    ) -> Result<String, RenderError> {
        let md_path = write_markdown(stem, markdown, output_dir).await?;
        let file_name = format!("{stem}.docx");
        let docx_path = output_dir.join(&file_name);

        let result = tokio::time::timeout(
            PANDOC_TIMEOUT,
            Command::new(&self.pandoc_path)
                .arg(&md_path)
                .arg("-o")
                .arg(&docx_path)
                .arg("--standalone")
                // Image links are relative to the markdown file.
                .arg(format!("--resource-path={}", output_dir.display()))
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let outcome = match result {
            Ok(Ok(output)) if output.status.success() => Ok(file_name),
            Ok(Ok(output)) => Err(RenderError::PandocFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RenderError::PandocMissing(self.pandoc_path.clone()))
            }
            Ok(Err(e)) => Err(RenderError::Io(e)),
            Err(_) => Err(RenderError::PandocTimeout),
        };

        if let Err(e) = tokio::fs::remove_file(&md_path).await {
            tracing::debug!(path = %md_path.display(), error = %e, "Failed to remove intermediate markdown");
        }
        match &outcome {
            Ok(name) => tracing::info!(file = %name, "Document converted with pandoc"),
            Err(e) => tracing::error!(stem, error = %e, "Pandoc conversion failed"),
        }
        outcome
    }

    fn embeds_images(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn markdown_renderer_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let name = MarkdownRenderer
            .render("My Title", "# My Title\n\nBody", &out)
            .await
            .unwrap();
        assert_eq!(name, "My Title.md");
        assert_eq!(
            std::fs::read_to_string(out.join("My Title.md")).unwrap(),
            "# My Title\n\nBody"
        );
        assert!(!MarkdownRenderer.embeds_images());
    }

    #[tokio::test]
    async fn missing_pandoc_is_reported_and_markdown_removed() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = PandocRenderer::new("/nonexistent/bin/pandoc-quill");
        let result = renderer.render("doc", "# doc", dir.path()).await;
        assert_matches!(result, Err(RenderError::PandocMissing(_)));
        assert!(!dir.path().join("doc.md").exists());
        assert!(renderer.embeds_images());
    }
}
