use quill_core::error::CoreError;

use crate::author::AuthorError;
use crate::render::RenderError;

/// Failure of one topic, or of a registry operation behind the
/// orchestrator's public calls.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Article generation failed: {0}")]
    Author(#[from] AuthorError),

    #[error("Document rendering failed: {0}")]
    Render(#[from] RenderError),

    /// The topic task panicked; the payload message is kept when readable.
    #[error("Topic task panicked: {0}")]
    Panicked(String),
}
