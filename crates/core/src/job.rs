//! Batch-job data model.
//!
//! A [`BatchJob`] is created once per submitted topic list and mutated
//! only through [`BatchJob::record_result`], [`BatchJob::record_error`] and
//! [`BatchJob::requeue`], each of which recomputes progress and status.
//! Callers are expected to serialize those calls (the pipeline registry
//! holds one lock around each of them).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Running,
    Completed,
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Where an image in a finished document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    UserUploaded,
    Generated,
    UrlFetched,
    /// Generation returned no image.
    Failed,
    /// Generation raised an error.
    Error,
}

/// An image to be spliced into a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub path: PathBuf,
    /// Descriptive summary. Kept in metadata, never rendered as a caption.
    pub summary: String,
    /// Paragraph after which the image goes; `None` appends at document end.
    pub paragraph_index: Option<usize>,
    pub source: ImageSource,
    pub order: usize,
}

/// An image supplied with the batch request that pre-empts generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PreSuppliedImage {
    /// A file already present on local disk.
    Uploaded {
        path: PathBuf,
        #[serde(default)]
        summary: Option<String>,
        #[serde(default)]
        order: Option<usize>,
    },
    /// A remote image that must be downloaded before use.
    Url {
        url: String,
        #[serde(default)]
        summary: Option<String>,
        #[serde(default)]
        order: Option<usize>,
    },
}

/// Summary used for pre-supplied images that carry none.
pub const DEFAULT_IMAGE_SUMMARY: &str = "illustration";

impl PreSuppliedImage {
    pub fn summary(&self) -> &str {
        match self {
            Self::Uploaded { summary, .. } | Self::Url { summary, .. } => {
                summary.as_deref().unwrap_or(DEFAULT_IMAGE_SUMMARY)
            }
        }
    }

    /// Explicit order, or `position` within the request when none was given.
    pub fn order_or(&self, position: usize) -> usize {
        match self {
            Self::Uploaded { order, .. } | Self::Url { order, .. } => order.unwrap_or(position),
        }
    }
}

/// Provenance of one image produced by the remote generation backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub template: Option<String>,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub style_template: String,
    pub prompt_id: Option<String>,
    pub filename: Option<String>,
    /// 1-based attempt that produced the image.
    pub attempt: Option<u32>,
    /// One message per failed attempt (or a single configuration fault).
    pub errors: Vec<String>,
}

/// Per-image provenance entry of a finished topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub source: ImageSource,
    pub path: Option<PathBuf>,
    pub summary: Option<String>,
    pub paragraph_index: Option<usize>,
    pub order: usize,
    pub error: Option<String>,
    pub generation: Option<GenerationMetadata>,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A successfully produced document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicOutcome {
    pub topic: String,
    pub title: String,
    /// File name of the rendered document inside the output directory.
    pub artifact: String,
    pub image_count: usize,
    pub images: Vec<ImageRecord>,
}

/// A topic whose document could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicError {
    pub topic: String,
    pub error: String,
}

// ---------------------------------------------------------------------------
// BatchJob
// ---------------------------------------------------------------------------

/// One submitted batch of topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: JobId,
    pub status: BatchStatus,
    /// Number of topics originally requested. Never changes.
    pub total: usize,
    /// `0.0..=100.0`
    pub progress: f64,
    pub results: Vec<TopicOutcome>,
    pub errors: Vec<TopicError>,
    pub topic_images: HashMap<String, Vec<PreSuppliedImage>>,
    pub created_at: Timestamp,
}

/// Percentage of `completed` over `total`, clamped to `0.0..=100.0`.
pub fn compute_progress(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

impl BatchJob {
    /// Create a running job for `topics`. An empty topic list is rejected.
    pub fn new(
        id: JobId,
        topics: &[String],
        topic_images: HashMap<String, Vec<PreSuppliedImage>>,
    ) -> Result<Self, CoreError> {
        if topics.is_empty() {
            return Err(CoreError::Validation(
                "At least one topic is required".to_string(),
            ));
        }
        Ok(Self {
            id,
            status: BatchStatus::Running,
            total: topics.len(),
            progress: 0.0,
            results: Vec::new(),
            errors: Vec::new(),
            topic_images,
            created_at: chrono::Utc::now(),
        })
    }

    /// Number of topics with a recorded result or error.
    pub fn completed_count(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    pub fn record_result(&mut self, outcome: TopicOutcome) {
        self.results.push(outcome);
        self.refresh();
    }

    pub fn record_error(&mut self, topic: impl Into<String>, error: impl Into<String>) {
        self.errors.push(TopicError {
            topic: topic.into(),
            error: error.into(),
        });
        self.refresh();
    }

    /// Remove one error entry per occurrence in `topics` and set the job
    /// running again.
    ///
    /// A topic listed twice drops two of its error entries, so each rerun
    /// maps to exactly one freed entry. `total` and `results` are untouched.
    /// Returns the number of removed error entries; when that is zero the
    /// job is left unchanged.
    pub fn requeue(&mut self, topics: &[String]) -> usize {
        let mut removed = 0;
        for topic in topics {
            if let Some(pos) = self.errors.iter().position(|e| &e.topic == topic) {
                self.errors.remove(pos);
                removed += 1;
            }
        }
        if removed > 0 {
            self.status = BatchStatus::Running;
            self.progress = compute_progress(self.completed_count(), self.total);
        }
        removed
    }

    /// Topics that currently have an error entry, in completion order.
    pub fn failed_topics(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.topic.clone()).collect()
    }

    /// Pre-supplied images for `topic`, empty when none were given.
    pub fn images_for(&self, topic: &str) -> Vec<PreSuppliedImage> {
        self.topic_images.get(topic).cloned().unwrap_or_default()
    }

    fn refresh(&mut self) {
        let completed = self.completed_count();
        self.progress = compute_progress(completed, self.total);
        if completed >= self.total {
            self.status = BatchStatus::Completed;
            self.progress = 100.0;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
