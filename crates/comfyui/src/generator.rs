//! Admission-controlled image generation.
//!
//! [`ImageGenerator::generate`] gates each call through the shared
//! [`AdmissionGate`], merges the configured style into the prompts, loads
//! the job-template graph once, then runs up to `max_attempts` attempts.
//! Each attempt is a small state machine:
//!
//! ```text
//! Submitted -> Polling -> { Succeeded | BackendError | Timeout }
//! ```
//!
//! `BackendError` and `Timeout` start a fresh `Submitted` attempt after
//! the retry delay while attempts remain. Nothing here returns an error:
//! every failure is folded into the [`GenerationOutcome`] and its
//! [`GenerationMetadata`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quill_core::config::ComfyConfig;
use quill_core::config::StyleSettings;
use quill_core::job::GenerationMetadata;
use quill_core::naming::topic_slug;
use quill_core::prompts::{apply_style, PromptPair};
use rand::Rng;
use serde_json::Value;
use tokio::time::Instant;

use crate::backend::ImageBackend;
use crate::gate::AdmissionGate;
use crate::history::{image_refs, interpret_history, HistoryState};
use crate::workflow::{build_payload, generated_filename_prefix, load_prompt_graph, resolve_seed};

/// Sub-directory of the output directory receiving generated images.
pub const IMAGE_SUBDIRECTORY: &str = "comfyui_images";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Fixed delays of the attempt loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorTiming {
    /// Pause between two history polls.
    pub poll_interval: Duration,
    /// Pause between a failed attempt and the next one.
    pub retry_delay: Duration,
}

impl Default for GeneratorTiming {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Inputs of one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Topic text; slugged into the saved file name.
    pub topic: &'a str,
    pub prompts: &'a PromptPair,
    pub style: &'a StyleSettings,
    pub config: &'a ComfyConfig,
    /// Base output directory. Images land in its [`IMAGE_SUBDIRECTORY`].
    pub output_dir: &'a Path,
}

/// Result of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Generated {
        path: PathBuf,
        metadata: GenerationMetadata,
    },
    /// The backend is switched off in configuration.
    Disabled,
    /// No admission permit within `timeout_seconds`.
    Backpressure,
    /// The job-template graph could not be loaded. Not retried.
    ConfigurationFault { metadata: GenerationMetadata },
    /// Every attempt failed.
    Exhausted { metadata: GenerationMetadata },
}

impl GenerationOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Generated { path, .. } => Some(path),
            _ => None,
        }
    }

    /// `(artifact path, metadata)`; metadata is empty for `Disabled` and
    /// `Backpressure`.
    pub fn into_parts(self) -> (Option<PathBuf>, GenerationMetadata) {
        match self {
            Self::Generated { path, metadata } => (Some(path), metadata),
            Self::Disabled | Self::Backpressure => (None, GenerationMetadata::default()),
            Self::ConfigurationFault { metadata } | Self::Exhausted { metadata } => {
                (None, metadata)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Attempt state machine
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum AttemptState {
    Submitted,
    Polling { prompt_id: String, deadline: Instant },
    Done(AttemptOutcome),
}

#[derive(Debug)]
enum AttemptOutcome {
    Succeeded { prompt_id: String, path: PathBuf },
    BackendError(String),
    Timeout,
}

// ---------------------------------------------------------------------------
// ImageGenerator
// ---------------------------------------------------------------------------

pub struct ImageGenerator {
    backend: Arc<dyn ImageBackend>,
    gate: AdmissionGate,
    timing: GeneratorTiming,
}

impl ImageGenerator {
    /// A generator whose gate is sized by `config.queue_size`.
    pub fn new(backend: Arc<dyn ImageBackend>, config: &ComfyConfig) -> Self {
        Self {
            backend,
            gate: AdmissionGate::new(config.queue_size),
            timing: GeneratorTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: GeneratorTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Apply a new queue size. In-flight calls keep their permits.
    pub fn reconfigure(&self, config: &ComfyConfig) {
        self.gate.resize(config.queue_size);
    }

    pub async fn generate(&self, request: GenerationRequest<'_>) -> GenerationOutcome {
        let config = request.config.clone().normalized();
        if !config.enabled {
            return GenerationOutcome::Disabled;
        }

        let deadline_budget = Duration::from_secs(config.timeout_seconds);
        let Some(_permit) = self.gate.acquire(deadline_budget).await else {
            tracing::warn!(
                topic = request.topic,
                capacity = self.gate.capacity(),
                "ComfyUI queue busy, skipping generation",
            );
            return GenerationOutcome::Backpressure;
        };

        let styled = apply_style(request.prompts, request.style);
        let mut metadata = GenerationMetadata {
            template: request.prompts.template.clone(),
            positive_prompt: styled.positive.clone(),
            negative_prompt: styled.negative.clone(),
            style_template: styled.style_template.clone(),
            ..GenerationMetadata::default()
        };

        let template = match load_prompt_graph(&config.workflow_path).await {
            Ok(graph) => graph,
            Err(e) => {
                tracing::error!(topic = request.topic, error = %e, "Failed to load ComfyUI workflow");
                metadata.errors.push(e.to_string());
                return GenerationOutcome::ConfigurationFault { metadata };
            }
        };

        for attempt in 1..=config.max_attempts {
            let graph = Value::Object(build_payload(
                &template,
                &styled,
                resolve_seed(config.seed),
                &generated_filename_prefix(),
            ));

            match self.run_attempt(&graph, &request, deadline_budget).await {
                AttemptOutcome::Succeeded { prompt_id, path } => {
                    tracing::info!(
                        topic = request.topic,
                        attempt,
                        prompt_id = %prompt_id,
                        path = %path.display(),
                        "ComfyUI image generated",
                    );
                    metadata.prompt_id = Some(prompt_id);
                    metadata.filename = path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned());
                    metadata.attempt = Some(attempt);
                    return GenerationOutcome::Generated { path, metadata };
                }
                AttemptOutcome::BackendError(message) => {
                    tracing::warn!(topic = request.topic, attempt, error = %message, "ComfyUI attempt failed");
                    metadata.errors.push(message);
                }
                AttemptOutcome::Timeout => {
                    let message = format!(
                        "Timed out after {}s waiting for ComfyUI",
                        config.timeout_seconds
                    );
                    tracing::warn!(topic = request.topic, attempt, error = %message, "ComfyUI attempt failed");
                    metadata.errors.push(message);
                }
            }

            if attempt < config.max_attempts {
                tokio::time::sleep(self.timing.retry_delay).await;
            }
        }

        GenerationOutcome::Exhausted { metadata }
    }

    // ---- private helpers ----

    async fn run_attempt(
        &self,
        graph: &Value,
        request: &GenerationRequest<'_>,
        deadline_budget: Duration,
    ) -> AttemptOutcome {
        let mut state = AttemptState::Submitted;
        loop {
            state = match state {
                AttemptState::Submitted => match self.backend.submit(graph).await {
                    Ok(prompt_id) => AttemptState::Polling {
                        prompt_id,
                        deadline: Instant::now() + deadline_budget,
                    },
                    Err(e) => AttemptState::Done(AttemptOutcome::BackendError(format!(
                        "Submit failed: {e}"
                    ))),
                },
                AttemptState::Polling {
                    prompt_id,
                    deadline,
                } => self.poll_once(prompt_id, deadline, request).await,
                AttemptState::Done(outcome) => return outcome,
            };
        }
    }

    async fn poll_once(
        &self,
        prompt_id: String,
        deadline: Instant,
        request: &GenerationRequest<'_>,
    ) -> AttemptState {
        if Instant::now() >= deadline {
            return AttemptState::Done(AttemptOutcome::Timeout);
        }

        match self.backend.history(&prompt_id).await {
            Ok(Some(body)) => match interpret_history(&body, &prompt_id) {
                HistoryState::Pending => {}
                HistoryState::Failed(message) => {
                    return AttemptState::Done(AttemptOutcome::BackendError(message));
                }
                HistoryState::Completed(outputs) => {
                    let outcome = match self.download(&outputs, request).await {
                        Ok(path) => AttemptOutcome::Succeeded { prompt_id, path },
                        Err(message) => AttemptOutcome::BackendError(message),
                    };
                    return AttemptState::Done(outcome);
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(prompt_id = %prompt_id, error = %e, "History poll failed, retrying");
            }
        }

        let wake = (Instant::now() + self.timing.poll_interval).min(deadline);
        tokio::time::sleep_until(wake).await;
        AttemptState::Polling {
            prompt_id,
            deadline,
        }
    }

    async fn download(
        &self,
        outputs: &Value,
        request: &GenerationRequest<'_>,
    ) -> Result<PathBuf, String> {
        let refs = image_refs(outputs).map_err(|e| e.to_string())?;
        let Some(image) = refs.first() else {
            return Err("No image node found in ComfyUI outputs".to_string());
        };

        let bytes = self
            .backend
            .fetch_image(image)
            .await
            .map_err(|e| format!("Image download failed: {e}"))?;

        save_image(request.output_dir, request.topic, &image.filename, &bytes)
            .await
            .map_err(|e| format!("Failed to save image: {e}"))
    }
}

/// Write `bytes` to `<output_dir>/comfyui_images/comfyui_<slug>_<ts>_<hex>.<ext>`.
async fn save_image(
    output_dir: &Path,
    topic: &str,
    remote_filename: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    let dir = output_dir.join(IMAGE_SUBDIRECTORY);
    tokio::fs::create_dir_all(&dir).await?;

    let extension = Path::new(remote_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or("png");
    let suffix: u32 = rand::rng().random_range(0..0x0100_0000);
    let name = format!(
        "comfyui_{}_{}_{suffix:06x}.{extension}",
        topic_slug(topic),
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
    );

    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
