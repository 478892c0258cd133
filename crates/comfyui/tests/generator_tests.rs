//! Integration tests for [`ImageGenerator`] against a scripted backend.
//!
//! All tests run on tokio's paused clock, so poll intervals, retry delays
//! and deadlines elapse instantly while keeping their relative order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::{json, Value};

use quill_comfyui::api::ComfyUIApiError;
use quill_comfyui::backend::ImageBackend;
use quill_comfyui::generator::{
    GenerationOutcome, GenerationRequest, ImageGenerator, IMAGE_SUBDIRECTORY,
};
use quill_comfyui::history::ImageRef;
use quill_core::config::{ComfyConfig, StyleSettings};
use quill_core::prompts::PromptPair;

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// How the history endpoint answers for one prompt.
#[derive(Clone, Copy)]
enum Script {
    /// `pending_polls` empty bodies, then outputs with one image.
    CompleteAfter { pending_polls: usize },
    /// 404 `not_found_polls` times, then outputs.
    NotFoundThenComplete { not_found_polls: usize },
    /// Transport errors `error_polls` times, then outputs.
    FlakyThenComplete { error_polls: usize },
    /// Error status.
    ErrorStatus,
    /// Never finishes.
    Never,
}

struct ScriptedBackend {
    /// Script per submission, in order; the last entry repeats.
    scripts: Vec<Script>,
    submissions: Mutex<Vec<Value>>,
    polls: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedBackend {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts,
            submissions: Mutex::new(Vec::new()),
            polls: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    fn script_for(&self, prompt_id: &str) -> Script {
        let index: usize = prompt_id.trim_start_matches("p").parse().unwrap();
        *self
            .scripts
            .get(index)
            .or(self.scripts.last())
            .unwrap()
    }

    fn completed() -> Value {
        json!({"outputs": {"9": {"images": [{"filename": "ComfyUI_0001.webp", "subfolder": "", "type": "output"}]}}})
    }
}

#[async_trait]
impl ImageBackend for ScriptedBackend {
    async fn submit(&self, graph: &Value) -> Result<String, ComfyUIApiError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(graph.clone());
        Ok(format!("p{}", submissions.len() - 1))
    }

    async fn history(&self, prompt_id: &str) -> Result<Option<Value>, ComfyUIApiError> {
        let polls = {
            let mut polls = self.polls.lock().unwrap();
            let entry = polls.entry(prompt_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let reply = match self.script_for(prompt_id) {
            Script::CompleteAfter { pending_polls } if polls > pending_polls => {
                Some(Self::completed())
            }
            Script::CompleteAfter { .. } => Some(json!({})),
            Script::NotFoundThenComplete { not_found_polls } if polls > not_found_polls => {
                Some(Self::completed())
            }
            Script::NotFoundThenComplete { .. } => None,
            Script::FlakyThenComplete { error_polls } if polls > error_polls => {
                Some(Self::completed())
            }
            Script::FlakyThenComplete { .. } => {
                return Err(ComfyUIApiError::ApiError {
                    status: 502,
                    body: "bad gateway".into(),
                })
            }
            Script::ErrorStatus => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                Some(json!({prompt_id: {"status": {"status": "error", "message": "CUDA out of memory"}}}))
            }
            Script::Never => Some(json!({prompt_id: {"status": {"status": "running"}}})),
        };
        Ok(reply)
    }

    async fn fetch_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("bytes of {}", image.filename).into_bytes())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_workflow(dir: &Path) -> String {
    let path = dir.join("workflow.json");
    std::fs::write(
        &path,
        json!({
            "prompt": {
                "3": {"inputs": {"seed": 0}},
                "6": {"inputs": {"text": "{{positive_prompt}}"}},
                "7": {"inputs": {"text": "{{negative_prompt}}"}},
                "9": {"inputs": {"filename_prefix": "{{filename_prefix}}"}}
            }
        })
        .to_string(),
    )
    .unwrap();
    path.to_string_lossy().into_owned()
}

fn config(workflow_path: String) -> ComfyConfig {
    ComfyConfig {
        timeout_seconds: 30,
        max_attempts: 2,
        seed: 1234,
        workflow_path,
        ..ComfyConfig::default()
    }
}

fn prompts() -> PromptPair {
    PromptPair {
        template: Some("nature".into()),
        positive: "misty mountain lake".into(),
        negative: "lowres".into(),
    }
}

fn style() -> StyleSettings {
    StyleSettings {
        template: "realistic_photo".into(),
        ..StyleSettings::default()
    }
}

async fn run(generator: &ImageGenerator, config: &ComfyConfig, output: &Path) -> GenerationOutcome {
    generator
        .generate(GenerationRequest {
            topic: "Mountain lakes",
            prompts: &prompts(),
            style: &style(),
            config,
            output_dir: output,
        })
        .await
}

// ---------------------------------------------------------------------------
// Test: success paths
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn first_attempt_success_saves_image_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(write_workflow(dir.path()));
    let backend = ScriptedBackend::new(vec![Script::CompleteAfter { pending_polls: 2 }]);
    let generator = ImageGenerator::new(backend.clone(), &config);

    let outcome = run(&generator, &config, dir.path()).await;

    let (path, metadata) = match outcome {
        GenerationOutcome::Generated { path, metadata } => (path, metadata),
        other => panic!("expected a generated image, got {other:?}"),
    };
    assert!(path.starts_with(dir.path().join(IMAGE_SUBDIRECTORY)));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("comfyui_Mountain_lakes_"), "{name}");
    assert!(name.ends_with(".webp"), "{name}");
    assert_eq!(std::fs::read(&path).unwrap(), b"bytes of ComfyUI_0001.webp");

    assert_eq!(metadata.attempt, Some(1));
    assert_eq!(metadata.prompt_id.as_deref(), Some("p0"));
    assert_eq!(metadata.filename.as_deref(), Some(name.as_str()));
    assert_eq!(metadata.template.as_deref(), Some("nature"));
    assert_eq!(metadata.style_template, "realistic_photo");
    assert!(metadata.positive_prompt.starts_with("misty mountain lake, highly detailed"));
    assert!(metadata.errors.is_empty());

    let submitted = backend.submissions.lock().unwrap()[0].clone();
    assert_eq!(submitted["3"]["inputs"]["seed"], json!(1234));
    assert_eq!(submitted["6"]["inputs"]["text"], json!(metadata.positive_prompt));
    assert!(submitted["9"]["inputs"]["filename_prefix"]
        .as_str()
        .unwrap()
        .starts_with("auto_"));
    assert_eq!(generator.gate().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn not_found_and_transport_errors_keep_polling() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(write_workflow(dir.path()));

    for script in [
        Script::NotFoundThenComplete { not_found_polls: 3 },
        Script::FlakyThenComplete { error_polls: 3 },
    ] {
        let backend = ScriptedBackend::new(vec![script]);
        let generator = ImageGenerator::new(backend.clone(), &config);
        let outcome = run(&generator, &config, dir.path()).await;
        assert_matches!(outcome, GenerationOutcome::Generated { ref metadata, .. } if metadata.attempt == Some(1));
        assert_eq!(backend.submission_count(), 1);
    }
}

// ---------------------------------------------------------------------------
// Test: retries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn error_status_is_retried_with_fresh_submission() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(write_workflow(dir.path()));
    let backend = ScriptedBackend::new(vec![
        Script::ErrorStatus,
        Script::CompleteAfter { pending_polls: 0 },
    ]);
    let generator = ImageGenerator::new(backend.clone(), &config);

    let outcome = run(&generator, &config, dir.path()).await;

    let metadata = match outcome {
        GenerationOutcome::Generated { metadata, .. } => metadata,
        other => panic!("expected success on second attempt, got {other:?}"),
    };
    assert_eq!(metadata.attempt, Some(2));
    assert_eq!(metadata.prompt_id.as_deref(), Some("p1"));
    assert_eq!(metadata.errors, vec!["CUDA out of memory".to_string()]);
    assert_eq!(backend.submission_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn timeouts_exhaust_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(write_workflow(dir.path()));
    let backend = ScriptedBackend::new(vec![Script::Never]);
    let generator = ImageGenerator::new(backend.clone(), &config);

    let started = tokio::time::Instant::now();
    let outcome = run(&generator, &config, dir.path()).await;

    let metadata = match outcome {
        GenerationOutcome::Exhausted { metadata } => metadata,
        other => panic!("expected exhaustion, got {other:?}"),
    };
    assert_eq!(metadata.errors.len(), 2);
    assert!(metadata.errors[0].contains("Timed out"));
    assert_eq!(backend.submission_count(), 2);
    // Two 30s polling windows plus one 3s retry delay.
    assert!(started.elapsed() >= Duration::from_secs(63));
    assert_eq!(generator.gate().in_flight(), 0);
}

// ---------------------------------------------------------------------------
// Test: non-error early returns
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn disabled_backend_returns_without_submitting() {
    let dir = tempfile::tempdir().unwrap();
    let config = ComfyConfig {
        enabled: false,
        ..config(write_workflow(dir.path()))
    };
    let backend = ScriptedBackend::new(vec![Script::CompleteAfter { pending_polls: 0 }]);
    let generator = ImageGenerator::new(backend.clone(), &config);

    let outcome = run(&generator, &config, dir.path()).await;
    assert_eq!(outcome, GenerationOutcome::Disabled);
    assert_eq!(outcome.into_parts(), (None, Default::default()));
    assert_eq!(backend.submission_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn saturated_gate_reports_backpressure() {
    let dir = tempfile::tempdir().unwrap();
    let config = ComfyConfig {
        queue_size: 1,
        ..config(write_workflow(dir.path()))
    };
    let backend = ScriptedBackend::new(vec![Script::CompleteAfter { pending_polls: 0 }]);
    let generator = ImageGenerator::new(backend.clone(), &config);

    let _held = generator.gate().acquire(Duration::from_secs(1)).await.unwrap();
    let outcome = run(&generator, &config, dir.path()).await;

    assert_eq!(outcome, GenerationOutcome::Backpressure);
    assert_eq!(backend.submission_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_workflow_is_a_single_unretried_fault() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path().join("missing.json").to_string_lossy().into_owned());
    let backend = ScriptedBackend::new(vec![Script::CompleteAfter { pending_polls: 0 }]);
    let generator = ImageGenerator::new(backend.clone(), &config);

    let outcome = run(&generator, &config, dir.path()).await;

    let metadata = match outcome {
        GenerationOutcome::ConfigurationFault { metadata } => metadata,
        other => panic!("expected configuration fault, got {other:?}"),
    };
    assert_eq!(metadata.errors.len(), 1);
    assert_eq!(backend.submission_count(), 0);
    assert_eq!(generator.gate().in_flight(), 0);
}

// ---------------------------------------------------------------------------
// Test: concurrency cap
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn in_flight_generations_never_exceed_queue_size() {
    let dir = tempfile::tempdir().unwrap();
    let config = ComfyConfig {
        queue_size: 2,
        timeout_seconds: 600,
        ..config(write_workflow(dir.path()))
    };
    let backend = ScriptedBackend::new(vec![Script::CompleteAfter { pending_polls: 3 }]);
    let generator = Arc::new(ImageGenerator::new(backend.clone(), &config));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let generator = Arc::clone(&generator);
        let config = config.clone();
        let output = dir.path().to_path_buf();
        handles.push(tokio::spawn(async move {
            let outcome = run(&generator, &config, &output).await;
            assert!(generator.gate().in_flight() <= 2);
            outcome
        }));
    }

    for handle in handles {
        assert_matches!(handle.await.unwrap(), GenerationOutcome::Generated { .. });
    }
    assert_eq!(backend.submission_count(), 6);
    assert_eq!(backend.max_active.load(Ordering::SeqCst), 2);
    assert_eq!(generator.gate().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn reconfigure_resizes_the_gate() {
    let config = ComfyConfig::default();
    let backend = ScriptedBackend::new(vec![Script::Never]);
    let generator = ImageGenerator::new(backend, &config);
    assert_eq!(generator.gate().capacity(), 2);

    generator.reconfigure(&ComfyConfig {
        queue_size: 5,
        ..config
    });
    assert_eq!(generator.gate().capacity(), 5);
}
