//! `quill-worker` -- batch document generator.
//!
//! Reads a list of topics, runs them as one batch and logs progress until
//! every topic has a result or an error.
//!
//! # Environment variables
//!
//! | Variable                 | Required | Default | Description                               |
//! |--------------------------|----------|---------|-------------------------------------------|
//! | `QUILL_TOPICS_FILE`      | no       | --      | One topic per line; else CLI arguments    |
//! | `QUILL_POLL_INTERVAL_MS` | no       | `1000`  | Milliseconds between progress reports     |
//! | `QUILL_RETRY_FAILED`     | no       | `false` | Retry failed topics once after the batch  |
//!
//! Generation, ComfyUI and DashScope settings are read by
//! `GenerationSettings::from_env`.

use std::collections::HashMap;
use std::sync::Arc;

use quill_comfyui::api::ComfyUIApi;
use quill_comfyui::generator::ImageGenerator;
use quill_core::config::GenerationSettings;
use quill_core::job::BatchStatus;
use quill_core::types::JobId;
use quill_pipeline::author::DashScopeAuthor;
use quill_pipeline::fetch::HttpImageFetcher;
use quill_pipeline::registry::InMemoryJobRegistry;
use quill_pipeline::render::{DocumentRenderer, MarkdownRenderer, PandocRenderer};
use quill_pipeline::topic::TopicGenerator;
use quill_pipeline::{BatchHandle, BatchOrchestrator};
use quill_worker::config::{load_topics, WorkerConfig};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quill_worker=info,quill_pipeline=info,quill_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let worker = WorkerConfig::from_env();
    let settings = GenerationSettings::from_env().normalized();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let topics = load_topics(worker.topics_file.as_deref(), &args)?;

    tracing::info!(
        topics = topics.len(),
        workers = settings.max_concurrent_tasks,
        images = settings.target_image_count(),
        comfyui = %settings.comfy.server_url,
        output = %settings.output_directory.display(),
        "Starting quill-worker",
    );

    // --- Components ---
    let renderer: Arc<dyn DocumentRenderer> = match &settings.pandoc_path {
        Some(path) => Arc::new(PandocRenderer::new(path.clone())),
        None => Arc::new(MarkdownRenderer),
    };
    let images = ImageGenerator::new(
        Arc::new(ComfyUIApi::new(settings.comfy.server_url.clone())),
        &settings.comfy,
    );
    let generator = TopicGenerator::new(
        Arc::new(DashScopeAuthor::new()),
        Arc::new(images),
        Arc::new(HttpImageFetcher::new()),
        renderer,
    );
    let orchestrator = BatchOrchestrator::new(
        Arc::new(InMemoryJobRegistry::new()),
        Arc::new(generator),
    );

    // --- Batch ---
    let handle = orchestrator.submit(topics, HashMap::new(), settings.clone())?;
    let job_id = handle.job_id;
    watch(&orchestrator, handle, &worker).await?;

    if worker.retry_failed && !orchestrator.status(job_id)?.errors.is_empty() {
        let handle = orchestrator.retry_failed(job_id, settings)?;
        watch(&orchestrator, handle, &worker).await?;
    }

    let job = orchestrator.status(job_id)?;
    for outcome in &job.results {
        tracing::info!(
            topic = %outcome.topic,
            artifact = %outcome.artifact,
            images = outcome.image_count,
            "Document ready",
        );
    }
    for error in &job.errors {
        tracing::error!(topic = %error.topic, error = %error.error, "Topic failed");
    }
    tracing::info!(
        job_id = %job_id,
        succeeded = job.results.len(),
        failed = job.errors.len(),
        "quill-worker finished",
    );

    Ok(())
}

/// Log progress every poll interval until the run behind `handle` ends.
async fn watch(
    orchestrator: &BatchOrchestrator,
    handle: BatchHandle,
    worker: &WorkerConfig,
) -> anyhow::Result<()> {
    let job_id: JobId = handle.job_id;
    let mut run = std::pin::pin!(handle.wait());
    let mut ticker = tokio::time::interval(worker.poll_interval);

    loop {
        tokio::select! {
            _ = &mut run => break,
            _ = ticker.tick() => {
                let job = orchestrator.status(job_id)?;
                tracing::info!(
                    job_id = %job_id,
                    progress = job.progress,
                    succeeded = job.results.len(),
                    failed = job.errors.len(),
                    total = job.total,
                    "Batch progress",
                );
                if job.status == BatchStatus::Completed {
                    run.as_mut().await;
                    break;
                }
            }
        }
    }
    Ok(())
}
