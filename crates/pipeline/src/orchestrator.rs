//! Batch orchestration.
//!
//! A batch runs its topics on a bounded pool of tokio tasks sized by
//! `max_concurrent_tasks`. Each task reports its own outcome to the
//! [`JobRegistry`] as soon as it finishes, so progress moves in completion
//! order. A failing or panicking topic is recorded as that topic's error
//! and never affects its siblings.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use quill_core::config::GenerationSettings;
use quill_core::error::CoreError;
use quill_core::job::{BatchJob, PreSuppliedImage};
use quill_core::types::JobId;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::PipelineError;
use crate::registry::JobRegistry;
use crate::topic::TopicGenerator;

/// A batch run started in the background.
#[derive(Debug)]
pub struct BatchHandle {
    pub job_id: JobId,
    task: JoinHandle<()>,
}

impl BatchHandle {
    /// Wait until every topic of this run has been recorded.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            tracing::error!(job_id = %self.job_id, error = %e, "Batch run task failed");
        }
    }
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    registry: Arc<dyn JobRegistry>,
    generator: Arc<TopicGenerator>,
}

impl BatchOrchestrator {
    pub fn new(registry: Arc<dyn JobRegistry>, generator: Arc<TopicGenerator>) -> Self {
        Self {
            registry,
            generator,
        }
    }

    /// Register a job for `topics` and start processing it in the
    /// background. Returns as soon as the job exists.
    pub fn submit(
        &self,
        topics: Vec<String>,
        topic_images: HashMap<String, Vec<PreSuppliedImage>>,
        settings: GenerationSettings,
    ) -> Result<BatchHandle, PipelineError> {
        let topics: Vec<String> = topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        // Keys are matched against the trimmed topics.
        let mut images: HashMap<String, Vec<PreSuppliedImage>> = HashMap::new();
        for (topic, list) in topic_images {
            images.entry(topic.trim().to_string()).or_default().extend(list);
        }

        let job_id = self.registry.create(&topics, images)?;
        Ok(self.start(job_id, topics, settings))
    }

    /// Rerun `topics` of an existing job.
    ///
    /// Every listed occurrence must be backed by one error entry, which is
    /// removed before the rerun starts. Each occurrence reruns once;
    /// `total` is unchanged.
    pub fn retry(
        &self,
        job_id: JobId,
        topics: &[String],
        settings: GenerationSettings,
    ) -> Result<BatchHandle, PipelineError> {
        let job = self.registry.requeue(job_id, topics)?;
        tracing::info!(
            job_id = %job_id,
            topics = topics.len(),
            progress = job.progress,
            "Retrying failed topics",
        );
        Ok(self.start(job_id, topics.to_vec(), settings))
    }

    /// Rerun every failed topic of a job.
    pub fn retry_failed(
        &self,
        job_id: JobId,
        settings: GenerationSettings,
    ) -> Result<BatchHandle, PipelineError> {
        let failed = self.registry.get(job_id)?.failed_topics();
        if failed.is_empty() {
            return Err(CoreError::Validation(format!("Job {job_id} has no failed topics")).into());
        }
        self.retry(job_id, &failed, settings)
    }

    pub fn status(&self, job_id: JobId) -> Result<BatchJob, PipelineError> {
        Ok(self.registry.get(job_id)?)
    }

    fn start(&self, job_id: JobId, topics: Vec<String>, settings: GenerationSettings) -> BatchHandle {
        let settings = settings.normalized();
        self.generator.image_generator().reconfigure(&settings.comfy);

        let this = self.clone();
        let task = tokio::spawn(async move { this.run(job_id, topics, Arc::new(settings)).await });
        BatchHandle { job_id, task }
    }

    /// Process `topics` of job `job_id` with at most
    /// `settings.max_concurrent_tasks` topics in flight.
    pub async fn run(&self, job_id: JobId, topics: Vec<String>, settings: Arc<GenerationSettings>) {
        let job = match self.registry.get(job_id) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Cannot run unknown batch job");
                return;
            }
        };

        tracing::info!(
            job_id = %job_id,
            topics = topics.len(),
            workers = settings.max_concurrent_tasks,
            "Batch run started",
        );

        let slots = Arc::new(Semaphore::new(settings.max_concurrent_tasks.max(1)));
        let mut tasks = JoinSet::new();

        for topic in topics {
            // The semaphore is never closed.
            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                break;
            };
            let images = job.images_for(&topic);
            let registry = Arc::clone(&self.registry);
            let generator = Arc::clone(&self.generator);
            let settings = Arc::clone(&settings);

            tasks.spawn(async move {
                let _permit = permit;
                tracing::info!(job_id = %job_id, topic = %topic, "Topic started");

                let result = AssertUnwindSafe(generator.generate(&topic, &images, &settings))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(PipelineError::Panicked(panic_message(&*panic))));

                let recorded = match result {
                    Ok(outcome) => {
                        tracing::info!(
                            job_id = %job_id,
                            topic = %topic,
                            artifact = %outcome.artifact,
                            images = outcome.image_count,
                            "Topic completed",
                        );
                        registry.record_result(job_id, outcome)
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job_id, topic = %topic, error = %e, "Topic failed");
                        registry.record_error(job_id, &topic, &e.to_string())
                    }
                };
                if let Err(e) = recorded {
                    tracing::error!(job_id = %job_id, topic = %topic, error = %e, "Failed to record topic outcome");
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(job_id = %job_id, error = %e, "Topic task aborted");
            }
        }

        match self.registry.get(job_id) {
            Ok(job) => tracing::info!(
                job_id = %job_id,
                status = ?job.status,
                succeeded = job.results.len(),
                failed = job.errors.len(),
                total = job.total,
                "Batch run finished",
            ),
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Batch job vanished during run"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
