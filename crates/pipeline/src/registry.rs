//! Batch-job registry.
//!
//! [`JobRegistry`] is the seam the orchestrator writes outcomes through;
//! [`InMemoryJobRegistry`] keeps every job in one map behind one mutex, so
//! each mutation is atomic with respect to every other. Readers get a deep
//! copy of the job, never a view into live state.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use quill_core::error::CoreError;
use quill_core::job::{BatchJob, PreSuppliedImage, TopicOutcome};
use quill_core::types::JobId;

pub trait JobRegistry: Send + Sync {
    /// Register a running job for `topics` and return its id.
    fn create(
        &self,
        topics: &[String],
        topic_images: HashMap<String, Vec<PreSuppliedImage>>,
    ) -> Result<JobId, CoreError>;

    /// Snapshot of a job.
    fn get(&self, job_id: JobId) -> Result<BatchJob, CoreError>;

    fn record_result(&self, job_id: JobId, outcome: TopicOutcome) -> Result<(), CoreError>;

    fn record_error(&self, job_id: JobId, topic: &str, error: &str) -> Result<(), CoreError>;

    /// Drop one error entry per occurrence in `topics` and set the job
    /// running again.
    ///
    /// Every occurrence must be backed by its own error entry; otherwise
    /// the job is left untouched and [`CoreError::Conflict`] is returned.
    /// Returns the updated snapshot.
    fn requeue(&self, job_id: JobId, topics: &[String]) -> Result<BatchJob, CoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    jobs: Mutex<HashMap<JobId, BatchJob>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job records stay structurally valid even if a holder panicked, so
    /// a poisoned lock is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, BatchJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_job<T>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut BatchJob) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&job_id).ok_or_else(|| not_found(job_id))?;
        f(job)
    }
}

fn not_found(job_id: JobId) -> CoreError {
    CoreError::not_found("BatchJob", job_id)
}

impl JobRegistry for InMemoryJobRegistry {
    fn create(
        &self,
        topics: &[String],
        topic_images: HashMap<String, Vec<PreSuppliedImage>>,
    ) -> Result<JobId, CoreError> {
        let job_id = uuid::Uuid::now_v7();
        let job = BatchJob::new(job_id, topics, topic_images)?;
        self.lock().insert(job_id, job);
        tracing::info!(job_id = %job_id, total = topics.len(), "Batch job created");
        Ok(job_id)
    }

    fn get(&self, job_id: JobId) -> Result<BatchJob, CoreError> {
        self.lock().get(&job_id).cloned().ok_or_else(|| not_found(job_id))
    }

    fn record_result(&self, job_id: JobId, outcome: TopicOutcome) -> Result<(), CoreError> {
        self.with_job(job_id, |job| {
            job.record_result(outcome);
            tracing::debug!(
                job_id = %job_id,
                progress = job.progress,
                completed = job.completed_count(),
                total = job.total,
                "Topic result recorded",
            );
            Ok(())
        })
    }

    fn record_error(&self, job_id: JobId, topic: &str, error: &str) -> Result<(), CoreError> {
        self.with_job(job_id, |job| {
            job.record_error(topic, error);
            tracing::debug!(
                job_id = %job_id,
                progress = job.progress,
                completed = job.completed_count(),
                total = job.total,
                "Topic error recorded",
            );
            Ok(())
        })
    }

    fn requeue(&self, job_id: JobId, topics: &[String]) -> Result<BatchJob, CoreError> {
        if topics.is_empty() {
            return Err(CoreError::Validation(
                "At least one topic is required to retry".to_string(),
            ));
        }

        self.with_job(job_id, |job| {
            let failed = job.failed_topics();
            let mut unknown: Vec<&str> = Vec::new();
            for topic in topics {
                let requested = topics.iter().filter(|t| *t == topic).count();
                let available = failed.iter().filter(|t| *t == topic).count();
                if requested > available && !unknown.contains(&topic.as_str()) {
                    unknown.push(topic);
                }
            }
            if !unknown.is_empty() {
                return Err(CoreError::Conflict(format!(
                    "Topics are not in the job's error list: {}",
                    unknown.join(", ")
                )));
            }

            job.requeue(topics);
            tracing::info!(job_id = %job_id, topics = topics.len(), "Failed topics requeued");
            Ok(job.clone())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quill_core::job::BatchStatus;
    use std::sync::Arc;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn outcome(topic: &str) -> TopicOutcome {
        TopicOutcome {
            topic: topic.to_string(),
            title: topic.to_string(),
            artifact: format!("{topic}.md"),
            image_count: 0,
            images: Vec::new(),
        }
    }

    // -- create / get --

    #[test]
    fn create_then_get_returns_running_job() {
        let registry = InMemoryJobRegistry::new();
        let id = registry.create(&topics(&["a", "b"]), HashMap::new()).unwrap();
        let job = registry.get(id).unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, BatchStatus::Running);
        assert_eq!(job.total, 2);
    }

    #[test]
    fn unknown_job_is_not_found() {
        let registry = InMemoryJobRegistry::new();
        let id = uuid::Uuid::now_v7();
        assert_matches!(registry.get(id), Err(CoreError::NotFound { entity: "BatchJob", .. }));
        assert_matches!(registry.record_error(id, "a", "x"), Err(CoreError::NotFound { .. }));
    }

    #[test]
    fn snapshots_are_detached_copies() {
        let registry = InMemoryJobRegistry::new();
        let id = registry.create(&topics(&["a", "b"]), HashMap::new()).unwrap();
        let before = registry.get(id).unwrap();
        registry.record_result(id, outcome("a")).unwrap();
        assert!(before.results.is_empty());
        assert_eq!(registry.get(id).unwrap().results.len(), 1);
    }

    // -- requeue --

    #[test]
    fn requeue_keeps_total_and_results() {
        let registry = InMemoryJobRegistry::new();
        let id = registry.create(&topics(&["a", "b", "c"]), HashMap::new()).unwrap();
        registry.record_result(id, outcome("a")).unwrap();
        registry.record_error(id, "b", "boom").unwrap();
        registry.record_error(id, "c", "bang").unwrap();
        assert_eq!(registry.get(id).unwrap().status, BatchStatus::Completed);

        let job = registry.requeue(id, &topics(&["b"])).unwrap();
        assert_eq!(job.total, 3);
        assert_eq!(job.status, BatchStatus::Running);
        assert_eq!(job.results.len(), 1);
        assert_eq!(job.failed_topics(), topics(&["c"]));
    }

    #[test]
    fn requeue_rejects_topics_without_errors() {
        let registry = InMemoryJobRegistry::new();
        let id = registry.create(&topics(&["a", "b"]), HashMap::new()).unwrap();
        registry.record_result(id, outcome("a")).unwrap();
        registry.record_error(id, "b", "boom").unwrap();

        assert_matches!(
            registry.requeue(id, &topics(&["a", "b"])),
            Err(CoreError::Conflict(msg)) if msg.ends_with(": a")
        );
        assert_matches!(registry.requeue(id, &[]), Err(CoreError::Validation(_)));

        let job = registry.get(id).unwrap();
        assert_eq!(job.status, BatchStatus::Completed);
        assert_eq!(job.failed_topics(), topics(&["b"]));
    }

    #[test]
    fn requeue_counts_duplicate_topics() {
        let registry = InMemoryJobRegistry::new();
        let id = registry.create(&topics(&["b", "b", "a"]), HashMap::new()).unwrap();
        registry.record_result(id, outcome("a")).unwrap();
        registry.record_error(id, "b", "boom").unwrap();

        // One error entry cannot back two reruns.
        assert_matches!(
            registry.requeue(id, &topics(&["b", "b"])),
            Err(CoreError::Conflict(msg)) if msg.ends_with(": b")
        );
        assert_eq!(registry.get(id).unwrap().errors.len(), 1);

        registry.record_error(id, "b", "boom").unwrap();
        let job = registry.requeue(id, &topics(&["b"])).unwrap();
        assert_eq!(job.failed_topics(), topics(&["b"]));
        assert_eq!(job.status, BatchStatus::Running);
    }

    // -- concurrency --

    #[test]
    fn concurrent_recording_counts_every_topic() {
        let registry = Arc::new(InMemoryJobRegistry::new());
        let names: Vec<String> = (0..64).map(|i| format!("t{i}")).collect();
        let id = registry.create(&names, HashMap::new()).unwrap();

        let handles: Vec<_> = names
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, name)| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    if i % 3 == 0 {
                        registry.record_error(id, &name, "boom").unwrap();
                    } else {
                        registry.record_result(id, outcome(&name)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let job = registry.get(id).unwrap();
        assert_eq!(job.completed_count(), 64);
        assert_eq!(job.status, BatchStatus::Completed);
        assert_eq!(job.progress, 100.0);
    }
}
