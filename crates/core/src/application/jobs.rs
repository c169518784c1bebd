// Job Service - submission, status and queue management use cases

use crate::application::constants::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT, MAX_OWNER_ID_LEN};
use crate::application::queue::{QueueStats, SharedQueue};
use crate::domain::{Job, JobId, JobSpec, JobStatus, Priority};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobFilter, JobStats, JobStore, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Store counts plus live queue depth
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub jobs: JobStats,
    pub queue: QueueStats,
}

/// Job Service
pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: SharedQueue,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: SharedQueue,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            queue,
            id_provider,
            time_provider,
        }
    }

    /// Submit a new job
    ///
    /// # Arguments
    ///
    /// * `spec` - Job type, priority, owner and processing parameters
    ///
    /// # Example
    /// ```text
    /// let id = service.submit(JobSpec::new(JobType::Image, json!({"src": "cv.png"}))).await?;
    /// ```
    pub async fn submit(&self, spec: JobSpec) -> Result<JobId> {
        validate_spec(&spec)?;

        // ID and timestamp are injected for determinism
        let job = Job::new(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            spec,
        );

        // Store first: the queue never holds a job the store doesn't know
        self.store.save(&job).await?;
        let id = job.id.clone();
        let (job_type, priority) = (job.job_type, job.priority);

        if !self.queue.lock().await.enqueue(job) {
            return Err(AppError::Conflict(format!("job {} is already queued", id)));
        }

        info!(job_id = %id, job_type = %job_type, priority = %priority, "Job submitted");
        Ok(id)
    }

    pub async fn get_status(&self, id: &JobId) -> Result<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))
    }

    /// Cancel a pending job; false if it was already dispatched or finished
    pub async fn cancel(&self, id: &JobId) -> Result<bool> {
        let mut job = self.get_status(id).await?;
        if job.status != JobStatus::Queued {
            return Ok(false);
        }
        // Lock held across the save so the dispatcher cannot interleave
        let mut queue = self.queue.lock().await;
        // Already taken by the dispatcher
        if !queue.remove(id) {
            return Ok(false);
        }

        job.cancel(self.time_provider.now_millis())?;
        self.store.save(&job).await?;
        drop(queue);
        info!(job_id = %id, "Job cancelled");
        Ok(true)
    }

    /// Filtered listing, newest first; limit defaults to a bounded page
    pub async fn list(&self, mut filter: JobFilter) -> Result<Vec<Job>> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if limit == 0 || limit > MAX_LIST_LIMIT {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_LIST_LIMIT
            )));
        }
        filter.limit = Some(limit);
        self.store.list(&filter).await
    }

    /// Re-prioritize a pending job (moved to the tail of the new lane)
    pub async fn update_priority(&self, id: &JobId, priority: Priority) -> Result<Job> {
        let mut job = self.get_status(id).await?;
        if job.status != JobStatus::Queued {
            return Err(AppError::InvalidState(format!(
                "job {} is {}, only queued jobs can be re-prioritized",
                id, job.status
            )));
        }

        let mut queue = self.queue.lock().await;
        if !queue.update_priority(id, priority) {
            return Err(AppError::InvalidState(format!(
                "job {} is no longer pending",
                id
            )));
        }

        job.priority = priority;
        self.store.save(&job).await?;
        drop(queue);
        info!(job_id = %id, priority = %priority, "Job priority updated");
        Ok(job)
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        let jobs = self.store.stats().await?;
        let queue = self.queue.lock().await.get_stats();
        Ok(EngineStats { jobs, queue })
    }
}

fn validate_spec(spec: &JobSpec) -> Result<()> {
    if !spec.payload.is_object() {
        return Err(AppError::Validation(
            "payload must be a JSON object".to_string(),
        ));
    }
    if !(spec.options.is_null() || spec.options.is_object()) {
        return Err(AppError::Validation(
            "options must be a JSON object".to_string(),
        ));
    }
    if let Some(owner) = &spec.owner_id {
        if owner.is_empty() || owner.len() > MAX_OWNER_ID_LEN {
            return Err(AppError::Validation(format!(
                "owner_id must be 1..={} characters",
                MAX_OWNER_ID_LEN
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::queue::PriorityJobQueue;
    use crate::domain::JobType;
    use crate::infrastructure::InMemoryJobStore;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use tokio::sync::Mutex;

    fn service() -> (JobService, SharedQueue, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::new(1_000));
        let store = Arc::new(InMemoryJobStore::new(clock.clone()));
        let queue: SharedQueue = Arc::new(Mutex::new(PriorityJobQueue::new()));
        let service = JobService::new(
            store,
            queue.clone(),
            Arc::new(SequentialIdProvider::new("job")),
            clock.clone(),
        );
        (service, queue, clock)
    }

    fn image(priority: Priority) -> JobSpec {
        JobSpec::new(JobType::Image, serde_json::json!({"src": "cv.png"})).with_priority(priority)
    }

    #[tokio::test]
    async fn test_submit_saves_and_enqueues() {
        let (service, queue, _) = service();
        let id = service.submit(image(Priority::High)).await.unwrap();
        assert_eq!(id, "job-1");

        let job = service.get_status(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.created_at, 1_000);
        assert!(queue.lock().await.contains(&id));
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let (service, _, _) = service();

        let not_object = JobSpec::new(JobType::Video, serde_json::json!("intro"));
        assert!(matches!(
            service.submit(not_object).await,
            Err(AppError::Validation(_))
        ));

        let long_owner = image(Priority::Low).with_owner("x".repeat(MAX_OWNER_ID_LEN + 1));
        assert!(matches!(
            service.submit(long_owner).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_only_pending() {
        let (service, queue, clock) = service();
        let id = service.submit(image(Priority::Normal)).await.unwrap();

        clock.advance(500);
        assert!(service.cancel(&id).await.unwrap());
        let job = service.get_status(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.finished_at, Some(1_500));
        assert!(queue.lock().await.is_empty());

        // Already cancelled
        assert!(!service.cancel(&id).await.unwrap());

        // Dispatched (no longer in the queue)
        let id2 = service.submit(image(Priority::Normal)).await.unwrap();
        queue.lock().await.dequeue();
        assert!(!service.cancel(&id2).await.unwrap());

        assert!(matches!(
            service.cancel(&"missing".to_string()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_priority_moves_job() {
        let (service, queue, _) = service();
        let first = service.submit(image(Priority::Low)).await.unwrap();
        let second = service.submit(image(Priority::Normal)).await.unwrap();

        let job = service.update_priority(&first, Priority::Urgent).await.unwrap();
        assert_eq!(job.priority, Priority::Urgent);
        assert_eq!(
            service.get_status(&first).await.unwrap().priority,
            Priority::Urgent
        );

        let next = queue.lock().await.dequeue().unwrap();
        assert_eq!(next.id, first);
        assert!(matches!(
            service.update_priority(&first, Priority::Low).await,
            Err(AppError::InvalidState(_))
        ));
        assert!(queue.lock().await.contains(&second));
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let (service, _, clock) = service();
        for owner in ["alice", "bob", "alice"] {
            clock.advance(10);
            service
                .submit(image(Priority::Normal).with_owner(owner))
                .await
                .unwrap();
        }

        let alice = service
            .list(JobFilter {
                owner_id: Some("alice".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].id, "job-3");

        let too_big = JobFilter {
            limit: Some(MAX_LIST_LIMIT + 1),
            ..Default::default()
        };
        assert!(service.list(too_big).await.is_err());

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.jobs.queued, 3);
        assert_eq!(stats.queue.normal, 3);
    }
}
