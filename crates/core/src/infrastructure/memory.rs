// In-memory Job Store
// Used by tests and ephemeral deployments (`database_url = "memory"`)

use crate::domain::{Job, JobId};
use crate::error::Result;
use crate::port::{JobFilter, JobStats, JobStore, TimeProvider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// `JobStore` backed by a `HashMap` behind a tokio `RwLock`
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    time_provider: Arc<dyn TimeProvider>,
}

impl InMemoryJobStore {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            time_provider,
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;

        let mut matched: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        // Newest first; id breaks ties so pages are stable
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let page = matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(page)
    }

    async fn delete(&self, id: &JobId) -> Result<bool> {
        Ok(self.jobs.write().await.remove(id).is_some())
    }

    async fn delete_older_than(&self, age_ms: u64) -> Result<u64> {
        let cutoff = self
            .time_provider
            .now_millis()
            .saturating_sub(i64::try_from(age_ms).unwrap_or(i64::MAX));

        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.retention_anchor() < cutoff));
        let removed = (before - jobs.len()) as u64;

        if removed > 0 {
            debug!(removed, cutoff, "Deleted expired jobs");
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<JobStats> {
        let jobs = self.jobs.read().await;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }
}
