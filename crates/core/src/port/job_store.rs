// Job Store Port (Interface)

use crate::domain::{Job, JobId, JobStatus, JobType};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Filters for `JobStore::list`, applied before pagination
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Whether a job passes the status/type/owner filters (pagination not applied)
    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.job_type.map_or(true, |t| job.job_type == t)
            && self
                .owner_id
                .as_deref()
                .map_or(true, |owner| job.owner_id.as_deref() == Some(owner))
    }
}

/// Job counts bucketed by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: u64,
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl JobStats {
    pub fn add(&mut self, status: JobStatus, count: u64) {
        self.total += count;
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
    }
}

/// Durable source of truth for job status
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Upsert keyed by id; full replacement, no partial merge
    async fn save(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// Filter then paginate, newest first
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Delete job, returns whether it existed
    async fn delete(&self, id: &JobId) -> Result<bool>;

    /// Delete terminal jobs whose retention anchor is older than `age_ms`
    async fn delete_older_than(&self, age_ms: u64) -> Result<u64>;

    /// Count jobs by status
    async fn stats(&self) -> Result<JobStats>;
}
