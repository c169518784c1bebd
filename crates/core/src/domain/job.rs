// Job Domain Model

use crate::domain::classified::ClassifiedError;
use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Job Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownVariant {
                kind: "job status",
                value: s.to_string(),
            })
    }
}

/// Dispatch priority. Declaration order is dispatch order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Dispatch order: urgent > high > normal > low
    pub const ALL: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Index of the sub-queue for this priority
    pub fn lane(&self) -> usize {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownVariant {
                kind: "priority",
                value: s.to_string(),
            })
    }
}

/// Kind of media work a job asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Image,
    Video,
    Audio,
    Generic,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::Image,
        JobType::Video,
        JobType::Audio,
        JobType::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Image => "image",
            JobType::Video => "video",
            JobType::Audio => "audio",
            JobType::Generic => "generic",
        }
    }

    /// Registry type that can execute this job
    pub fn service_type(&self) -> ServiceType {
        match self {
            JobType::Image => ServiceType::Image,
            JobType::Video => ServiceType::Video,
            JobType::Audio => ServiceType::Audio,
            JobType::Generic => ServiceType::Generic,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownVariant {
                kind: "job type",
                value: s.to_string(),
            })
    }
}

/// Kind of processing service held by the registry.
///
/// Storage services are health-tracked but never receive jobs directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Image,
    Video,
    Audio,
    Storage,
    Generic,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Image => "image",
            ServiceType::Video => "video",
            ServiceType::Audio => "audio",
            ServiceType::Storage => "storage",
            ServiceType::Generic => "generic",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job Payload (opaque JSON owned by the caller's domain)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Submission request for a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_type: JobType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub options: serde_json::Value,
}

impl JobSpec {
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            job_type,
            priority: Priority::default(),
            owner_id: None,
            payload,
            options: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

/// Job Record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub priority: Priority,
    pub status: JobStatus,
    pub owner_id: Option<String>,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,

    pub payload: JobPayload,
    pub options: serde_json::Value,

    pub result: Option<serde_json::Value>,
    pub error: Option<ClassifiedError>,

    /// Attempts consumed by the most recent dispatch
    pub attempts: u32,
    /// Service that executed the job
    pub service_id: Option<String>,
}

impl Job {
    /// Create a new queued job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `spec` - Caller submission
    pub fn new(id: impl Into<String>, created_at: i64, spec: JobSpec) -> Self {
        Self {
            id: id.into(),
            job_type: spec.job_type,
            priority: spec.priority,
            status: JobStatus::Queued,
            owner_id: spec.owner_id,
            created_at,
            started_at: None,
            finished_at: None,
            payload: JobPayload::new(spec.payload),
            options: spec.options,
            result: None,
            error: None,
            attempts: 0,
            service_id: None,
        }
    }

    fn transition_error(&self, to: JobStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// QUEUED -> PROCESSING
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Queued {
            return Err(self.transition_error(JobStatus::Processing));
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(now_millis);
        self.finished_at = None;
        self.error = None;
        Ok(())
    }

    /// PROCESSING -> COMPLETED
    pub fn complete(
        &mut self,
        now_millis: i64,
        result: serde_json::Value,
        service_id: impl Into<String>,
        attempts: u32,
    ) -> Result<()> {
        if self.status != JobStatus::Processing {
            return Err(self.transition_error(JobStatus::Completed));
        }
        self.status = JobStatus::Completed;
        self.finished_at = Some(now_millis);
        self.result = Some(result);
        self.service_id = Some(service_id.into());
        self.attempts = attempts;
        Ok(())
    }

    /// Any non-terminal state -> FAILED
    pub fn fail(&mut self, now_millis: i64, error: ClassifiedError, attempts: u32) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.transition_error(JobStatus::Failed));
        }
        self.status = JobStatus::Failed;
        self.finished_at = Some(now_millis);
        self.error = Some(error);
        self.attempts = attempts;
        Ok(())
    }

    /// QUEUED -> CANCELLED (already dispatched jobs cannot be cancelled)
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Queued {
            return Err(self.transition_error(JobStatus::Cancelled));
        }
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// PROCESSING -> QUEUED, used when recovering orphaned jobs
    pub fn requeue(&mut self) -> Result<()> {
        if self.status != JobStatus::Processing {
            return Err(self.transition_error(JobStatus::Queued));
        }
        self.status = JobStatus::Queued;
        self.started_at = None;
        Ok(())
    }

    /// Timestamp used for retention decisions
    pub fn retention_anchor(&self) -> i64 {
        self.finished_at.unwrap_or(self.created_at)
    }
}
