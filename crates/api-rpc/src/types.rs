//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use mediaflow_core::application::{
    CircuitStats, EngineStats, ErrorStats, HealthSummary, ServiceInfo,
};
use mediaflow_core::domain::{Job, JobSpec, JobStatus, Priority};
use mediaflow_core::port::JobFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// media.submit.v1 - Submit a job
pub type SubmitRequest = JobSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub priority: Priority,
}

/// media.status.v1 / media.cancel.v1 - Address a single job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub job: Job,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelled: bool,
}

/// media.list.v1 - Filtered listing, newest first
pub type ListRequest = JobFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub jobs: Vec<Job>,
    pub count: usize,
}

/// media.priority.v1 - Re-prioritize a pending job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityRequest {
    pub job_id: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityResponse {
    pub job_id: String,
    pub priority: Priority,
}

/// admin.stats.v1 - Get engine statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub engine: EngineStats,
    pub errors: ErrorStats,
    pub in_flight: usize,
    pub uptime_seconds: u64,
}

/// admin.services.v1 - Registered services and breaker states
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesResponse {
    pub summary: HealthSummary,
    pub services: Vec<ServiceInfo>,
    pub circuits: BTreeMap<String, CircuitStats>,
}

/// admin.circuit_reset.v1 - Close one breaker, or all when `context` is omitted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitResetRequest {
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitResetResponse {
    pub reset: usize,
}
