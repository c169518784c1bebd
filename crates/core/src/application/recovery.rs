// Startup recovery of the in-process queue
use crate::application::queue::SharedQueue;
use crate::domain::JobStatus;
use crate::error::Result;
use crate::port::{JobFilter, JobStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Counts reported by `QueueRecovery::recover`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// PROCESSING jobs orphaned by the previous process, moved back to QUEUED
    pub requeued: usize,
    /// Jobs placed on the queue (includes the requeued ones)
    pub enqueued: usize,
}

/// Queue recovery service
///
/// The queue lives only in memory, so on startup every PROCESSING job in the
/// store belonged to a dead process and every QUEUED job must be re-enqueued.
pub struct QueueRecovery {
    store: Arc<dyn JobStore>,
    queue: SharedQueue,
}

impl QueueRecovery {
    pub fn new(store: Arc<dyn JobStore>, queue: SharedQueue) -> Self {
        Self { store, queue }
    }

    /// Rebuild the queue from the store
    ///
    /// Algorithm:
    /// 1. Requeue and save every PROCESSING job
    /// 2. Enqueue every QUEUED job in `created_at` order
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let orphaned = self
            .store
            .list(&JobFilter::status(JobStatus::Processing))
            .await?;
        for mut job in orphaned {
            warn!(
                job_id = %job.id,
                started_at = ?job.started_at,
                "Requeueing job orphaned by previous run"
            );
            job.requeue()?;
            self.store.save(&job).await?;
            report.requeued += 1;
        }

        let mut pending = self.store.list(&JobFilter::status(JobStatus::Queued)).await?;
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut queue = self.queue.lock().await;
        for job in pending {
            if queue.enqueue(job) {
                report.enqueued += 1;
            }
        }

        info!(
            requeued = report.requeued,
            enqueued = report.enqueued,
            "Queue recovery complete"
        );
        Ok(report)
    }
}
