// Retention Sweeper
// Periodic garbage collection of finished jobs and stale pending jobs

use crate::application::constants::EXPIRED_BEFORE_DISPATCH;
use crate::application::queue::SharedQueue;
use crate::application::shutdown::ShutdownToken;
use crate::config::EngineConfig;
use crate::domain::{ClassifiedError, ErrorCategory};
use crate::error::Result;
use crate::port::{JobStore, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Terminal jobs deleted from the store
    pub deleted: u64,
    /// Pending jobs evicted from the queue and marked FAILED
    pub expired: usize,
}

/// Retention sweeper
///
/// Runs `run_now` every `sweep_interval_ms` in the background
pub struct RetentionSweeper {
    store: Arc<dyn JobStore>,
    queue: SharedQueue,
    time_provider: Arc<dyn TimeProvider>,
    retention_ms: u64,
    max_pending_age_ms: Option<u64>,
    sweep_interval: Duration,
}

impl RetentionSweeper {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn JobStore>,
        queue: SharedQueue,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            queue,
            time_provider,
            retention_ms: config.job_retention_ms,
            max_pending_age_ms: config.max_pending_age_ms,
            sweep_interval: Duration::from_millis(config.sweep_interval_ms),
        }
    }

    /// Run sweep loop (background task) until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        info!(
            interval_ms = self.sweep_interval.as_millis() as u64,
            retention_ms = self.retention_ms,
            max_pending_age_ms = ?self.max_pending_age_ms,
            "Retention sweeper started"
        );

        let mut tick = interval(self.sweep_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_now().await {
                        error!(error = %e, "Retention sweep failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Retention sweeper stopping");
                    break;
                }
            }
        }
    }

    /// Run one sweep immediately (for manual trigger)
    pub async fn run_now(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        if let Some(max_age) = self.max_pending_age_ms {
            let now = self.time_provider.now_millis();
            let mut queue = self.queue.lock().await;
            let stale = queue.cleanup(max_age, now);

            for original in stale {
                let mut error = ClassifiedError::new(
                    ErrorCategory::ResourceError,
                    EXPIRED_BEFORE_DISPATCH,
                    original.job_type.as_str(),
                    now,
                );
                error.retryable = false;

                let mut job = original.clone();
                if let Err(e) = job.fail(now, error, 0) {
                    error!(job_id = %job.id, error = %e, "Failed to expire pending job");
                    continue;
                }
                if let Err(e) = self.store.save(&job).await {
                    // Back on the queue so the next sweep retries it
                    error!(job_id = %job.id, error = %e, "Failed to persist expired job");
                    queue.enqueue(original);
                    continue;
                }
                warn!(job_id = %job.id, created_at = job.created_at, "Pending job expired");
                report.expired += 1;
            }
        }

        report.deleted = self.store.delete_older_than(self.retention_ms).await?;

        if report.deleted > 0 || report.expired > 0 {
            info!(
                deleted = report.deleted,
                expired = report.expired,
                "Retention sweep completed"
            );
        }
        Ok(report)
    }
}
