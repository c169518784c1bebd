// SQLite JobStore Implementation

use async_trait::async_trait;
use mediaflow_core::domain::{ClassifiedError, Job, JobId, JobPayload, JobStatus};
use mediaflow_core::error::{AppError, Result};
use mediaflow_core::port::{JobFilter, JobStats, JobStore, TimeProvider};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::{debug, warn};

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            match db_err.code().as_deref() {
                Some("2067") | Some("1555") => AppError::Conflict(format!(
                    "Unique constraint violation: {}",
                    db_err.message()
                )),
                Some("5") => AppError::Database(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                Some("13") => AppError::Database(format!("Database full: {}", db_err.message())),
                Some(code) => AppError::Database(format!(
                    "Database error [{}]: {}",
                    code,
                    db_err.message()
                )),
                None => AppError::Database(format!("Database error: {}", db_err.message())),
            }
        }
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

const TERMINAL_STATUSES: [JobStatus; 3] =
    [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

pub struct SqliteJobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        let result = job.result.as_ref().map(|v| v.to_string());
        let error = job
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // Full replacement keyed by id
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, priority, status, owner_id,
                created_at, started_at, finished_at,
                payload, options, result, error,
                attempts, service_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                job_type = excluded.job_type,
                priority = excluded.priority,
                status = excluded.status,
                owner_id = excluded.owner_id,
                created_at = excluded.created_at,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                payload = excluded.payload,
                options = excluded.options,
                result = excluded.result,
                error = excluded.error,
                attempts = excluded.attempts,
                service_id = excluded.service_id
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(job.priority.as_str())
        .bind(job.status.as_str())
        .bind(&job.owner_id)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.payload.as_value().to_string())
        .bind(job.options.to_string())
        .bind(&result)
        .bind(&error)
        .bind(i64::from(job.attempts))
        .bind(&job.service_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM jobs WHERE 1 = 1");

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(job_type) = filter.job_type {
            query.push(" AND job_type = ").push_bind(job_type.as_str());
        }
        if let Some(owner) = &filter.owner_id {
            query.push(" AND owner_id = ").push_bind(owner.clone());
        }

        // LIMIT -1 means unbounded in SQLite
        let limit = filter
            .limit
            .and_then(|l| i64::try_from(l).ok())
            .unwrap_or(-1);
        let offset = i64::try_from(filter.offset).unwrap_or(i64::MAX);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<JobRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn delete(&self, id: &JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_older_than(&self, age_ms: u64) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let cutoff = now.saturating_sub(i64::try_from(age_ms).unwrap_or(i64::MAX));

        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN (?, ?, ?)
            AND COALESCE(finished_at, created_at) < ?
            "#,
        )
        .bind(TERMINAL_STATUSES[0].as_str())
        .bind(TERMINAL_STATUSES[1].as_str())
        .bind(TERMINAL_STATUSES[2].as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let deleted = result.rows_affected();
        debug!(deleted, cutoff, "Deleted expired jobs");
        Ok(deleted)
    }

    async fn stats(&self) -> Result<JobStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut stats = JobStats::default();
        for (status, count) in rows {
            match status.parse::<JobStatus>() {
                Ok(status) => stats.add(status, u64::try_from(count).unwrap_or(0)),
                Err(_) => warn!(status = %status, count, "Unknown job status in store"),
            }
        }
        Ok(stats)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    priority: String,
    status: String,
    owner_id: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    payload: String,
    options: String,
    result: Option<String>,
    error: Option<String>,
    attempts: i64,
    service_id: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let corrupt = |field: &str, e: &dyn std::fmt::Display| {
            AppError::Database(format!("job {} has invalid {}: {}", self.id, field, e))
        };

        let payload: serde_json::Value =
            serde_json::from_str(&self.payload).map_err(|e| corrupt("payload", &e))?;
        let options: serde_json::Value =
            serde_json::from_str(&self.options).map_err(|e| corrupt("options", &e))?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(|e| corrupt("result", &e))?;
        let error = self
            .error
            .as_deref()
            .map(serde_json::from_str::<ClassifiedError>)
            .transpose()
            .map_err(|e| corrupt("error", &e))?;

        Ok(Job {
            job_type: self.job_type.parse().map_err(|e| corrupt("job_type", &e))?,
            priority: self.priority.parse().map_err(|e| corrupt("priority", &e))?,
            status: self.status.parse().map_err(|e| corrupt("status", &e))?,
            attempts: u32::try_from(self.attempts).map_err(|e| corrupt("attempts", &e))?,
            id: self.id,
            owner_id: self.owner_id,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            payload: JobPayload::new(payload),
            options,
            result,
            error,
            service_id: self.service_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use mediaflow_core::domain::{ErrorCategory, JobSpec, JobType, Priority};
    use mediaflow_core::port::time_provider::mocks::ManualTimeProvider;

    async fn setup_test_db() -> (SqliteJobStore, Arc<ManualTimeProvider>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualTimeProvider::new(0));
        (SqliteJobStore::new(pool, clock.clone()), clock)
    }

    fn job(id: &str, created_at: i64, job_type: JobType) -> Job {
        Job::new(
            id,
            created_at,
            JobSpec::new(job_type, serde_json::json!({"src": "in.wav"}))
                .with_owner("studio")
                .with_options(serde_json::json!({"bitrate": 128})),
        )
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let (store, _) = setup_test_db().await;

        let mut failed = job("j1", 100, JobType::Audio);
        failed.start(150).unwrap();
        let error = ClassifiedError::new(ErrorCategory::NetworkError, "socket hang up", "audio-1", 170);
        failed.fail(200, error.clone(), 3).unwrap();
        store.save(&failed).await.unwrap();

        let found = store.get(&"j1".to_string()).await.unwrap().unwrap();
        assert_eq!(found, failed);
        assert_eq!(found.error, Some(error));
        assert_eq!(found.options["bitrate"], 128);

        assert!(store.get(&"missing".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_is_full_replacement() {
        let (store, _) = setup_test_db().await;

        let mut j = job("j1", 100, JobType::Image);
        store.save(&j).await.unwrap();

        j.priority = Priority::Urgent;
        j.start(110).unwrap();
        j.complete(120, serde_json::json!({"url": "out.png"}), "image-1", 1)
            .unwrap();
        store.save(&j).await.unwrap();

        let found = store.get(&j.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert_eq!(found.priority, Priority::Urgent);
        assert_eq!(found.result, Some(serde_json::json!({"url": "out.png"})));
        assert_eq!(found.service_id.as_deref(), Some("image-1"));
        assert_eq!(store.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_list_filters_and_pages_newest_first() {
        let (store, _) = setup_test_db().await;
        for (id, ts, ty) in [
            ("a", 1, JobType::Image),
            ("b", 2, JobType::Video),
            ("c", 3, JobType::Image),
            ("d", 4, JobType::Image),
        ] {
            store.save(&job(id, ts, ty)).await.unwrap();
        }

        let images = store
            .list(&JobFilter {
                job_type: Some(JobType::Image),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = images.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "a"]);

        let page = store
            .list(&JobFilter {
                offset: 1,
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = page.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);

        let nobody = store
            .list(&JobFilter {
                owner_id: Some("nobody".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(nobody.is_empty());
    }

    #[tokio::test]
    async fn test_delete_older_than_only_terminal() {
        let (store, clock) = setup_test_db().await;

        let mut done = job("done", 0, JobType::Generic);
        done.cancel(1_000).unwrap();
        store.save(&done).await.unwrap();
        store.save(&job("pending", 0, JobType::Generic)).await.unwrap();

        clock.set(5_000);
        assert_eq!(store.delete_older_than(10_000).await.unwrap(), 0);

        clock.set(20_000);
        assert_eq!(store.delete_older_than(10_000).await.unwrap(), 1);
        assert!(store.get(&"done".to_string()).await.unwrap().is_none());
        assert!(store.get(&"pending".to_string()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stats_and_delete() {
        let (store, _) = setup_test_db().await;
        let mut running = job("r", 1, JobType::Video);
        running.start(2).unwrap();
        store.save(&running).await.unwrap();
        store.save(&job("q1", 3, JobType::Video)).await.unwrap();
        store.save(&job("q2", 4, JobType::Video)).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.processing, 1);

        assert!(store.delete(&"q1".to_string()).await.unwrap());
        assert!(!store.delete(&"q1".to_string()).await.unwrap());
        assert_eq!(store.stats().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_reported() {
        let (store, _) = setup_test_db().await;
        store.save(&job("bad", 1, JobType::Image)).await.unwrap();
        sqlx::query("UPDATE jobs SET status = 'EXPLODED' WHERE id = 'bad'")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(matches!(
            store.get(&"bad".to_string()).await,
            Err(AppError::Database(_))
        ));
    }
}
