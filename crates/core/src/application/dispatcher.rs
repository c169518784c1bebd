// Job Dispatcher - bounded-concurrency execution loop

use crate::application::constants::DRAIN_TIMEOUT;
use crate::application::error_handler::ErrorHandler;
use crate::application::queue::SharedQueue;
use crate::application::retry::{RetryManager, RetryableFailure};
use crate::application::service_registry::{ServiceRegistration, ServiceRegistry};
use crate::application::shutdown::ShutdownToken;
use crate::config::EngineConfig;
use crate::domain::{ClassifiedError, Job};
use crate::error::Result;
use crate::port::{JobStore, MediaService, ServiceError, TimeProvider};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Failure of a single guarded service call
#[derive(Debug)]
enum AttemptError {
    /// Breaker refused the call; nothing was invoked
    Rejected,
    Failed(Box<ClassifiedError>),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Rejected => f.write_str("circuit open"),
            AttemptError::Failed(err) => f.write_str(&err.technical),
        }
    }
}

impl RetryableFailure for AttemptError {
    fn is_rejection(&self) -> bool {
        matches!(self, AttemptError::Rejected)
    }
}

/// Terminal result of executing one job
enum Execution {
    Completed {
        result: serde_json::Value,
        service_id: String,
        attempts: u32,
    },
    Failed {
        error: ClassifiedError,
        attempts: u32,
    },
}

/// Dispatcher pulls jobs from the shared queue and drives them to a terminal state
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    queue: SharedQueue,
    registry: Arc<ServiceRegistry>,
    errors: Arc<ErrorHandler>,
    retry: RetryManager,
    time_provider: Arc<dyn TimeProvider>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    idle_interval: Duration,
    attempt_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn JobStore>,
        queue: SharedQueue,
        registry: Arc<ServiceRegistry>,
        errors: Arc<ErrorHandler>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let max_concurrent = config.max_concurrent_jobs.max(1);
        Self {
            store,
            queue,
            registry,
            errors,
            retry: RetryManager::new(config.retry_policy()),
            time_provider,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            idle_interval: Duration::from_millis(config.processing_interval_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }

    /// Jobs currently executing
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Run dispatch loop with graceful shutdown support
    ///
    /// Waits for a free slot, dequeues, and spawns the job. Sleeps
    /// `processing_interval_ms` when the queue is empty. On shutdown, stops
    /// taking new work and waits (bounded) for in-flight jobs.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        info!(max_concurrent = self.max_concurrent, "Dispatcher started");

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.wait() => break,
            };

            let next = self.queue.lock().await.dequeue();
            match next {
                Some(job) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        let job_id = job.id.clone();
                        if let Err(e) = this.process(job).await {
                            // Left PROCESSING in the store; recovered on next start
                            error!(job_id = %job_id, error = %e, "Failed to record job outcome");
                        }
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = sleep(self.idle_interval) => {},
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }

        info!(in_flight = self.in_flight(), "Dispatcher draining");
        let all = self.max_concurrent as u32;
        match timeout(DRAIN_TIMEOUT, self.permits.acquire_many(all)).await {
            Ok(_) => info!("Dispatcher stopped"),
            Err(_) => warn!(
                in_flight = self.in_flight(),
                "Dispatcher stopped with jobs still running"
            ),
        }
    }

    /// Dequeue and process one job inline, returning it in its terminal state
    pub async fn dispatch_next(self: &Arc<Self>) -> Result<Option<Job>> {
        let next = self.queue.lock().await.dequeue();
        match next {
            Some(job) => self.process(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Mark PROCESSING, execute with panic isolation, record the outcome
    async fn process(self: &Arc<Self>, mut job: Job) -> Result<Job> {
        job.start(self.time_provider.now_millis())?;
        self.store.save(&job).await?;
        info!(job_id = %job.id, job_type = %job.job_type, priority = %job.priority, "Processing job");

        // Collaborator panics surface as JoinError instead of unwinding the loop
        let this = Arc::clone(self);
        let job_for_exec = job.clone();
        let handle = tokio::spawn(async move { this.execute(&job_for_exec).await });

        let execution = match handle.await {
            Ok(execution) => execution,
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    format!("processing panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "processing task was cancelled".to_string()
                };
                error!(job_id = %job.id, reason = %reason, "Job execution aborted");
                Execution::Failed {
                    error: self.errors.classify_message(&reason, job.job_type.as_str()),
                    attempts: 1,
                }
            }
        };

        let now = self.time_provider.now_millis();
        match execution {
            Execution::Completed {
                result,
                service_id,
                attempts,
            } => {
                job.complete(now, result, service_id, attempts)?;
                info!(job_id = %job.id, attempts, "Job completed");
            }
            Execution::Failed { error, attempts } => {
                warn!(
                    job_id = %job.id,
                    attempts,
                    category = %error.category,
                    error = %error.technical,
                    "Job failed"
                );
                job.fail(now, error, attempts)?;
            }
        }

        self.store.save(&job).await?;
        Ok(job)
    }

    async fn execute(&self, job: &Job) -> Execution {
        let service_type = job.job_type.service_type();

        let candidates = self.registry.select_services(service_type).await;
        if candidates.is_empty() {
            return Execution::Failed {
                error: self.errors.service_unavailable(
                    service_type.as_str(),
                    &format!("no healthy {} service registered", service_type),
                ),
                attempts: 0,
            };
        }

        // First healthy service whose breaker admits a call
        let Some(service) = candidates
            .into_iter()
            .find(|reg| self.errors.is_operation_allowed(&reg.service_id))
        else {
            return Execution::Failed {
                error: self.errors.service_unavailable(
                    service_type.as_str(),
                    &format!("circuit open for every {} service", service_type),
                ),
                attempts: 0,
            };
        };

        let input = job.payload.as_value();
        if let Err(e) = service.instance.validate_input(input, &job.options).await {
            return Execution::Failed {
                error: self.errors.classify_error(&e, &service.service_id),
                attempts: 0,
            };
        }

        self.call_with_retry(job, service).await
    }

    async fn call_with_retry(&self, job: &Job, service: ServiceRegistration) -> Execution {
        let service_id = service.service_id.clone();
        let input = Arc::new(job.payload.as_value().clone());
        let options = Arc::new(job.options.clone());
        let attempt_timeout = self.attempt_timeout;

        // Selection already consumed the breaker admission for the first attempt
        let mut admitted = true;

        let outcome = self
            .retry
            .execute_with_retry(
                || {
                    let allowed = std::mem::replace(&mut admitted, false)
                        || self.errors.is_operation_allowed(&service_id);
                    let instance: Arc<dyn MediaService> = Arc::clone(&service.instance);
                    let errors = Arc::clone(&self.errors);
                    let input = Arc::clone(&input);
                    let options = Arc::clone(&options);
                    let context = service_id.clone();

                    async move {
                        if !allowed {
                            return Err(AttemptError::Rejected);
                        }
                        let call = instance.process_media(&input, &options);
                        let result = match timeout(attempt_timeout, call).await {
                            Ok(result) => result,
                            Err(_) => Err(ServiceError::Timeout(attempt_timeout.as_millis() as u64)),
                        };
                        match result {
                            Ok(value) => {
                                errors.handle_success(&context);
                                Ok(value)
                            }
                            Err(e) => Err(AttemptError::Failed(Box::new(
                                errors.handle_error(&e, &context),
                            ))),
                        }
                    }
                },
                &service_id,
            )
            .await;

        debug!(
            job_id = %job.id,
            service_id = %service_id,
            attempts = outcome.attempts,
            total_time_ms = outcome.total_time_ms,
            "Service call finished"
        );

        match (outcome.result, outcome.last_error) {
            (Some(result), _) => Execution::Completed {
                result,
                service_id,
                attempts: outcome.attempts,
            },
            (None, Some(AttemptError::Failed(error))) => Execution::Failed {
                error: *error,
                attempts: outcome.attempts,
            },
            (None, Some(AttemptError::Rejected)) => Execution::Failed {
                error: self.errors.service_unavailable(&service_id, "circuit open"),
                attempts: outcome.attempts,
            },
            (None, None) => Execution::Failed {
                error: self
                    .errors
                    .classify_message("retry budget exhausted without attempts", &service_id),
                attempts: outcome.attempts,
            },
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
