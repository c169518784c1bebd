// Engine - composition root for the dispatch core
// Wires queue, store, breakers, registry, dispatcher and background tasks

use crate::application::circuit_breaker::CircuitBreakerRegistry;
use crate::application::constants::{DRAIN_TIMEOUT, TASK_JOIN_TIMEOUT};
use crate::application::dispatcher::Dispatcher;
use crate::application::error_handler::ErrorHandler;
use crate::application::jobs::JobService;
use crate::application::queue::{PriorityJobQueue, SharedQueue};
use crate::application::recovery::{QueueRecovery, RecoveryReport};
use crate::application::retention::RetentionSweeper;
use crate::application::service_registry::{ServiceConfig, ServiceRegistry};
use crate::application::shutdown::{shutdown_channel, ShutdownSender};
use crate::config::EngineConfig;
use crate::domain::ServiceType;
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobStore, MediaService, TimeProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// Background tasks started by `init`
struct Running {
    shutdown: ShutdownSender,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

/// Engine
///
/// Explicitly constructed; every collaborator is injected so tests can run
/// several engines side by side.
pub struct Engine {
    config: EngineConfig,
    queue: SharedQueue,
    jobs: Arc<JobService>,
    registry: Arc<ServiceRegistry>,
    errors: Arc<ErrorHandler>,
    breakers: Arc<CircuitBreakerRegistry>,
    dispatcher: Arc<Dispatcher>,
    recovery: QueueRecovery,
    sweeper: Arc<RetentionSweeper>,
    running: Mutex<Option<Running>>,
}

impl Engine {
    /// Build an engine from a validated configuration
    ///
    /// # Example
    /// ```text
    /// let engine = Engine::new(config, store, Arc::new(UuidProvider), Arc::new(SystemTimeProvider))?;
    /// engine.register_service(ServiceType::Image, image, ServiceConfig::default(), HashMap::new()).await;
    /// engine.init().await?;
    /// ```
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let queue: SharedQueue = Arc::new(Mutex::new(PriorityJobQueue::new()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.circuit_breaker.clone(),
            time_provider.clone(),
        ));
        let errors = Arc::new(ErrorHandler::new(
            config.errors.clone(),
            breakers.clone(),
            time_provider.clone(),
        ));
        let registry = Arc::new(ServiceRegistry::new(
            id_provider.clone(),
            time_provider.clone(),
            Duration::from_millis(config.health_check_interval_ms),
            Duration::from_millis(config.health_check_timeout_ms),
        ));
        let jobs = Arc::new(JobService::new(
            store.clone(),
            queue.clone(),
            id_provider,
            time_provider.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            &config,
            store.clone(),
            queue.clone(),
            registry.clone(),
            errors.clone(),
            time_provider.clone(),
        ));
        let recovery = QueueRecovery::new(store.clone(), queue.clone());
        let sweeper = Arc::new(RetentionSweeper::new(
            &config,
            store,
            queue.clone(),
            time_provider,
        ));

        Ok(Self {
            config,
            queue,
            jobs,
            registry,
            errors,
            breakers,
            dispatcher,
            recovery,
            sweeper,
            running: Mutex::new(None),
        })
    }

    /// Register a processing backend; returns its service id
    pub async fn register_service(
        &self,
        service_type: ServiceType,
        instance: Arc<dyn MediaService>,
        config: ServiceConfig,
        metadata: HashMap<String, String>,
    ) -> String {
        self.registry
            .register_service(service_type, instance, config, metadata)
            .await
    }

    /// Recover the queue and start background tasks
    ///
    /// Algorithm:
    /// 1. Requeue orphaned jobs and rebuild the queue from the store
    /// 2. Start the health monitor
    /// 3. Spawn the dispatcher loop and the retention sweeper
    pub async fn init(&self) -> Result<RecoveryReport> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(AppError::InvalidState(
                "engine is already running".to_string(),
            ));
        }

        let report = self.recovery.recover().await?;
        self.registry.start().await;

        let (shutdown, token) = shutdown_channel();
        let dispatcher = tokio::spawn(Arc::clone(&self.dispatcher).run(token));
        let sweeper = tokio::spawn(Arc::clone(&self.sweeper).run(shutdown.token()));

        *running = Some(Running {
            shutdown,
            handles: vec![("dispatcher", dispatcher), ("retention", sweeper)],
        });

        info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            requeued = report.requeued,
            enqueued = report.enqueued,
            "Engine started"
        );
        Ok(report)
    }

    /// Whether `init` has run and `shutdown` has not
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Stop background tasks, then shut the registry down.
    ///
    /// Pending jobs stay QUEUED in the store and are recovered on the next
    /// start. Returns service cleanup failures.
    pub async fn shutdown(&self) -> Vec<String> {
        if let Some(running) = self.running.lock().await.take() {
            info!("Engine shutting down");
            running.shutdown.shutdown();

            for (name, handle) in running.handles {
                // Dispatcher drain is bounded by its own timeout
                let limit = if name == "dispatcher" {
                    DRAIN_TIMEOUT + TASK_JOIN_TIMEOUT
                } else {
                    TASK_JOIN_TIMEOUT
                };
                match timeout(limit, handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
                    Err(_) => warn!(task = name, "Background task did not stop in time"),
                }
            }
        }

        let failures = self.registry.shutdown().await;
        info!(failures = failures.len(), "Engine stopped");
        failures
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn jobs(&self) -> &Arc<JobService> {
        &self.jobs
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn errors(&self) -> &Arc<ErrorHandler> {
        &self.errors
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn sweeper(&self) -> &Arc<RetentionSweeper> {
        &self.sweeper
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobSpec, JobStatus, JobType, Priority};
    use crate::infrastructure::InMemoryJobStore;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::media_service::mocks::MockMediaService;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use tokio::time::sleep;
    use tokio_test::{assert_err, assert_ok};

    fn engine(store: Arc<InMemoryJobStore>) -> Engine {
        let config = EngineConfig {
            processing_interval_ms: 10,
            ..Default::default()
        };
        Engine::new(
            config,
            store,
            Arc::new(SequentialIdProvider::new("id")),
            Arc::new(ManualTimeProvider::new(1_000)),
        )
        .unwrap()
    }

    async fn wait_terminal(engine: &Engine, id: &String) -> JobStatus {
        for _ in 0..200 {
            let status = engine.jobs().get_status(id).await.unwrap().status;
            if status.is_terminal() {
                return status;
            }
            sleep(Duration::from_millis(10)).await;
        }
        engine.jobs().get_status(id).await.unwrap().status
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store = Arc::new(InMemoryJobStore::new(Arc::new(ManualTimeProvider::new(0))));
        let config = EngineConfig {
            max_concurrent_jobs: 0,
            ..Default::default()
        };
        let result = Engine::new(
            config,
            store,
            Arc::new(SequentialIdProvider::new("id")),
            Arc::new(ManualTimeProvider::new(0)),
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_submitted_job_completes_after_init() {
        let store = Arc::new(InMemoryJobStore::new(Arc::new(ManualTimeProvider::new(0))));
        let engine = engine(store);
        let service_id = engine
            .register_service(
                ServiceType::Image,
                MockMediaService::new_success("thumbnailer"),
                ServiceConfig::default(),
                HashMap::new(),
            )
            .await;

        let id = engine
            .jobs()
            .submit(JobSpec::new(JobType::Image, serde_json::json!({"src": "a.png"})))
            .await
            .unwrap();
        engine.init().await.unwrap();

        assert_eq!(wait_terminal(&engine, &id).await, JobStatus::Completed);
        let job = engine.jobs().get_status(&id).await.unwrap();
        assert_eq!(job.service_id.as_deref(), Some(service_id.as_str()));
        assert_eq!(job.attempts, 1);

        assert!(engine.shutdown().await.is_empty());
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_init_recovers_jobs_from_store() {
        let store = Arc::new(InMemoryJobStore::new(Arc::new(ManualTimeProvider::new(0))));
        let mut orphan = crate::domain::Job::new(
            "orphan",
            10,
            JobSpec::new(JobType::Audio, serde_json::json!({})).with_priority(Priority::High),
        );
        orphan.start(20).unwrap();
        store.save(&orphan).await.unwrap();

        let engine = engine(store);
        engine
            .register_service(
                ServiceType::Audio,
                MockMediaService::new_success("mixer"),
                ServiceConfig::default(),
                HashMap::new(),
            )
            .await;

        let report = engine.init().await.unwrap();
        assert_eq!(report, RecoveryReport { requeued: 1, enqueued: 1 });
        assert_eq!(
            wait_terminal(&engine, &"orphan".to_string()).await,
            JobStatus::Completed
        );

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_double_init_and_repeated_shutdown() {
        let store = Arc::new(InMemoryJobStore::new(Arc::new(ManualTimeProvider::new(0))));
        let engine = engine(store);

        assert_ok!(engine.init().await);
        assert!(engine.is_running().await);
        let err = assert_err!(engine.init().await);
        assert!(matches!(err, AppError::InvalidState(_)));

        engine.shutdown().await;
        engine.shutdown().await;
        assert!(engine.registry().list_services().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_reports_cleanup_failures() {
        let store = Arc::new(InMemoryJobStore::new(Arc::new(ManualTimeProvider::new(0))));
        let engine = engine(store);
        let service = MockMediaService::new_success("leaky");
        service.set_cleanup_fails(true);
        engine
            .register_service(
                ServiceType::Storage,
                service.clone(),
                ServiceConfig::default(),
                HashMap::new(),
            )
            .await;

        engine.init().await.unwrap();
        let failures = engine.shutdown().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(service.cleanup_calls(), 1);
    }
}
