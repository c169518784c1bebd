// Service Registry
// Tracks processing services, health-checks them periodically and serves discovery

use crate::application::shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::domain::ServiceType;
use crate::port::{IdProvider, MediaService, ServiceCapabilities, TimeProvider};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::application::constants::TASK_JOIN_TIMEOUT;

/// Per-registration settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Higher is preferred during discovery
    #[serde(default)]
    pub priority: i32,
}

/// A registered service instance and its health record
#[derive(Clone)]
pub struct ServiceRegistration {
    pub service_id: String,
    pub service_type: ServiceType,
    pub instance: Arc<dyn MediaService>,
    pub config: ServiceConfig,
    pub metadata: HashMap<String, String>,
    pub healthy: bool,
    pub registered_at: i64,
    pub last_health_check: Option<i64>,
    pub last_health_message: Option<String>,
    pub consecutive_failures: u32,
}

/// Serializable view of a registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_id: String,
    pub service_type: ServiceType,
    pub name: String,
    pub healthy: bool,
    pub priority: i32,
    pub metadata: HashMap<String, String>,
    pub registered_at: i64,
    pub last_health_check: Option<i64>,
    pub last_health_message: Option<String>,
    pub consecutive_failures: u32,
    pub supported_types: Vec<String>,
    pub capabilities: ServiceCapabilities,
}

impl From<&ServiceRegistration> for ServiceInfo {
    fn from(reg: &ServiceRegistration) -> Self {
        Self {
            service_id: reg.service_id.clone(),
            service_type: reg.service_type,
            name: reg.instance.name().to_string(),
            healthy: reg.healthy,
            priority: reg.config.priority,
            metadata: reg.metadata.clone(),
            registered_at: reg.registered_at,
            last_health_check: reg.last_health_check,
            last_health_message: reg.last_health_message.clone(),
            consecutive_failures: reg.consecutive_failures,
            supported_types: reg.instance.supported_types(),
            capabilities: reg.instance.capabilities(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeHealth {
    pub total: usize,
    pub healthy: usize,
}

/// Aggregate health for external monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub by_type: BTreeMap<ServiceType, TypeHealth>,
}

struct Monitor {
    shutdown: ShutdownSender,
    handle: JoinHandle<()>,
}

/// Service registry
///
/// Never holds the map lock across a call into a service.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceRegistration>>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    check_interval: Duration,
    check_timeout: Duration,
    monitor: Mutex<Option<Monitor>>,
}

impl ServiceRegistry {
    /// Create a new registry
    ///
    /// # Arguments
    /// * `check_interval` - Period of the background health monitor
    /// * `check_timeout` - Bound for a single `health_check` call
    pub fn new(
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        check_interval: Duration,
        check_timeout: Duration,
    ) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            id_provider,
            time_provider,
            check_interval,
            check_timeout,
            monitor: Mutex::new(None),
        }
    }

    /// Register a service and run its first health check before returning
    pub async fn register_service(
        &self,
        service_type: ServiceType,
        instance: Arc<dyn MediaService>,
        config: ServiceConfig,
        metadata: HashMap<String, String>,
    ) -> String {
        let service_id = format!("{}-{}", service_type, self.id_provider.generate_id());
        let name = instance.name().to_string();

        let registration = ServiceRegistration {
            service_id: service_id.clone(),
            service_type,
            instance,
            config,
            metadata,
            healthy: false,
            registered_at: self.time_provider.now_millis(),
            last_health_check: None,
            last_health_message: None,
            consecutive_failures: 0,
        };
        self.services
            .write()
            .await
            .insert(service_id.clone(), registration);

        let healthy = self.perform_health_check(&service_id).await;
        info!(
            service_id = %service_id,
            service_type = %service_type,
            name = %name,
            healthy,
            "Service registered"
        );
        service_id
    }

    /// Remove a service and run its cleanup hook
    pub async fn unregister_service(&self, service_id: &str) -> bool {
        let removed = self.services.write().await.remove(service_id);

        match removed {
            Some(reg) => {
                if let Err(e) = reg.instance.cleanup().await {
                    error!(service_id, error = %e, "Service cleanup failed during unregister");
                }
                info!(service_id, "Service unregistered");
                true
            }
            None => false,
        }
    }

    pub async fn get_service(&self, service_id: &str) -> Option<ServiceRegistration> {
        self.services.read().await.get(service_id).cloned()
    }

    /// All services of a type, healthy or not
    pub async fn get_services_by_type(&self, service_type: ServiceType) -> Vec<ServiceRegistration> {
        let mut found: Vec<ServiceRegistration> = self
            .services
            .read()
            .await
            .values()
            .filter(|reg| reg.service_type == service_type)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.service_id.cmp(&b.service_id))
        });
        found
    }

    pub async fn get_healthy_services(&self, service_type: ServiceType) -> Vec<ServiceRegistration> {
        self.get_services_by_type(service_type)
            .await
            .into_iter()
            .filter(|reg| reg.healthy)
            .collect()
    }

    /// Healthy services ordered by priority (desc), then registration time
    pub async fn select_services(&self, service_type: ServiceType) -> Vec<ServiceRegistration> {
        let mut healthy = self.get_healthy_services(service_type).await;
        // Stable sort keeps registration order among equal priorities
        healthy.sort_by(|a, b| b.config.priority.cmp(&a.config.priority));
        healthy
    }

    pub async fn update_priority(&self, service_id: &str, priority: i32) -> bool {
        match self.services.write().await.get_mut(service_id) {
            Some(reg) => {
                reg.config.priority = priority;
                true
            }
            None => false,
        }
    }

    /// Check one service; panics, failures, errors and timeouts all mark it unhealthy
    pub async fn perform_health_check(&self, service_id: &str) -> bool {
        let instance = match self.services.read().await.get(service_id) {
            Some(reg) => Arc::clone(&reg.instance),
            None => return false,
        };

        // Run on its own task so a panicking backend cannot take the registry down
        let mut handle = tokio::spawn(async move { instance.health_check().await });
        let (healthy, message) = match timeout(self.check_timeout, &mut handle).await {
            Ok(Ok(Ok(report))) => (report.healthy, report.message),
            Ok(Ok(Err(e))) => (false, Some(e.to_string())),
            Ok(Err(join_err)) => {
                error!(service_id, error = %join_err, "Health check task failed");
                let reason = if join_err.is_panic() {
                    "health check panicked"
                } else {
                    "health check cancelled"
                };
                (false, Some(reason.to_string()))
            }
            Err(_) => {
                handle.abort();
                (
                    false,
                    Some(format!(
                        "health check timed out after {}ms",
                        self.check_timeout.as_millis()
                    )),
                )
            }
        };

        let now = self.time_provider.now_millis();
        let mut services = self.services.write().await;
        // Unregistered while the check was in flight
        let Some(reg) = services.get_mut(service_id) else {
            return false;
        };

        let was_healthy = reg.healthy;
        reg.healthy = healthy;
        reg.last_health_check = Some(now);
        reg.last_health_message = message;
        if healthy {
            reg.consecutive_failures = 0;
        } else {
            reg.consecutive_failures += 1;
        }

        if was_healthy && !healthy {
            warn!(
                service_id,
                reason = ?reg.last_health_message,
                "Service became unhealthy"
            );
        } else if !was_healthy && healthy {
            info!(service_id, "Service is healthy");
        }
        healthy
    }

    /// Check every service concurrently, waiting for all to settle
    pub async fn perform_all_health_checks(&self) -> HashMap<String, bool> {
        let ids: Vec<String> = self.services.read().await.keys().cloned().collect();

        let checks = ids.into_iter().map(|id| async move {
            let healthy = self.perform_health_check(&id).await;
            (id, healthy)
        });
        join_all(checks).await.into_iter().collect()
    }

    /// Cleanup and re-check every unhealthy service; returns how many recovered
    pub async fn restart_unhealthy_services(&self) -> usize {
        let unhealthy: Vec<(String, Arc<dyn MediaService>)> = self
            .services
            .read()
            .await
            .values()
            .filter(|reg| !reg.healthy)
            .map(|reg| (reg.service_id.clone(), Arc::clone(&reg.instance)))
            .collect();

        let mut recovered = 0;
        for (service_id, instance) in unhealthy {
            if let Err(e) = instance.cleanup().await {
                warn!(service_id = %service_id, error = %e, "Cleanup before restart failed");
            }
            if self.perform_health_check(&service_id).await {
                info!(service_id = %service_id, "Service restarted");
                recovered += 1;
            }
        }
        recovered
    }

    pub async fn health_summary(&self) -> HealthSummary {
        let services = self.services.read().await;
        let mut summary = HealthSummary::default();

        for reg in services.values() {
            summary.total += 1;
            let entry = summary.by_type.entry(reg.service_type).or_default();
            entry.total += 1;
            if reg.healthy {
                summary.healthy += 1;
                entry.healthy += 1;
            } else {
                summary.unhealthy += 1;
            }
        }
        summary
    }

    pub async fn list_services(&self) -> Vec<ServiceInfo> {
        let mut infos: Vec<ServiceInfo> = self
            .services
            .read()
            .await
            .values()
            .map(ServiceInfo::from)
            .collect();
        infos.sort_by(|a, b| {
            a.service_type
                .cmp(&b.service_type)
                .then_with(|| a.registered_at.cmp(&b.registered_at))
                .then_with(|| a.service_id.cmp(&b.service_id))
        });
        infos
    }

    /// Spawn the periodic health monitor (no-op if already running)
    pub async fn start(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }

        let (shutdown, token) = shutdown_channel();
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move { registry.monitor_loop(token).await });

        info!(
            interval_ms = self.check_interval.as_millis() as u64,
            "Health monitor started"
        );
        *monitor = Some(Monitor { shutdown, handle });
    }

    /// Stop the monitor and clean up every service.
    ///
    /// Cleanup failures are logged and returned, never propagated.
    pub async fn shutdown(&self) -> Vec<String> {
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.shutdown.shutdown();
            if timeout(TASK_JOIN_TIMEOUT, monitor.handle).await.is_err() {
                warn!("Health monitor did not stop in time");
            }
        }

        let drained: Vec<ServiceRegistration> =
            self.services.write().await.drain().map(|(_, reg)| reg).collect();

        let results = join_all(drained.iter().map(|reg| async move {
            reg.instance
                .cleanup()
                .await
                .map_err(|e| format!("{}: {}", reg.service_id, e))
        }))
        .await;

        let failures: Vec<String> = results.into_iter().filter_map(|r| r.err()).collect();
        for failure in &failures {
            error!(error = %failure, "Service cleanup failed during shutdown");
        }
        info!(
            services = drained.len(),
            failures = failures.len(),
            "Service registry shut down"
        );
        failures
    }

    async fn monitor_loop(&self, mut shutdown: ShutdownToken) {
        let mut tick = interval(self.check_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; registration already checked
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let results = self.perform_all_health_checks().await;
                    let unhealthy = results.values().filter(|healthy| !**healthy).count();
                    debug!(checked = results.len(), unhealthy, "Health check cycle complete");
                }
                _ = shutdown.wait() => {
                    info!("Health monitor stopping");
                    break;
                }
            }
        }
    }
}
