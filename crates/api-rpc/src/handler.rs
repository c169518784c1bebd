//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{invalid_params, to_rpc_error};
use crate::types::{
    CancelResponse, CircuitResetRequest, CircuitResetResponse, JobRequest, ListRequest,
    ListResponse, PriorityRequest, PriorityResponse, ServicesResponse, StatsResponse,
    StatusResponse, SubmitRequest, SubmitResponse,
};
use jsonrpsee::types::{ErrorObjectOwned, Params};
use mediaflow_core::application::Engine;
use mediaflow_core::domain::JobStatus;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Accept `{...}`, `[{...}]` or no params at all
pub fn parse_params<T: DeserializeOwned>(params: Params<'_>) -> Result<T, ErrorObjectOwned> {
    let value: serde_json::Value = params.parse()?;

    let value = match value {
        serde_json::Value::Array(mut items) if items.len() == 1 => items.remove(0),
        serde_json::Value::Array(items) if items.is_empty() => serde_json::json!({}),
        serde_json::Value::Null => serde_json::json!({}),
        other => other,
    };
    serde_json::from_value(value).map_err(|e| invalid_params(e.to_string()))
}

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    engine: Arc<Engine>,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
        }
    }

    /// media.submit.v1
    pub async fn submit(&self, params: SubmitRequest) -> Result<SubmitResponse, ErrorObjectOwned> {
        let priority = params.priority;
        let job_id = self.engine.jobs().submit(params).await.map_err(to_rpc_error)?;

        Ok(SubmitResponse {
            job_id,
            status: JobStatus::Queued,
            priority,
        })
    }

    /// media.status.v1
    pub async fn status(&self, params: JobRequest) -> Result<StatusResponse, ErrorObjectOwned> {
        let job = self
            .engine
            .jobs()
            .get_status(&params.job_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(StatusResponse { job })
    }

    /// media.cancel.v1
    pub async fn cancel(&self, params: JobRequest) -> Result<CancelResponse, ErrorObjectOwned> {
        let cancelled = self
            .engine
            .jobs()
            .cancel(&params.job_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(CancelResponse {
            job_id: params.job_id,
            cancelled,
        })
    }

    /// media.list.v1
    pub async fn list(&self, params: ListRequest) -> Result<ListResponse, ErrorObjectOwned> {
        let jobs = self.engine.jobs().list(params).await.map_err(to_rpc_error)?;
        Ok(ListResponse {
            count: jobs.len(),
            jobs,
        })
    }

    /// media.priority.v1
    pub async fn update_priority(
        &self,
        params: PriorityRequest,
    ) -> Result<PriorityResponse, ErrorObjectOwned> {
        let job = self
            .engine
            .jobs()
            .update_priority(&params.job_id, params.priority)
            .await
            .map_err(to_rpc_error)?;

        Ok(PriorityResponse {
            job_id: job.id,
            priority: job.priority,
        })
    }

    /// admin.stats.v1
    pub async fn stats(&self) -> Result<StatsResponse, ErrorObjectOwned> {
        let engine = self.engine.jobs().stats().await.map_err(to_rpc_error)?;

        Ok(StatsResponse {
            engine,
            errors: self.engine.errors().stats(),
            in_flight: self.engine.dispatcher().in_flight(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }

    /// admin.services.v1
    pub async fn services(&self) -> Result<ServicesResponse, ErrorObjectOwned> {
        let registry = self.engine.registry();
        Ok(ServicesResponse {
            summary: registry.health_summary().await,
            services: registry.list_services().await,
            circuits: self.engine.breakers().all_stats(),
        })
    }

    /// admin.circuit_reset.v1
    pub async fn circuit_reset(
        &self,
        params: CircuitResetRequest,
    ) -> Result<CircuitResetResponse, ErrorObjectOwned> {
        let breakers = self.engine.breakers();

        let reset = match params.context {
            Some(context) => {
                if !breakers.reset(&context) {
                    return Err(to_rpc_error(
                        mediaflow_core::AppError::NotFound(format!("circuit {}", context)),
                    ));
                }
                1
            }
            None => {
                let count = breakers.all_stats().len();
                breakers.reset_all();
                count
            }
        };

        info!(reset, "Circuit breakers reset via RPC");
        Ok(CircuitResetResponse { reset })
    }
}
