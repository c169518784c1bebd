//! JSON-RPC Server
//!
//! Serves the engine over JSON-RPC 2.0 on localhost TCP.

use crate::handler::{parse_params, RpcHandler};
use crate::types::{CircuitResetRequest, JobRequest, ListRequest, PriorityRequest, SubmitRequest};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use mediaflow_core::application::Engine;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9530;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Failed to register method: {0}")]
    Register(String),
}

/// RPC Server Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcServerConfig {
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, engine: Arc<Engine>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(engine)),
        }
    }

    /// Register every method on a fresh module
    pub fn build_module(handler: Arc<RpcHandler>) -> Result<RpcModule<()>, ServerError> {
        let mut module = RpcModule::new(());

        let h = handler.clone();
        module
            .register_async_method("media.submit.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: SubmitRequest = parse_params(params)?;
                    handler.submit(req).await
                }
            })
            .map_err(|e| ServerError::Register(e.to_string()))?;

        let h = handler.clone();
        module
            .register_async_method("media.status.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: JobRequest = parse_params(params)?;
                    handler.status(req).await
                }
            })
            .map_err(|e| ServerError::Register(e.to_string()))?;

        let h = handler.clone();
        module
            .register_async_method("media.cancel.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: JobRequest = parse_params(params)?;
                    handler.cancel(req).await
                }
            })
            .map_err(|e| ServerError::Register(e.to_string()))?;

        let h = handler.clone();
        module
            .register_async_method("media.list.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: ListRequest = parse_params(params)?;
                    handler.list(req).await
                }
            })
            .map_err(|e| ServerError::Register(e.to_string()))?;

        let h = handler.clone();
        module
            .register_async_method("media.priority.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: PriorityRequest = parse_params(params)?;
                    handler.update_priority(req).await
                }
            })
            .map_err(|e| ServerError::Register(e.to_string()))?;

        // Admin APIs
        let h = handler.clone();
        module
            .register_async_method("admin.stats.v1", move |_, _, _| {
                let handler = h.clone();
                async move { handler.stats().await }
            })
            .map_err(|e| ServerError::Register(e.to_string()))?;

        let h = handler.clone();
        module
            .register_async_method("admin.services.v1", move |_, _, _| {
                let handler = h.clone();
                async move { handler.services().await }
            })
            .map_err(|e| ServerError::Register(e.to_string()))?;

        let h = handler;
        module
            .register_async_method("admin.circuit_reset.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: CircuitResetRequest = parse_params(params)?;
                    handler.circuit_reset(req).await
                }
            })
            .map_err(|e| ServerError::Register(e.to_string()))?;

        Ok(module)
    }

    /// Start the JSON-RPC server
    ///
    /// Security: binds to the configured host only (localhost by default)
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let module = Self::build_module(self.handler)?;

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = server.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, server.start(module)))
    }
}
