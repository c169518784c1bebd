//! JSON-RPC round trip against a running engine

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::HttpClientBuilder;
use jsonrpsee::rpc_params;
use mediaflow_api_rpc::types::{StatsResponse, StatusResponse, SubmitResponse};
use mediaflow_api_rpc::{RpcServer, RpcServerConfig};
use mediaflow_core::application::{Engine, ServiceConfig};
use mediaflow_core::domain::{JobStatus, ServiceType};
use mediaflow_core::infrastructure::InMemoryJobStore;
use mediaflow_core::port::id_provider::UuidProvider;
use mediaflow_core::port::media_service::mocks::MockMediaService;
use mediaflow_core::port::time_provider::SystemTimeProvider;
use mediaflow_core::EngineConfig;
use serde_json::json;

#[tokio::test]
async fn test_submit_and_poll_until_completed() {
    let config = EngineConfig {
        processing_interval_ms: 10,
        ..Default::default()
    };
    let engine = Arc::new(
        Engine::new(
            config,
            Arc::new(InMemoryJobStore::new(Arc::new(SystemTimeProvider))),
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
        )
        .unwrap(),
    );
    let service = MockMediaService::new_success("narrator");
    engine
        .register_service(ServiceType::Audio, service.clone(), ServiceConfig::default(), HashMap::new())
        .await;
    engine.init().await.unwrap();

    let rpc = RpcServerConfig {
        port: 0,
        ..Default::default()
    };
    let (addr, handle) = RpcServer::new(rpc, engine.clone()).start().await.unwrap();
    let client = HttpClientBuilder::default()
        .build(format!("http://{}", addr))
        .unwrap();

    let submitted: SubmitResponse = client
        .request(
            "media.submit.v1",
            rpc_params![json!({
                "job_type": "audio",
                "priority": "urgent",
                "owner_id": "podcast-42",
                "payload": {"script": "Welcome back"}
            })],
        )
        .await
        .unwrap();

    let mut status = JobStatus::Queued;
    for _ in 0..300 {
        let response: StatusResponse = client
            .request("media.status.v1", rpc_params![json!({"job_id": submitted.job_id})])
            .await
            .unwrap();
        status = response.job.status;
        if status.is_terminal() {
            assert_eq!(response.job.result, Some(json!({"ok": true})));
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(service.process_calls(), 1);

    let stats: StatsResponse = client.request("admin.stats.v1", rpc_params![]).await.unwrap();
    assert_eq!(stats.engine.jobs.completed, 1);
    assert_eq!(stats.engine.queue.total, 0);

    handle.stop().unwrap();
    assert!(engine.shutdown().await.is_empty());
}
