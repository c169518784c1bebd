//! Mediaflow Dispatch Engine - Main Entry Point
//! Composition root: settings, logging, store, backends, engine, JSON-RPC

mod settings;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use mediaflow_api_rpc::RpcServer;
use mediaflow_core::application::Engine;
use mediaflow_core::domain::ServiceType;
use mediaflow_core::infrastructure::InMemoryJobStore;
use mediaflow_core::port::id_provider::UuidProvider;
use mediaflow_core::port::time_provider::SystemTimeProvider;
use mediaflow_core::port::{JobStore, TimeProvider};
use mediaflow_infra_media::{CommandRunner, ImageService, TranscodeKind, TranscodeService};
use mediaflow_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use settings::{DaemonSettings, LogFormat, LogSettings, MediaSettings};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str = "mediaflow=info";
const IMAGE_BINARY: &str = "magick";
const FFMPEG_BINARY: &str = "ffmpeg";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let settings = DaemonSettings::load().context("Failed to load settings")?;

    // 2. Initialize logging; the guard flushes the file writer on exit
    let _log_guard = init_logging(&settings.log)?;
    info!("Mediaflow dispatch engine v{} starting...", VERSION);

    // 3. Select the job store
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = open_store(&settings.database_url, time_provider.clone()).await?;

    // 4. Build the engine and register backends
    let engine = Arc::new(
        Engine::new(
            settings.engine.clone(),
            store,
            Arc::new(UuidProvider),
            time_provider,
        )
        .context("Invalid engine configuration")?,
    );
    register_backends(&engine, &settings.media).await;

    // 5. Recover the queue and start background tasks
    let report = engine.init().await.context("Engine start failed")?;
    info!(
        requeued = report.requeued,
        enqueued = report.enqueued,
        "Queue recovered"
    );

    // 6. Start JSON-RPC server
    let (addr, rpc_handle) = RpcServer::new(settings.rpc.clone(), engine.clone())
        .start()
        .await
        .context("RPC server start failed")?;

    info!(addr = %addr, "System ready. Waiting for jobs...");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown: stop accepting requests, then drain the engine
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server already stopped");
    }
    for failure in engine.shutdown().await {
        warn!(failure = %failure, "Service cleanup failed");
    }

    info!("Shutdown complete.");
    Ok(())
}

fn init_logging(log: &LogSettings) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;

    let (file_layer, guard) = match &log.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &log.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = match log.format {
        // Production: JSON structured logging
        LogFormat::Json => fmt::layer().json().boxed(),
        // Development: pretty formatting with colors
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

async fn open_store(
    database_url: &str,
    time_provider: Arc<dyn TimeProvider>,
) -> Result<Arc<dyn JobStore>> {
    if database_url == settings::MEMORY_DATABASE {
        warn!("Using in-memory job store; jobs are lost on restart");
        return Ok(Arc::new(InMemoryJobStore::new(time_provider)));
    }

    info!(database_url = %database_url, "Initializing database...");
    let pool = create_pool(database_url)
        .await
        .context("DB pool creation failed")?;
    let version = run_migrations(&pool).await.context("Migration failed")?;
    info!(schema_version = version, "Database ready");

    Ok(Arc::new(SqliteJobStore::new(pool, time_provider)))
}

async fn register_backends(engine: &Engine, media: &MediaSettings) {
    let runner = CommandRunner::new(
        media.env_allowlist.clone(),
        Duration::from_millis(media.command_timeout_ms),
    );

    if media.image.enabled {
        let service = ImageService::new(runner.clone(), media.image.binary_or(IMAGE_BINARY));
        engine
            .register_service(
                ServiceType::Image,
                Arc::new(service),
                media.image.service_config(),
                HashMap::from([("tool".to_string(), "imagemagick".to_string())]),
            )
            .await;
    }

    let transcoders = [
        (TranscodeKind::Audio, ServiceType::Audio, &media.audio),
        (TranscodeKind::Video, ServiceType::Video, &media.video),
    ];
    for (kind, service_type, backend) in transcoders {
        if !backend.enabled {
            continue;
        }
        let service = TranscodeService::new(kind, runner.clone(), backend.binary_or(FFMPEG_BINARY));
        engine
            .register_service(
                service_type,
                Arc::new(service),
                backend.service_config(),
                HashMap::from([("tool".to_string(), "ffmpeg".to_string())]),
            )
            .await;
    }
}
