use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::analytics::{DispatcherConfig, TelemetryDispatcher, WorkerPool};
use crate::config::{GeoipConfig, get_config};
use crate::errors::GeotrailError;
use crate::services::{DatasetLoader, Forwarder, HttpForwarder, Resolver};
use crate::storage::StorageFactory;

pub struct StartupContext {
    pub dispatcher: TelemetryDispatcher,
    pub workers: Option<WorkerPool>,
    pub forwarder: Arc<dyn Forwarder>,
}

/// 加载区间数据集（任何 LoadError 都是致命的）
pub async fn load_resolver(config: &GeoipConfig) -> Result<Resolver> {
    let path = config.dataset_path.clone();
    let loader = DatasetLoader::new(config.progress_step_percent);

    let (table, summary) = tokio::task::spawn_blocking(move || loader.load_path(&path))
        .await
        .context("Dataset loader task panicked")?
        .map_err(GeotrailError::from)
        .with_context(|| format!("Failed to load IP range dataset {}", config.dataset_path))?;

    if table.is_empty() {
        warn!("IP range dataset is empty, every address will resolve to an unknown location");
    }
    debug!(
        "Dataset summary: {} rows, {} skipped",
        summary.rows,
        summary.skipped()
    );
    Ok(Resolver::new(Arc::new(table)))
}

/// 准备服务器启动的上下文：数据集、存储、遥测 worker、转发器
pub async fn prepare_server_startup() -> Result<StartupContext> {
    let start_time = std::time::Instant::now();
    debug!("Starting pre-startup processing...");

    let config = get_config();
    config.validate().context("Invalid configuration")?;

    let resolver = load_resolver(&config.geoip).await?;

    let (dispatcher, workers) = if config.telemetry.enabled {
        let storage = StorageFactory::create()
            .await
            .context("Failed to create storage backend")?;
        info!("Using storage backend: {}", storage.backend_name());

        let dispatcher_config = DispatcherConfig {
            queue_capacity: config.telemetry.queue_capacity,
            workers: config.telemetry.workers,
            persist_timeout: Duration::from_millis(config.telemetry.persist_timeout_ms),
        };
        let (dispatcher, workers) = TelemetryDispatcher::spawn(
            dispatcher_config,
            resolver,
            storage.as_access_log_sink(),
        );
        (dispatcher, Some(workers))
    } else {
        warn!("Telemetry disabled, requests are proxied without access logs");
        (TelemetryDispatcher::disabled(), None)
    };

    let forwarder = HttpForwarder::new(
        &config.upstream.target,
        Duration::from_secs(config.upstream.timeout_secs),
    )
    .context("Failed to build upstream forwarder")?;
    info!("Forwarding requests to {}", config.upstream.target);

    debug!("Pre-startup completed in {:.2?}", start_time.elapsed());

    Ok(StartupContext {
        dispatcher,
        workers,
        forwarder: Arc::new(forwarder),
    })
}
