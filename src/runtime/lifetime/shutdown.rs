use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};

use crate::analytics::WorkerPool;

/// 等待 Ctrl+C
pub async fn listen_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping server..."),
        Err(e) => warn!(
            "Failed to listen for Ctrl+C: {}. Proceeding with shutdown anyway.",
            e
        ),
    }
}

/// 排空遥测队列，最多等待 `timeout`
pub async fn drain_telemetry(workers: Option<WorkerPool>, timeout: Duration) {
    let Some(workers) = workers else {
        info!("Telemetry is disabled, nothing to drain");
        return;
    };

    let stats = workers.shutdown(timeout).await;
    if stats.dropped > 0 || stats.failed > 0 || stats.abandoned > 0 {
        warn!(
            "{} request events were dropped, {} failed to persist and {} were abandoned during this run",
            stats.dropped, stats.failed, stats.abandoned
        );
    }
}

/// 服务器退出后的收尾：无论服务器是否出错都先排空队列，再返回服务器的结果
pub async fn finish_serving(
    served: anyhow::Result<()>,
    workers: Option<WorkerPool>,
    timeout: Duration,
) -> anyhow::Result<()> {
    if let Err(ref e) = served {
        warn!("Server stopped with an error, draining telemetry first: {:#}", e);
    }
    drain_telemetry(workers, timeout).await;
    served
}
