//! Server mode
//!
//! Every request goes through the telemetry middleware and is routed to the
//! proxy handler via `default_service`.

use std::time::Duration;

use actix_web::{App, HttpServer, middleware::Condition, web};
use anyhow::{Context, Result};
use tracing::warn;

use crate::api::middleware::TelemetryMiddleware;
use crate::api::services::ProxyService;
use crate::config::get_config;
use crate::runtime::lifetime;

/// Run the HTTP server
///
/// **Note**: Logging system must be initialized before calling this function
pub async fn run_server() -> Result<()> {
    let startup = lifetime::startup::prepare_server_startup()
        .await
        .inspect_err(|e| tracing::error!("Server startup failed: {:#}", e))?;

    let config = get_config();
    let telemetry_enabled = config.telemetry.enabled;
    let trusted_proxies = config.telemetry.trusted_proxies.clone();
    let max_body_bytes = config.upstream.max_body_bytes;

    if telemetry_enabled && trusted_proxies.is_empty() {
        warn!("No trusted proxies configured, X-Forwarded-For is always honoured");
    }

    let dispatcher = startup.dispatcher.clone();
    let forwarder = web::Data::new(startup.forwarder.clone());

    let cpu_count = config.server.cpu_count.clamp(1, 32);
    warn!("Using {} CPU cores for the server", cpu_count);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Condition::new(
                telemetry_enabled,
                TelemetryMiddleware::new(dispatcher.clone(), trusted_proxies.clone()),
            ))
            .app_data(forwarder.clone())
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .default_service(web::to(ProxyService::handle))
    })
    .keep_alive(Duration::from_secs(30))
    .workers(cpu_count);

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    warn!("Starting proxy at http://{}", bind_address);
    let server = server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .disable_signals()
        .run();
    let handle = server.handle();

    let served = tokio::select! {
        res = server => res.context("HTTP server exited with an error"),
        _ = lifetime::shutdown::listen_for_shutdown() => {
            handle.stop(true).await;
            Ok(())
        }
    };

    lifetime::shutdown::finish_serving(
        served,
        startup.workers,
        Duration::from_secs(config.telemetry.shutdown_timeout_secs),
    )
    .await?;
    warn!("Graceful shutdown completed");

    Ok(())
}
