//! Prometheus HTTP Exporter — Demo Entry Point
//!
//! Serves a small instrumented API together with its own metrics and
//! makes one traced outbound call against itself. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load exporter.toml (defaults when absent) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Register server + client families on one registry
//! 4. Mount `/hello`, `/path/:value` and the metrics route behind the layer
//! 5. Build a traced reqwest session with the Prometheus hook set
//! 6. Serve, self-check once, wait for SIGINT → graceful shutdown

use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use prom_http_exporter::config::loader::load_config_or_default;
use prom_http_exporter::{
  metrics_route, ClientMetrics, MetricsRegistry, ServerMetrics, TracedClientBuilder,
};

#[tokio::main]
async fn main() -> Result<()> {
  // ── 1. Load configuration ───────────────────────────────
  let config = load_config_or_default("exporter.toml").context("Failed to load configuration")?;

  // ── 2. Initialize structured JSON logging ───────────────
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.exporter.log_level)),
    )
    .json()
    .init();

  info!(
    version = env!("CARGO_PKG_VERSION"),
    bind_address = %config.exporter.bind_address,
    metrics_path = %config.exporter.metrics_path,
    "Starting Prometheus HTTP exporter"
  );

  // ── 3. Metric families ──────────────────────────────────
  let registry = MetricsRegistry::new();
  let server_metrics = ServerMetrics::register(&registry, &config.server)
    .context("Failed to register server metrics")?;
  let client_metrics = ClientMetrics::register(&registry, &config.client)
    .context("Failed to register client metrics")?;

  // ── 4. Instrumented router ──────────────────────────────
  let app = Router::new()
    .route("/hello", get(|| async { "Hello, world!" }))
    .route("/path/:value", get(echo))
    .route(&config.exporter.metrics_path, metrics_route(registry.clone()))
    .layer(server_metrics.layer());

  // ── 5. Traced outbound session ──────────────────────────
  let client = TracedClientBuilder::from_config(&config.client)
    .trace(client_metrics.trace(config.client.client_name.clone())?)
    .build()
    .context("Failed to build traced client")?;

  // ── 6. Serve ────────────────────────────────────────────
  let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

  let listener = tokio::net::TcpListener::bind(&config.exporter.bind_address)
    .await
    .with_context(|| format!("Failed to bind {}", config.exporter.bind_address))?;
  let port = listener.local_addr()?.port();
  info!(port, "Listening");

  let server_handle = tokio::spawn(async move {
    axum::serve(listener, app)
      .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
      })
      .await
  });

  let self_check = format!("http://127.0.0.1:{port}/hello");
  match client.get(&self_check).await {
    Ok(response) => info!(status = %response.status(), url = %self_check, "Self-check done"),
    Err(e) => warn!(error = %e, url = %self_check, "Self-check failed"),
  }

  signal::ctrl_c().await.context("Failed to listen for SIGINT")?;
  info!("SIGINT received, initiating graceful shutdown");
  let _ = shutdown_tx.send(());

  match tokio::time::timeout(Duration::from_secs(10), server_handle).await {
    Ok(Ok(Ok(()))) => {}
    Ok(Ok(Err(e))) => warn!(error = %e, "Server stopped with error"),
    Ok(Err(e)) => warn!(error = %e, "Server task failed"),
    Err(_) => warn!("Server did not stop within 10s"),
  }

  info!("Shutdown complete");
  Ok(())
}

async fn echo(Path(value): Path<String>) -> Json<Value> {
  Json(json!({ "value": value }))
}
