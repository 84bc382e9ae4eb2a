//! Metrics Rendering Handler - Prometheus Text Exposition
//!
//! Serializes a [`MetricsRegistry`] into the text format (version
//! 0.0.4) and serves it, either as a route the application mounts on
//! its own router or on a dedicated listener.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::Router;
use prometheus::{Encoder, TextEncoder, TEXT_FORMAT};
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use super::registry::MetricsRegistry;
use crate::error::ExporterError;

/// Content type of the rendered body.
pub const CONTENT_TYPE: &str = TEXT_FORMAT;

/// Render the current registry state as exposition text.
///
/// Read-only with respect to the registry.
pub fn render(registry: &MetricsRegistry) -> Result<String, ExporterError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| ExporterError::Encode(e.to_string()))
}

/// Build the scrape response for one request.
///
/// An encoding failure becomes a logged `500`.
pub fn scrape(registry: &MetricsRegistry) -> Response {
    match render(registry) {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics").into_response()
        }
    }
}

/// GET handler for the application's router.
///
/// ```ignore
/// let app = Router::new().route("/metrics", metrics_route(registry.clone()));
/// ```
pub fn metrics_route<S>(registry: MetricsRegistry) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    get(move || {
        let registry = registry.clone();
        async move { scrape(&registry) }
    })
}

/// Serve only the metrics route on its own listener.
///
/// Runs until `shutdown_rx` fires.
#[instrument(skip(registry, shutdown_rx))]
pub async fn serve_metrics(
    registry: MetricsRegistry,
    bind_address: String,
    path: String,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = Router::new().route(&path, metrics_route(registry));

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, path = %path, "Prometheus metrics server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    info!("Prometheus metrics server stopped");
    Ok(())
}
