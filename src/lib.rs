//! Prometheus HTTP Exporter — Library Root
//!
//! Instruments an axum/tower server and a reqwest client with
//! Prometheus request metrics and serves them in the text exposition
//! format.
//!
//! ```ignore
//! let registry = MetricsRegistry::new();
//! let server = ServerMetrics::register(&registry, &config.server)?;
//! let app = Router::new()
//!     .route("/hello", get(hello))
//!     .route("/metrics", metrics_route(registry.clone()))
//!     .layer(server.layer());
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

pub use adapters::client::{ClientMetrics, PrometheusTrace, TracedClient, TracedClientBuilder};
pub use adapters::metrics::{metrics_route, render, serve_metrics, MetricsRegistry};
pub use adapters::server::{MatchedPathLabel, PathLabel, PrometheusLayer, ServerMetrics};
pub use config::ExporterConfig;
pub use error::{ExporterError, TraceError};
