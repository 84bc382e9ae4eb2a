//! Client Adapter - Outbound Request Instrumentation
//!
//! Sub-modules:
//! - `session`: reqwest client firing trace hooks around each request
//! - `prometheus_trace`: hook set recording outbound metrics

pub mod prometheus_trace;
pub mod session;

pub use prometheus_trace::{ClientMetrics, PrometheusTrace};
pub use session::{TracedClient, TracedClientBuilder};
