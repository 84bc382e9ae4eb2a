//! Metrics Registry and Exposition
//!
//! The shared registry handle every adapter records into, and the
//! handler rendering it in the Prometheus text format via axum 0.7.

pub mod handler;
pub(crate) mod record;
pub mod registry;

pub use handler::{metrics_route, render, serve_metrics};
pub use registry::MetricsRegistry;
