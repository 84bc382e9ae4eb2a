//! Server Adapter - Inbound Request Instrumentation
//!
//! Sub-modules:
//! - `middleware`: tower layer recording count, latency, in-flight
//!   requests and errors per route template
//! - `path`: strategies deriving the bounded `path` label

pub mod middleware;
pub mod path;

pub use middleware::{PrometheusLayer, PrometheusService, ServerMetrics};
pub use path::{MatchedPathLabel, PathLabel};
