//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Concrete bindings of the exporter to its external stacks: prometheus
//! for storage and exposition, tower/axum for inbound requests, reqwest
//! for outbound ones.
//!
//! Adapter categories:
//! - `client`: traced reqwest session and its Prometheus hook set
//! - `metrics`: registry handle and text exposition handler
//! - `server`: tower middleware timing inbound requests

pub mod client;
pub mod metrics;
pub mod server;
