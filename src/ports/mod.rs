//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Interfaces the adapters meet at. Hook sets implement these traits;
//! the traced client drives them.
//!
//! Port categories:
//! - `TraceHooks`: outbound request lifecycle callbacks

pub mod trace_hooks;

pub use trace_hooks::{TraceContext, TraceHooks};
