//! Error Types - Construction and Transport Failures
//!
//! `ExporterError` covers everything that can go wrong while building
//! or rendering metrics. `TraceError` is what a traced client returns;
//! its `Transport` variant carries the reqwest error untouched.

use thiserror::Error;

/// Errors raised while registering, configuring or rendering metrics.
///
/// These surface at construction time (or from the render call),
/// never from the request path of an instrumented service.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// The prometheus registry rejected a collector or an encode call.
    #[error("metrics registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// A configuration value failed validation.
    #[error("invalid exporter configuration: {0}")]
    InvalidConfig(String),

    /// The rendered exposition text was not valid UTF-8.
    #[error("failed to encode metrics: {0}")]
    Encode(String),
}

/// Errors returned by [`TracedClient`](crate::adapters::client::TracedClient).
#[derive(Debug, Error)]
pub enum TraceError {
    /// The underlying transport failed; the error is passed through as-is.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// The redirect chain was longer than the session allows.
    #[error("exceeded the maximum of {max} redirects")]
    TooManyRedirects {
        /// Configured redirect limit.
        max: usize,
    },

    /// A redirect response carried an unusable `Location` header.
    #[error("invalid redirect location: {0}")]
    InvalidRedirect(String),
}

impl TraceError {
    /// Borrow the transport error, if this is one.
    pub const fn transport(&self) -> Option<&reqwest::Error> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}
