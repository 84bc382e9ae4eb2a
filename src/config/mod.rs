//! Configuration Module - TOML-based Exporter Configuration
//!
//! Metric prefixes, label policy and histogram buckets for the server
//! and client adapters, plus the bind address of the demo exporter.
//! Every field has a default, so an empty file (or no file) is a
//! valid configuration.

pub mod loader;

use serde::Deserialize;

use crate::domain::labels::{NOT_MATCHED, StatusLabel};
use crate::error::ExporterError;

/// Top-level exporter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
  /// Process-level settings.
  pub exporter: ExporterSection,
  /// Inbound request metrics.
  pub server: ServerMetricsConfig,
  /// Outbound request metrics.
  pub client: ClientMetricsConfig,
}

/// Process-level settings used by the binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExporterSection {
  /// Log level (trace, debug, info, warn, error).
  pub log_level: String,
  /// Listen address of the HTTP server.
  pub bind_address: String,
  /// Route serving the exposition text.
  pub metrics_path: String,
}

impl Default for ExporterSection {
  fn default() -> Self {
    Self {
      log_level: default_log_level(),
      bind_address: default_bind_address(),
      metrics_path: default_metrics_path(),
    }
  }
}

/// Settings of the server middleware metrics.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerMetricsConfig {
  /// Metric name prefix (`{prefix}_requests_total`, ...).
  pub prefix: String,
  /// Status label granularity.
  pub status_label: StatusLabel,
  /// Path label for requests that matched no route.
  pub unmatched_path: String,
  /// Latency histogram upper bounds in seconds.
  pub buckets: Vec<f64>,
}

impl Default for ServerMetricsConfig {
  fn default() -> Self {
    Self {
      prefix: "http".to_string(),
      status_label: StatusLabel::default(),
      unmatched_path: NOT_MATCHED.to_string(),
      buckets: default_buckets(),
    }
  }
}

impl ServerMetricsConfig {
  /// Check the settings before any collector is registered.
  pub fn validate(&self) -> Result<(), ExporterError> {
    validate_prefix(&self.prefix)?;
    if self.unmatched_path.is_empty() {
      return Err(ExporterError::InvalidConfig(
        "server.unmatched_path must not be empty".to_string(),
      ));
    }
    validate_buckets("server.buckets", &self.buckets)
  }
}

/// Settings of the client trace metrics.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientMetricsConfig {
  /// Metric name prefix (`{prefix}_requests_total`, ...).
  pub prefix: String,
  /// `client_name` label of the default hook set.
  pub client_name: String,
  /// Status label granularity.
  pub status_label: StatusLabel,
  /// Redirects a traced session follows before giving up.
  pub max_redirects: usize,
  /// Per-request timeout in milliseconds (0 = none).
  pub timeout_ms: u64,
  /// Latency histogram upper bounds in seconds.
  pub buckets: Vec<f64>,
}

impl Default for ClientMetricsConfig {
  fn default() -> Self {
    Self {
      prefix: "http_client".to_string(),
      client_name: "default".to_string(),
      status_label: StatusLabel::default(),
      max_redirects: default_max_redirects(),
      timeout_ms: default_timeout_ms(),
      buckets: default_buckets(),
    }
  }
}

impl ClientMetricsConfig {
  /// Check the settings before any collector is registered.
  pub fn validate(&self) -> Result<(), ExporterError> {
    validate_prefix(&self.prefix)?;
    if self.client_name.is_empty() {
      return Err(ExporterError::InvalidConfig(
        "client.client_name must not be empty".to_string(),
      ));
    }
    validate_buckets("client.buckets", &self.buckets)
  }
}

/// Prefixes end up inside metric names, so they follow the same charset.
fn validate_prefix(prefix: &str) -> Result<(), ExporterError> {
  let mut chars = prefix.chars();
  let valid_head = chars
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':');
  let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
  if valid_head && valid_tail {
    Ok(())
  } else {
    Err(ExporterError::InvalidConfig(format!(
      "metric prefix {prefix:?} is not a valid metric name"
    )))
  }
}

/// prometheus only checks bucket order when the first child series is
/// created, which would be the first request. Check it here instead.
fn validate_buckets(field: &str, buckets: &[f64]) -> Result<(), ExporterError> {
  if buckets.is_empty() {
    return Err(ExporterError::InvalidConfig(format!("{field} must not be empty")));
  }
  if buckets.iter().any(|b| !b.is_finite()) {
    return Err(ExporterError::InvalidConfig(format!(
      "{field} must be finite (+Inf is implicit)"
    )));
  }
  if buckets.windows(2).any(|w| w[0] >= w[1]) {
    return Err(ExporterError::InvalidConfig(format!(
      "{field} must be strictly increasing"
    )));
  }
  Ok(())
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_bind_address() -> String {
  "0.0.0.0:8000".to_string()
}

fn default_metrics_path() -> String {
  "/metrics".to_string()
}

fn default_buckets() -> Vec<f64> {
  prometheus::DEFAULT_BUCKETS.to_vec()
}

const fn default_max_redirects() -> usize {
  10
}

const fn default_timeout_ms() -> u64 {
  30_000
}
