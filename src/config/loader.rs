//! Configuration Loader - File Loading and Validation
//!
//! Handles loading the exporter TOML file, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::ExporterConfig;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<ExporterConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)
    .with_context(|| format!("Invalid config file: {}", path.display()))?;

  info!(
    server_prefix = %config.server.prefix,
    client_prefix = %config.client.prefix,
    metrics_path = %config.exporter.metrics_path,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
///
/// A file that exists and fails to parse or validate is still an error.
pub fn load_config_or_default(path: &str) -> Result<ExporterConfig> {
  if Path::new(path).exists() {
    load_config(path)
  } else {
    info!(path, "No config file found, using defaults");
    let config = ExporterConfig::default();
    validate_config(&config)?;
    Ok(config)
  }
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ExporterConfig> {
  let config: ExporterConfig =
    toml::from_str(content).context("Failed to parse exporter TOML")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Valid metric prefixes and histogram buckets
/// - A metrics path that can be mounted on a router
/// - Distinct server and client prefixes (they share one registry)
fn validate_config(config: &ExporterConfig) -> Result<()> {
  config.server.validate()?;
  config.client.validate()?;

  anyhow::ensure!(
    config.exporter.metrics_path.starts_with('/'),
    "metrics_path must start with '/', got {:?}",
    config.exporter.metrics_path
  );
  anyhow::ensure!(
    !config.exporter.bind_address.is_empty(),
    "bind_address must not be empty"
  );
  anyhow::ensure!(
    config.server.prefix != config.client.prefix,
    "server and client prefixes must differ, both are {:?}",
    config.server.prefix
  );

  Ok(())
}
