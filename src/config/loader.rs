//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    symbols = ?config.feed.symbols,
    base_url = %config.api.base_url,
    ws_url = %config.api.ws_url,
    poll_interval_ms = config.feed.poll_interval_ms,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content)
    .with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Usable URLs with the right schemes
/// - Positive intervals and budgets
/// - Non-empty symbol list
fn validate_config(config: &AppConfig) -> Result<()> {
  // API validation
  anyhow::ensure!(
    config.api.base_url.starts_with("http://") || config.api.base_url.starts_with("https://"),
    "api.base_url must be an http(s) URL, got '{}'",
    config.api.base_url
  );
  anyhow::ensure!(
    config.api.ws_url.starts_with("ws://") || config.api.ws_url.starts_with("wss://"),
    "api.ws_url must be a ws(s) URL, got '{}'",
    config.api.ws_url
  );
  anyhow::ensure!(config.api.timeout_ms > 0, "api.timeout_ms must be positive");
  anyhow::ensure!(
    config.api.max_concurrent > 0,
    "api.max_concurrent must be positive"
  );

  // Feed validation
  anyhow::ensure!(
    !config.feed.symbols.is_empty(),
    "At least one symbol must be configured"
  );
  for (i, symbol) in config.feed.symbols.iter().enumerate() {
    anyhow::ensure!(
      !symbol.trim().is_empty(),
      "feed.symbols[{}] is empty",
      i
    );
  }
  anyhow::ensure!(
    config.feed.poll_interval_ms > 0,
    "feed.poll_interval_ms must be positive"
  );
  anyhow::ensure!(
    config.feed.mid_refresh_interval_ms > 0,
    "feed.mid_refresh_interval_ms must be positive"
  );
  anyhow::ensure!(
    config.feed.reconnect_base_delay_ms > 0,
    "feed.reconnect_base_delay_ms must be positive"
  );
  anyhow::ensure!(
    config.feed.max_reconnect_attempts > 0,
    "feed.max_reconnect_attempts must be positive, got {}",
    config.feed.max_reconnect_attempts
  );

  // Settings validation
  anyhow::ensure!(
    config.settings.watch_interval_ms > 0,
    "settings.watch_interval_ms must be positive"
  );

  Ok(())
}
