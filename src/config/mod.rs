//! Configuration Module - TOML-based Feed Configuration
//!
//! Loads and validates process configuration from `config.toml`.
//! Endpoints, poll cadences and backoff parameters are externalized
//! here; the live source enablement flags are not (they belong to the
//! `ConfigStore` and its settings file).

pub mod hot_reload;
pub mod loader;

use serde::Deserialize;

/// Top-level process configuration.
///
/// Every section is optional; missing sections take their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
  /// Process identity and logging.
  #[serde(default)]
  pub app: AppSection,
  /// Price backend endpoints.
  #[serde(default)]
  pub api: ApiSection,
  /// Feed cadences and reconnect policy.
  #[serde(default)]
  pub feed: FeedSection,
  /// Persisted enablement flags.
  #[serde(default)]
  pub settings: SettingsSection,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsSection,
}

/// Process identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
  /// Human-readable process name.
  #[serde(default = "default_name")]
  pub name: String,
  /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

impl Default for AppSection {
  fn default() -> Self {
    Self {
      name: default_name(),
      log_level: default_log_level(),
    }
  }
}

/// Price backend endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
  /// REST root (cache, market and config endpoints live below it).
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Push channel URL.
  #[serde(default = "default_ws_url")]
  pub ws_url: String,
  /// HTTP request and WebSocket handshake timeout (milliseconds).
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  /// Maximum concurrent HTTP requests.
  #[serde(default = "default_max_concurrent")]
  pub max_concurrent: usize,
  /// Retries on HTTP 5xx / transport errors per request.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
}

impl Default for ApiSection {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      ws_url: default_ws_url(),
      timeout_ms: default_timeout_ms(),
      max_concurrent: default_max_concurrent(),
      max_retries: default_max_retries(),
    }
  }
}

/// Feed cadence and reconnect configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSection {
  /// Symbols subscribed by the binary.
  #[serde(default = "default_symbols")]
  pub symbols: Vec<String>,
  /// Primary REST poll interval (milliseconds).
  #[serde(default = "default_poll_interval")]
  pub poll_interval_ms: u64,
  /// Mid-only refresh interval while the push channel is not active.
  #[serde(default = "default_mid_refresh_interval")]
  pub mid_refresh_interval_ms: u64,
  /// Reconnect backoff unit (milliseconds).
  #[serde(default = "default_reconnect_base_delay")]
  pub reconnect_base_delay_ms: u64,
  /// Reconnect attempts before the push channel gives up.
  #[serde(default = "default_max_reconnect_attempts")]
  pub max_reconnect_attempts: u32,
  /// Mirror local flag changes to the server's `POST /config`.
  #[serde(default)]
  pub sync_server_config: bool,
}

impl Default for FeedSection {
  fn default() -> Self {
    Self {
      symbols: default_symbols(),
      poll_interval_ms: default_poll_interval(),
      mid_refresh_interval_ms: default_mid_refresh_interval(),
      reconnect_base_delay_ms: default_reconnect_base_delay(),
      max_reconnect_attempts: default_max_reconnect_attempts(),
      sync_server_config: false,
    }
  }
}

/// Settings file configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsSection {
  /// JSON file holding the enablement flags. Empty keeps them in memory.
  #[serde(default = "default_settings_path")]
  pub path: String,
  /// How often the file is checked for external edits (milliseconds).
  #[serde(default = "default_watch_interval")]
  pub watch_interval_ms: u64,
}

impl Default for SettingsSection {
  fn default() -> Self {
    Self {
      path: default_settings_path(),
      watch_interval_ms: default_watch_interval(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsSection {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_name() -> String {
  "price-feed".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_base_url() -> String {
  "http://localhost:8000/api".to_string()
}

fn default_ws_url() -> String {
  "ws://localhost:8000/ws/price".to_string()
}

fn default_timeout_ms() -> u64 {
  5_000
}

fn default_max_concurrent() -> usize {
  8
}

fn default_max_retries() -> u32 {
  1
}

fn default_symbols() -> Vec<String> {
  vec!["BTC".to_string()]
}

fn default_poll_interval() -> u64 {
  1_500
}

fn default_mid_refresh_interval() -> u64 {
  500
}

fn default_reconnect_base_delay() -> u64 {
  2_000
}

fn default_max_reconnect_attempts() -> u32 {
  5
}

fn default_settings_path() -> String {
  "data/feed_settings.json".to_string()
}

fn default_watch_interval() -> u64 {
  1_000
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
