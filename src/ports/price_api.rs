//! Price API Port - REST Endpoints Consumed by the Feed
//!
//! Read-only contracts for the cache and market endpoints plus the
//! server-side feed configuration. Adapters own the HTTP details; the
//! feed only sees decoded `PriceObservation`s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::feed_config::{FeedConfig, PrimarySource};
use crate::domain::snapshot::{PriceObservation, Symbol};

/// Server-side view returned by `GET /config`.
///
/// Used only for initial defaults and status display, never as a data path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFeedConfig {
  /// `"rest"` or `"websocket"`.
  #[serde(default = "default_price_source")]
  pub price_source: String,
  /// Whether the server considers REST enabled.
  #[serde(default = "default_true")]
  pub rest_enabled: bool,
  /// Whether the server considers the push channel enabled.
  #[serde(default)]
  pub websocket_enabled: bool,
  /// Whether the server's upstream WebSocket worker is running.
  #[serde(default)]
  pub websocket_running: bool,
  /// Latest prices seen by the server's WebSocket worker.
  #[serde(default)]
  pub websocket_prices: std::collections::HashMap<String, f64>,
}

fn default_price_source() -> String {
  PrimarySource::Rest.as_str().to_string()
}

fn default_true() -> bool {
  true
}

/// Trait for the REST side of the price backend.
#[async_trait]
pub trait PriceApi: Send + Sync + 'static {
  /// `GET /cache/prices/{symbol}`.
  ///
  /// `Ok(None)` when the cache reports `success = false` or holds no
  /// usable mid price.
  async fn cached_price(&self, symbol: &Symbol) -> anyhow::Result<Option<PriceObservation>>;

  /// `GET /market/{symbol}` (raw market fallback).
  async fn market_price(&self, symbol: &Symbol) -> anyhow::Result<Option<PriceObservation>>;

  /// `GET /config`.
  async fn server_config(&self) -> anyhow::Result<ServerFeedConfig>;

  /// `POST /config` mirroring the local enablement flags to the server.
  async fn update_server_config(&self, config: &FeedConfig) -> anyhow::Result<()>;
}
