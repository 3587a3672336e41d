//! Price API Request/Response Types
//!
//! Serialization shapes for the price backend's REST endpoints. Prices
//! decode through `lenient_price`, so numbers and numeric strings both
//! work and bad values read as absent.

use serde::{Deserialize, Serialize};

use crate::domain::feed_config::FeedConfig;
use crate::domain::snapshot::{ObservationOrigin, PriceObservation};
use crate::domain::wire::{lenient_price, CachePayload};

/// Response from `GET /cache/prices/{symbol}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheResponse {
  /// False when the symbol is not cached.
  #[serde(default)]
  pub success: bool,
  /// Cached record.
  #[serde(default)]
  pub data: Option<CachePayload>,
  /// Error text when `success` is false.
  #[serde(default)]
  pub error: Option<String>,
}

impl CacheResponse {
  /// Usable reading, or `None` when the cache is empty for the symbol.
  pub fn into_observation(self) -> Option<PriceObservation> {
    if !self.success {
      return None;
    }
    self.data?.into_observation(ObservationOrigin::CacheEndpoint)
  }
}

/// Response from `GET /market/{symbol}`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketResponse {
  #[serde(default, deserialize_with = "lenient_price")]
  pub mid_price: Option<f64>,
  #[serde(default, deserialize_with = "lenient_price")]
  pub bid_price: Option<f64>,
  #[serde(default, deserialize_with = "lenient_price")]
  pub ask_price: Option<f64>,
  #[serde(default, deserialize_with = "lenient_price")]
  pub spread: Option<f64>,
  /// Upstream tag (`"cache"`, `"websocket"`, ...).
  #[serde(default)]
  pub source: Option<String>,
  /// Set when the server answered with placeholder data.
  #[serde(default)]
  pub warning: Option<String>,
}

impl MarketResponse {
  pub fn into_observation(self) -> Option<PriceObservation> {
    Some(PriceObservation {
      mid_price: self.mid_price?,
      bid_price: self.bid_price,
      ask_price: self.ask_price,
      spread: self.spread,
      origin: ObservationOrigin::MarketEndpoint,
      reported_source: self.source,
    })
  }
}

/// Body of `POST /config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigUpdateRequest {
  /// `"rest"` or `"websocket"`.
  pub price_source: String,
  pub rest_enabled: bool,
  pub websocket_enabled: bool,
}

impl From<&FeedConfig> for ConfigUpdateRequest {
  fn from(config: &FeedConfig) -> Self {
    Self {
      price_source: config.primary_source().as_str().to_string(),
      rest_enabled: config.rest_enabled,
      websocket_enabled: config.websocket_enabled,
    }
  }
}

/// Response from `POST /config`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigUpdateResponse {
  #[serde(default)]
  pub success: bool,
  #[serde(default)]
  pub message: Option<String>,
}
