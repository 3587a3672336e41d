//! Price snapshot types.
//!
//! A `PriceObservation` is one raw reading delivered by a transport
//! (cache endpoint, embedded cache payload in a push message, or the raw
//! market endpoint). The `PriceReconciler` folds observations into the
//! single authoritative `PriceSnapshot` kept per subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Traded symbol, normalised to upper case (`"btc"` → `"BTC"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalise and wrap a raw symbol.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a symbol found on the wire.
    pub fn matches(&self, wire: &str) -> bool {
        self.0.eq_ignore_ascii_case(wire.trim())
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Where a raw observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationOrigin {
    /// `GET /cache/prices/{symbol}`.
    CacheEndpoint,
    /// `cache_data` embedded in a `price_update` push message.
    EmbeddedCache,
    /// `GET /market/{symbol}` (raw market fallback).
    MarketEndpoint,
}

impl ObservationOrigin {
    /// Cache-backed readings are authoritative for `mid_price`.
    pub const fn is_cache(self) -> bool {
        matches!(self, Self::CacheEndpoint | Self::EmbeddedCache)
    }
}

/// One raw reading from a transport, before reconciliation.
///
/// Optional fields are `None` when the server did not supply them or
/// supplied a non-positive / non-finite value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub mid_price: f64,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub spread: Option<f64>,
    pub origin: ObservationOrigin,
    /// Free-form `source` tag reported by the cache (e.g. `"websocket"`).
    pub reported_source: Option<String>,
}

impl PriceObservation {
    /// Observation carrying only a mid price.
    pub fn mid_only(mid_price: f64, origin: ObservationOrigin) -> Self {
        Self {
            mid_price,
            bid_price: None,
            ask_price: None,
            spread: None,
            origin,
            reported_source: None,
        }
    }

    /// Drop everything except the mid price (used by the mid refresh poll).
    #[must_use]
    pub fn into_mid_only(self) -> Self {
        Self {
            bid_price: None,
            ask_price: None,
            spread: None,
            ..self
        }
    }

    /// A reading is usable only with a positive, finite mid price.
    pub fn is_usable(&self) -> bool {
        is_positive_price(self.mid_price)
    }
}

/// Provenance tag for the secondary snapshot fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueOrigin {
    /// Supplied (or derived from ask/bid) by the server.
    Server,
    /// Client-side estimate from the mid price.
    Estimated,
}

/// A secondary price field with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotedValue {
    pub value: f64,
    pub origin: ValueOrigin,
}

impl QuotedValue {
    pub const fn server(value: f64) -> Self {
        Self {
            value,
            origin: ValueOrigin::Server,
        }
    }

    pub const fn estimated(value: f64) -> Self {
        Self {
            value,
            origin: ValueOrigin::Estimated,
        }
    }

    pub fn is_estimate(&self) -> bool {
        self.origin == ValueOrigin::Estimated
    }
}

/// Provenance of the snapshot's mid price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
    /// Cache endpoint or an embedded cache payload.
    Cache,
    /// Raw market endpoint.
    Computed,
    Unknown,
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Computed => write!(f, "computed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// The single authoritative price view for one symbol.
///
/// Only ever published with `mid_price > 0`. `observed_at` and `sequence`
/// strictly increase across publications, even when the numbers repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: Symbol,
    pub mid_price: f64,
    pub bid_price: QuotedValue,
    pub spread: QuotedValue,
    pub source: SnapshotSource,
    pub observed_at: DateTime<Utc>,
    pub sequence: u64,
}

impl PriceSnapshot {
    pub fn is_valid(&self) -> bool {
        is_positive_price(self.mid_price)
    }
}

/// Positive and finite.
pub fn is_positive_price(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
