//! Wire shapes shared by the REST and push paths.
//!
//! The server emits prices either as JSON numbers or as numeric strings
//! (`"50000.123"`). Both decode; anything non-finite or non-positive decodes
//! as absent.

use serde::{Deserialize, Deserializer};

use super::snapshot::{is_positive_price, ObservationOrigin, PriceObservation};

/// Deserialize an optional price from a number, a numeric string or null.
pub fn lenient_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let value = match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse::<f64>().ok(),
        None => None,
    };
    Ok(value.filter(|v| is_positive_price(*v)))
}

/// Cache record: `data` of `GET /cache/prices/{symbol}` and `cache_data` of
/// a `price_update` push message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CachePayload {
    #[serde(default, deserialize_with = "lenient_price")]
    pub mid_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_price")]
    pub bid_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_price")]
    pub ask_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_price")]
    pub spread: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
}

impl CachePayload {
    /// `None` unless the record carries a usable mid price.
    pub fn into_observation(self, origin: ObservationOrigin) -> Option<PriceObservation> {
        let mid_price = self.mid_price?;
        Some(PriceObservation {
            mid_price,
            bid_price: self.bid_price,
            ask_price: self.ask_price,
            spread: self.spread,
            origin,
            reported_source: self.source,
        })
    }
}

/// Inbound push frame. Only `type = "price_update"` is acted on.
#[derive(Debug, Clone, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub symbol: Option<String>,
    /// Raw price; validated by the caller so bad values can be logged.
    #[serde(default)]
    pub price: Option<serde_json::Value>,
    #[serde(default)]
    pub cache_data: Option<CachePayload>,
}

impl PushMessage {
    pub const PRICE_UPDATE: &'static str = "price_update";

    pub fn is_price_update(&self) -> bool {
        self.kind == Self::PRICE_UPDATE
    }

    /// Decoded `price`, if it is a number or numeric string.
    pub fn price(&self) -> Option<f64> {
        match self.price.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
