//! Price reconciliation: merge transport readings into one snapshot.
//!
//! Rule order for every incoming reading:
//! 1. `mid_price` always takes the incoming value when it is positive.
//! 2. `bid_price` takes a positive server value; otherwise a server value
//!    already held is retained, and when none is held it is estimated as
//!    `mid × 0.9995`.
//! 3. `spread` takes a positive server value, else `ask − bid` when both
//!    quotes are present, else the same retain/estimate rule with
//!    `mid × 0.001`.
//! 4. `source` is `Cache` for cache-backed readings, `Computed` otherwise.
//!
//! Estimates are tagged `ValueOrigin::Estimated` and are recomputed from the
//! newest mid on every merge.

use chrono::{DateTime, Duration, Utc};

use super::snapshot::{
    is_positive_price, PriceObservation, PriceSnapshot, QuotedValue, SnapshotSource, Symbol,
};

/// Bid estimate as a fraction of mid when the server supplies none.
pub const BID_ESTIMATE_FACTOR: f64 = 0.9995;

/// Spread estimate as a fraction of mid when the server supplies none.
pub const SPREAD_ESTIMATE_FACTOR: f64 = 0.001;

/// Merge `incoming` into `current`, producing the next snapshot.
///
/// Returns `None` when the incoming reading has no usable mid price; the
/// caller keeps its existing snapshot untouched in that case.
pub fn reconcile(
    symbol: &Symbol,
    current: Option<&PriceSnapshot>,
    incoming: &PriceObservation,
    now: DateTime<Utc>,
) -> Option<PriceSnapshot> {
    if !incoming.is_usable() {
        return None;
    }
    let mid = incoming.mid_price;
    let server_bid = incoming.bid_price.filter(|b| is_positive_price(*b));
    let server_ask = incoming.ask_price.filter(|a| is_positive_price(*a));

    let bid_price = match server_bid {
        Some(bid) => QuotedValue::server(bid),
        None => retained_or_estimate(current.map(|c| c.bid_price), mid * BID_ESTIMATE_FACTOR),
    };

    let spread = match incoming.spread.filter(|s| is_positive_price(*s)) {
        Some(spread) => QuotedValue::server(spread),
        None => match (server_ask, server_bid) {
            (Some(ask), Some(bid)) if ask > bid => QuotedValue::server(ask - bid),
            _ => retained_or_estimate(current.map(|c| c.spread), mid * SPREAD_ESTIMATE_FACTOR),
        },
    };

    let source = if incoming.origin.is_cache() {
        SnapshotSource::Cache
    } else {
        SnapshotSource::Computed
    };

    let (observed_at, sequence) = match current {
        Some(prev) => {
            let floor = prev.observed_at + Duration::microseconds(1);
            (now.max(floor), prev.sequence + 1)
        }
        None => (now, 1),
    };

    Some(PriceSnapshot {
        symbol: symbol.clone(),
        mid_price: mid,
        bid_price,
        spread,
        source,
        observed_at,
        sequence,
    })
}

fn retained_or_estimate(previous: Option<QuotedValue>, estimate: f64) -> QuotedValue {
    match previous {
        Some(prev) if !prev.is_estimate() && is_positive_price(prev.value) => prev,
        _ => QuotedValue::estimated(estimate),
    }
}

/// Owns the per-subscription snapshot; the only writer of it.
#[derive(Debug, Clone)]
pub struct PriceReconciler {
    symbol: Symbol,
    current: Option<PriceSnapshot>,
}

impl PriceReconciler {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            current: None,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn current(&self) -> Option<&PriceSnapshot> {
        self.current.as_ref()
    }

    /// Merge a reading; returns the new snapshot to publish, if any.
    pub fn apply(&mut self, incoming: &PriceObservation) -> Option<&PriceSnapshot> {
        self.apply_at(incoming, Utc::now())
    }

    pub fn apply_at(
        &mut self,
        incoming: &PriceObservation,
        now: DateTime<Utc>,
    ) -> Option<&PriceSnapshot> {
        let next = reconcile(&self.symbol, self.current.as_ref(), incoming, now)?;
        self.current = Some(next);
        self.current.as_ref()
    }

    /// Forget the snapshot and start over for `symbol`.
    pub fn reset(&mut self, symbol: Symbol) {
        self.symbol = symbol;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::{ObservationOrigin, ValueOrigin};

    fn obs(mid: f64, origin: ObservationOrigin) -> PriceObservation {
        PriceObservation::mid_only(mid, origin)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_cache_mid_without_bid_is_estimated() {
        let symbol = Symbol::new("BTC");
        let snap = reconcile(&symbol, None, &obs(50_000.123, ObservationOrigin::EmbeddedCache), t0())
            .unwrap();

        assert_eq!(snap.mid_price, 50_000.123);
        assert!((snap.bid_price.value - 49_975.122_938_5).abs() < 1e-6);
        assert_eq!(snap.bid_price.origin, ValueOrigin::Estimated);
        assert!((snap.spread.value - 50.000_123).abs() < 1e-9);
        assert_eq!(snap.spread.origin, ValueOrigin::Estimated);
        assert_eq!(snap.source, SnapshotSource::Cache);
        assert_eq!(snap.sequence, 1);
    }

    #[test]
    fn test_server_bid_retained_when_missing() {
        let symbol = Symbol::new("ETH");
        let first = PriceObservation {
            bid_price: Some(1999.0),
            spread: Some(2.0),
            ..obs(2000.0, ObservationOrigin::CacheEndpoint)
        };
        let snap = reconcile(&symbol, None, &first, t0()).unwrap();
        let next = reconcile(&symbol, Some(&snap), &obs(2010.0, ObservationOrigin::CacheEndpoint), t0())
            .unwrap();

        assert_eq!(next.mid_price, 2010.0);
        assert_eq!(next.bid_price, QuotedValue::server(1999.0));
        assert_eq!(next.spread, QuotedValue::server(2.0));
    }

    #[test]
    fn test_estimate_follows_new_mid() {
        let symbol = Symbol::new("SOL");
        let snap = reconcile(&symbol, None, &obs(100.0, ObservationOrigin::CacheEndpoint), t0()).unwrap();
        let next = reconcile(&symbol, Some(&snap), &obs(200.0, ObservationOrigin::CacheEndpoint), t0())
            .unwrap();

        assert!(next.bid_price.is_estimate());
        assert!((next.bid_price.value - 199.9).abs() < 1e-9);
    }

    #[test]
    fn test_spread_from_ask_and_bid() {
        let symbol = Symbol::new("BTC");
        let incoming = PriceObservation {
            bid_price: Some(99.0),
            ask_price: Some(101.0),
            ..obs(100.0, ObservationOrigin::MarketEndpoint)
        };
        let snap = reconcile(&symbol, None, &incoming, t0()).unwrap();

        assert_eq!(snap.spread, QuotedValue::server(2.0));
        assert_eq!(snap.source, SnapshotSource::Computed);
    }

    #[test]
    fn test_zero_bid_never_overwrites() {
        let symbol = Symbol::new("BTC");
        let first = PriceObservation {
            bid_price: Some(99.5),
            ..obs(100.0, ObservationOrigin::CacheEndpoint)
        };
        let snap = reconcile(&symbol, None, &first, t0()).unwrap();
        let zero_bid = PriceObservation {
            bid_price: Some(0.0),
            spread: Some(0.0),
            ..obs(101.0, ObservationOrigin::EmbeddedCache)
        };
        let next = reconcile(&symbol, Some(&snap), &zero_bid, t0()).unwrap();

        assert_eq!(next.bid_price, QuotedValue::server(99.5));
    }

    #[test]
    fn test_invalid_mid_rejected() {
        let symbol = Symbol::new("BTC");
        assert!(reconcile(&symbol, None, &obs(-1.0, ObservationOrigin::CacheEndpoint), t0()).is_none());
        assert!(reconcile(&symbol, None, &obs(f64::NAN, ObservationOrigin::CacheEndpoint), t0()).is_none());
    }

    #[test]
    fn test_observed_at_advances_on_same_value() {
        let mut reconciler = PriceReconciler::new(Symbol::new("BTC"));
        let reading = obs(100.0, ObservationOrigin::CacheEndpoint);

        let first = reconciler.apply_at(&reading, t0()).cloned().unwrap();
        let second = reconciler.apply_at(&reading, t0()).cloned().unwrap();

        assert_eq!(first.mid_price, second.mid_price);
        assert!(second.observed_at > first.observed_at);
        assert_eq!(second.sequence, first.sequence + 1);
    }

    #[test]
    fn test_invalid_reading_keeps_snapshot() {
        let mut reconciler = PriceReconciler::new(Symbol::new("BTC"));
        reconciler.apply_at(&obs(100.0, ObservationOrigin::CacheEndpoint), t0());

        assert!(reconciler.apply(&obs(0.0, ObservationOrigin::CacheEndpoint)).is_none());
        assert_eq!(reconciler.current().unwrap().mid_price, 100.0);

        reconciler.reset(Symbol::new("ETH"));
        assert!(reconciler.current().is_none());
        assert_eq!(reconciler.symbol().as_str(), "ETH");
    }
}
