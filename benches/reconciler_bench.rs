//! Reconciler Benchmarks — Per-Update Hot Path
//!
//! Every push frame and poll tick goes through decode + reconcile, so
//! these are the functions worth keeping cheap.
//!
//! Run with: cargo bench --bench reconciler_bench

use chrono::{DateTime, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use price_feed_orchestrator::domain::reconciler::reconcile;
use price_feed_orchestrator::domain::wire::PushMessage;
use price_feed_orchestrator::domain::{
    ObservationOrigin, PriceObservation, PriceReconciler, Symbol,
};

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

/// Merge a mid-only reading (estimate path).
fn bench_reconcile_estimate(c: &mut Criterion) {
    let symbol = Symbol::new("BTC");
    let reading = PriceObservation::mid_only(50_000.123, ObservationOrigin::EmbeddedCache);
    let current = reconcile(&symbol, None, &reading, t0());

    c.bench_function("reconcile_mid_only", |b| {
        b.iter(|| {
            let _snapshot = reconcile(
                black_box(&symbol),
                black_box(current.as_ref()),
                black_box(&reading),
                black_box(t0()),
            );
        });
    });
}

/// Merge a full server quote.
fn bench_reconcile_full_quote(c: &mut Criterion) {
    let mut reconciler = PriceReconciler::new(Symbol::new("ETH"));
    let reading = PriceObservation {
        bid_price: Some(2999.5),
        ask_price: Some(3000.5),
        ..PriceObservation::mid_only(3000.0, ObservationOrigin::CacheEndpoint)
    };

    c.bench_function("reconciler_apply_full_quote", |b| {
        b.iter(|| {
            let _snapshot = reconciler.apply_at(black_box(&reading), black_box(t0()));
        });
    });
}

/// Decode a `price_update` frame with an embedded cache payload.
fn bench_decode_push_frame(c: &mut Criterion) {
    let frame = r#"{"type":"price_update","symbol":"BTC","price":50001,"cache_data":{"mid_price":"50000.123","bid_price":49990.5,"spread":null,"source":"websocket"}}"#;

    c.bench_function("decode_price_update", |b| {
        b.iter(|| {
            let msg: Result<PushMessage, _> = serde_json::from_str(black_box(frame));
            let _reading = msg.ok().and_then(|m| {
                m.cache_data
                    .and_then(|p| p.into_observation(ObservationOrigin::EmbeddedCache))
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reconcile_estimate,
    bench_reconcile_full_quote,
    bench_decode_push_frame,
);
criterion_main!(benches);
