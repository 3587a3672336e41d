//! Prometheus Metrics Registry - Feed Observability
//!
//! Registers and exposes `price_feed_*` metrics for dashboards: snapshot
//! throughput, transport states, reconnects, degraded polling and
//! push-channel exhaustion.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::domain::snapshot::PriceSnapshot;
use crate::domain::transport::{FeedCondition, TransportState, TransportStatus};

/// Centralized Prometheus metrics for the price feed.
///
/// Every metric carries a `symbol` label.
pub struct FeedMetrics {
    /// Prometheus registry.
    registry: Registry,
    /// Snapshots handed to subscribers, by snapshot source.
    pub snapshots_published: IntCounterVec,
    /// Latest published mid price.
    pub mid_price: GaugeVec,
    /// Transport state (0 idle, 1 connecting, 2 active, 3 degraded, 4 closed).
    pub transport_state: IntGaugeVec,
    /// Scheduled push reconnects.
    pub reconnects: IntCounterVec,
    /// Transitions of the REST transport into `Degraded`.
    pub rest_degraded: IntCounterVec,
    /// Times the push channel gave up.
    pub websocket_exhausted: IntCounterVec,
}

impl FeedMetrics {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let snapshots_published = IntCounterVec::new(
            Opts::new(
                "price_feed_snapshots_published_total",
                "Price snapshots delivered to subscribers",
            ),
            &["symbol", "source"],
        )?;

        let mid_price = GaugeVec::new(
            Opts::new("price_feed_mid_price", "Latest published mid price"),
            &["symbol"],
        )?;

        let transport_state = IntGaugeVec::new(
            Opts::new(
                "price_feed_transport_state",
                "Transport state (0=idle, 1=connecting, 2=active, 3=degraded, 4=closed)",
            ),
            &["symbol", "transport"],
        )?;

        let reconnects = IntCounterVec::new(
            Opts::new(
                "price_feed_websocket_reconnects_total",
                "Push channel reconnects scheduled",
            ),
            &["symbol"],
        )?;

        let rest_degraded = IntCounterVec::new(
            Opts::new(
                "price_feed_rest_degraded_total",
                "REST transport transitions into degraded after a failed poll",
            ),
            &["symbol"],
        )?;

        let websocket_exhausted = IntCounterVec::new(
            Opts::new(
                "price_feed_websocket_exhausted_total",
                "Push channel gave up after exhausting reconnect attempts",
            ),
            &["symbol"],
        )?;

        registry.register(Box::new(snapshots_published.clone()))?;
        registry.register(Box::new(mid_price.clone()))?;
        registry.register(Box::new(transport_state.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;
        registry.register(Box::new(rest_degraded.clone()))?;
        registry.register(Box::new(websocket_exhausted.clone()))?;

        Ok(Self {
            registry,
            snapshots_published,
            mid_price,
            transport_state,
            reconnects,
            rest_degraded,
            websocket_exhausted,
        })
    }

    pub fn record_snapshot(&self, snapshot: &PriceSnapshot) {
        let symbol = snapshot.symbol.as_str();
        let source = snapshot.source.to_string();
        self.snapshots_published
            .with_label_values(&[symbol, source.as_str()])
            .inc();
        self.mid_price
            .with_label_values(&[symbol])
            .set(snapshot.mid_price);
    }

    /// Record a status change. Called once per distinct status.
    pub fn record_status(&self, status: &TransportStatus) {
        let symbol = status.symbol.as_str();
        self.transport_state
            .with_label_values(&[symbol, "websocket"])
            .set(status.websocket.as_gauge());
        self.transport_state
            .with_label_values(&[symbol, "rest"])
            .set(status.rest.as_gauge());

        match status.condition {
            FeedCondition::Reconnecting { .. } => {
                self.reconnects.with_label_values(&[symbol]).inc();
            }
            FeedCondition::WebSocketUnavailable { rest_fallback: false } => {
                self.websocket_exhausted.with_label_values(&[symbol]).inc();
            }
            _ => {}
        }
        if status.rest == TransportState::Degraded {
            self.rest_degraded.with_label_values(&[symbol]).inc();
        }
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::domain::snapshot::{QuotedValue, SnapshotSource, Symbol};

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = FeedMetrics::new().unwrap();
        metrics.record_snapshot(&PriceSnapshot {
            symbol: Symbol::new("BTC"),
            mid_price: 100.0,
            bid_price: QuotedValue::estimated(99.95),
            spread: QuotedValue::estimated(0.1),
            source: SnapshotSource::Cache,
            observed_at: Utc::now(),
            sequence: 1,
        });
        metrics.record_status(&TransportStatus {
            symbol: Symbol::new("BTC"),
            websocket: TransportState::Connecting,
            rest: TransportState::Degraded,
            condition: FeedCondition::Reconnecting {
                attempt: 1,
                delay_ms: 2000,
            },
            reconnect_attempt: 1,
        });

        let body = metrics.render().unwrap();
        assert!(body.contains(r#"price_feed_snapshots_published_total{source="cache",symbol="BTC"} 1"#));
        assert!(body.contains(r#"price_feed_transport_state{symbol="BTC",transport="rest"} 3"#));
        assert!(body.contains(r#"price_feed_websocket_reconnects_total{symbol="BTC"} 1"#));
        assert!(body.contains(r#"price_feed_rest_degraded_total{symbol="BTC"} 1"#));
    }
}
