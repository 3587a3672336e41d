//! Health Check Server - Liveness and Readiness Probes
//!
//! Exposes /live and /ready endpoints via axum 0.7. Readiness follows
//! the subscriptions' transport status: ready while at least one of
//! them has a publishing transport or is idle because every source is
//! disabled.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::domain::snapshot::Symbol;
use crate::domain::transport::{FeedCondition, TransportStatus};

/// Shared health state updated from status callbacks.
#[derive(Debug, Default)]
pub struct HealthState {
    /// Per-symbol readiness.
    feeds: RwLock<HashMap<Symbol, bool>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a subscription's latest status into readiness.
    pub fn record_status(&self, status: &TransportStatus) {
        let ready = status.active_transport().is_some()
            || matches!(status.condition, FeedCondition::NoSource);
        if let Ok(mut feeds) = self.feeds.write() {
            feeds.insert(status.symbol.clone(), ready);
        }
    }

    /// Forget a symbol whose subscription ended.
    pub fn remove(&self, symbol: &Symbol) {
        if let Ok(mut feeds) = self.feeds.write() {
            feeds.remove(symbol);
        }
    }

    /// Check if at least one feed can serve prices (or is idle by choice).
    pub fn is_ready(&self) -> bool {
        self.feeds
            .read()
            .map(|feeds| feeds.values().any(|ready| *ready))
            .unwrap_or(false)
    }
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    /// Health state shared with the status callbacks.
    state: Arc<HealthState>,
    /// Bind port.
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(Arc::clone(&self.state));

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}
