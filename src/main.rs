//! Price Feed — Entry Point
//!
//! Wires configuration, logging, the price backend adapters and one
//! feed subscription per configured symbol. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml (`PRICE_FEED_CONFIG` overrides the path) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create PriceApiClient (REST) and PriceSocketConnector (push)
//! 4. Open the ConfigStore over the settings file, seed from `GET /config`
//! 5. Spawn SettingsWatcher (external edits to the settings file)
//! 6. Spawn metrics server + health server (/live + /ready)
//! 7. Optionally mirror flag changes to the server
//! 8. Subscribe every symbol through the FeedOrchestrator
//! 9. Wait for SIGINT → unsubscribe everything → stop servers → exit

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use price_feed_orchestrator::adapters::api::{PriceApiClient, PriceApiClientConfig};
use price_feed_orchestrator::adapters::feeds::PriceSocketConnector;
use price_feed_orchestrator::adapters::metrics::{FeedMetrics, HealthServer, HealthState};
use price_feed_orchestrator::adapters::persistence::{JsonFileSettings, MemorySettings};
use price_feed_orchestrator::config::hot_reload::SettingsWatcher;
use price_feed_orchestrator::config::{self, AppConfig};
use price_feed_orchestrator::domain::Symbol;
use price_feed_orchestrator::ports::price_api::PriceApi;
use price_feed_orchestrator::ports::settings::SettingsStorage;
use price_feed_orchestrator::usecases::{ConfigStore, FeedOrchestrator, FeedSettings};

/// Environment variable overriding the config file path.
const CONFIG_PATH_ENV: &str = "PRICE_FEED_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config_found = Path::new(&config_path).exists();
    let config = if config_found {
        config::loader::load_config(&config_path).context("Failed to load configuration")?
    } else {
        AppConfig::default()
    };

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.app.log_level)),
        )
        .json()
        .init();

    if !config_found {
        warn!(path = %config_path, "Config file not found, using defaults");
    }
    info!(
        name = %config.app.name,
        version = env!("CARGO_PKG_VERSION"),
        symbols = ?config.feed.symbols,
        "Starting price feed"
    );

    // ── 3. Shutdown signal channel ──────────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 4. Price backend adapters ───────────────────────────
    let timeout = Duration::from_millis(config.api.timeout_ms);
    let api = Arc::new(
        PriceApiClient::new(PriceApiClientConfig {
            base_url: config.api.base_url.clone(),
            timeout,
            max_concurrent: config.api.max_concurrent,
            max_retries: config.api.max_retries,
            retry_base_delay: Duration::from_millis(200),
        })
        .context("Failed to create price API client")?,
    );
    let connector = Arc::new(PriceSocketConnector::new(config.api.ws_url.clone(), timeout));

    // ── 5. ConfigStore over the settings file ───────────────
    let storage: Arc<dyn SettingsStorage> = if config.settings.path.is_empty() {
        info!("No settings path configured, keeping feed flags in memory");
        Arc::new(MemorySettings::new())
    } else {
        Arc::new(
            JsonFileSettings::new(&config.settings.path)
                .context("Failed to open settings file")?,
        )
    };
    let store = Arc::new(ConfigStore::open(storage).context("Failed to open feed settings")?);

    match tokio::time::timeout(timeout, api.server_config()).await {
        Ok(Ok(server)) => {
            debug!(
                price_source = %server.price_source,
                websocket_running = server.websocket_running,
                "Server feed config fetched"
            );
            if let Err(e) = store.seed_defaults(&server) {
                warn!(error = %e, "Failed to seed feed settings from server");
            }
        }
        Ok(Err(e)) => warn!(error = %e, "Server config unavailable, using stored flags"),
        Err(_) => warn!("Server config request timed out, using stored flags"),
    }

    let flags = store.get();
    info!(
        rest_enabled = flags.rest_enabled,
        websocket_enabled = flags.websocket_enabled,
        primary = %flags.primary_source(),
        "Feed flags in effect"
    );

    // ── 6. Settings watcher for external edits ──────────────
    let mut background = Vec::new();
    if !config.settings.path.is_empty() {
        let mut watcher = SettingsWatcher::new(
            &config.settings.path,
            Arc::clone(&store),
            Duration::from_millis(config.settings.watch_interval_ms),
        );
        let watcher_shutdown = shutdown_tx.subscribe();
        background.push(tokio::spawn(async move {
            if let Err(e) = watcher.run(watcher_shutdown).await {
                error!(error = %e, "Settings watcher failed");
            }
        }));
    }

    // ── 7. Metrics + health servers ─────────────────────────
    let metrics = Arc::new(FeedMetrics::new().context("Failed to create metrics registry")?);
    let health = Arc::new(HealthState::new());

    if config.metrics.enabled {
        let metrics_server = Arc::clone(&metrics);
        let bind_address = config.metrics.bind_address.clone();
        let metrics_shutdown = shutdown_tx.subscribe();
        background.push(tokio::spawn(async move {
            if let Err(e) = metrics_server.serve(bind_address, metrics_shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        }));

        let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
        let health_shutdown = shutdown_tx.subscribe();
        background.push(tokio::spawn(async move {
            if let Err(e) = health_server.run(health_shutdown).await {
                error!(error = %e, "Health server failed");
            }
        }));
    }

    // ── 8. Mirror flag changes to the server ────────────────
    if config.feed.sync_server_config {
        background.push(tokio::spawn(mirror_flags(
            Arc::clone(&api),
            Arc::clone(&store),
            shutdown_tx.subscribe(),
        )));
    }

    // ── 9. One subscription per symbol ──────────────────────
    let orchestrator = FeedOrchestrator::new(
        api,
        connector,
        Arc::clone(&store),
        FeedSettings::from(&config.feed),
    );

    let mut subscriptions = Vec::with_capacity(config.feed.symbols.len());
    for symbol in &config.feed.symbols {
        let snapshot_metrics = Arc::clone(&metrics);
        let status_metrics = Arc::clone(&metrics);
        let status_health = Arc::clone(&health);

        let handle = orchestrator.subscribe(
            symbol,
            move |snapshot| {
                snapshot_metrics.record_snapshot(snapshot);
                debug!(
                    symbol = %snapshot.symbol,
                    mid = snapshot.mid_price,
                    bid = snapshot.bid_price.value,
                    bid_estimated = snapshot.bid_price.is_estimate(),
                    spread = snapshot.spread.value,
                    source = %snapshot.source,
                    sequence = snapshot.sequence,
                    "Price snapshot"
                );
            },
            move |status| {
                status_metrics.record_status(status);
                status_health.record_status(status);
                info!(
                    symbol = %status.symbol,
                    websocket = %status.websocket,
                    rest = %status.rest,
                    condition = ?status.condition,
                    "Transport status"
                );
            },
        );
        subscriptions.push((symbol.clone(), handle));
    }

    info!(subscriptions = subscriptions.len(), "Price feed running");

    // ── 10. Wait for SIGINT ─────────────────────────────────
    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("SIGINT received, initiating graceful shutdown");

    // 1. Stop every subscription (sockets, timers, listeners)
    for (symbol, handle) in subscriptions {
        orchestrator.unsubscribe(handle).await;
        health.remove(&Symbol::new(&symbol));
    }

    // 2. Stop background tasks (up to 5s)
    let _ = shutdown_tx.send(());
    for task in background {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Forward every flag change to `POST /config`.
async fn mirror_flags(
    api: Arc<PriceApiClient>,
    store: Arc<ConfigStore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut changes = store.on_change();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            changed = changes.changed() => {
                let Some(flags) = changed else { return };
                match api.update_server_config(&flags).await {
                    Ok(()) => info!(primary = %flags.primary_source(), "Server feed config updated"),
                    Err(e) => warn!(error = %e, "Failed to mirror feed settings to server"),
                }
            }
        }
    }
}
