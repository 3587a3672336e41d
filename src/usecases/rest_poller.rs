//! RestPoller - Fixed-Interval Price Polling
//!
//! Pulls one symbol's price on a fixed cadence and reports each tick to
//! the owning subscription through an mpsc channel. Two roles exist:
//! - `Primary`: cache endpoint, falling back to the market endpoint when
//!   the cache has no usable mid price (1500 ms by default).
//! - `MidRefresh`: cache endpoint only, mid price only (500 ms by default).
//!
//! Each report carries the poller's epoch. `stop()` bumps the epoch so a
//! report already in flight is recognisably stale on arrival.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::error::FeedError;
use crate::domain::snapshot::{PriceObservation, Symbol};
use crate::ports::price_api::PriceApi;

/// Which loop produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerRole {
  /// Full reading with market fallback.
  Primary,
  /// Mid price only, from the cache.
  MidRefresh,
}

impl PollerRole {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Primary => "primary",
      Self::MidRefresh => "mid_refresh",
    }
  }
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
  /// Usable reading, already past the publish gate.
  Reading(PriceObservation),
  /// Request succeeded but no usable price was available.
  Empty,
  /// Network or decode failure; the interval keeps running.
  Failed(String),
}

/// One tick's report to the owning subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
  pub role: PollerRole,
  pub epoch: u64,
  pub outcome: PollOutcome,
}

/// Cache read with market fallback.
///
/// A cache error fails the whole read; only an empty cache falls through
/// to the market endpoint.
pub async fn fetch_with_fallback(
  api: &dyn PriceApi,
  symbol: &Symbol,
) -> Result<Option<PriceObservation>> {
  if let Some(reading) = api.cached_price(symbol).await?.filter(PriceObservation::is_usable) {
    return Ok(Some(reading));
  }
  debug!(%symbol, "Cache empty, falling back to market endpoint");
  Ok(api.market_price(symbol).await?.filter(PriceObservation::is_usable))
}

struct RunningPoll {
  symbol: Symbol,
  task: JoinHandle<()>,
}

/// Interval puller for one symbol at a time.
pub struct RestPoller {
  api: Arc<dyn PriceApi>,
  role: PollerRole,
  /// Shared "eligible to publish" gate, owned by the subscription.
  gate: Arc<AtomicBool>,
  reports: mpsc::Sender<PollReport>,
  epoch: u64,
  running: Option<RunningPoll>,
}

impl RestPoller {
  pub fn new(
    api: Arc<dyn PriceApi>,
    role: PollerRole,
    gate: Arc<AtomicBool>,
    reports: mpsc::Sender<PollReport>,
  ) -> Self {
    Self {
      api,
      role,
      gate,
      reports,
      epoch: 0,
      running: None,
    }
  }

  /// Start polling `symbol`. No-op when already running.
  ///
  /// The first tick fires immediately. Returns whether a new loop started.
  pub fn start(&mut self, symbol: &Symbol, interval: Duration) -> bool {
    if self.is_running() {
      debug!(role = self.role.as_str(), %symbol, "Poller already running");
      return false;
    }

    self.epoch += 1;
    let task = tokio::spawn(poll_loop(
      Arc::clone(&self.api),
      self.role,
      symbol.clone(),
      interval,
      self.epoch,
      Arc::clone(&self.gate),
      self.reports.clone(),
    ));

    info!(
      role = self.role.as_str(),
      %symbol,
      interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
      "REST poller started"
    );
    self.running = Some(RunningPoll {
      symbol: symbol.clone(),
      task,
    });
    true
  }

  /// Stop polling. Idempotent.
  pub fn stop(&mut self) {
    if let Some(running) = self.running.take() {
      running.task.abort();
      self.epoch += 1;
      info!(role = self.role.as_str(), symbol = %running.symbol, "REST poller stopped");
    }
  }

  pub fn is_running(&self) -> bool {
    self.running.as_ref().is_some_and(|r| !r.task.is_finished())
  }

  /// Whether `report` came from the loop currently running.
  pub fn accepts(&self, report: &PollReport) -> bool {
    report.role == self.role && report.epoch == self.epoch && self.running.is_some()
  }
}

impl Drop for RestPoller {
  fn drop(&mut self) {
    if let Some(running) = self.running.take() {
      running.task.abort();
    }
  }
}

async fn poll_loop(
  api: Arc<dyn PriceApi>,
  role: PollerRole,
  symbol: Symbol,
  period: Duration,
  epoch: u64,
  gate: Arc<AtomicBool>,
  reports: mpsc::Sender<PollReport>,
) {
  let mut ticker = tokio::time::interval(period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    ticker.tick().await;

    let fetched = match role {
      PollerRole::Primary => fetch_with_fallback(api.as_ref(), &symbol).await,
      PollerRole::MidRefresh => api
        .cached_price(&symbol)
        .await
        .map(|r| r.filter(PriceObservation::is_usable).map(PriceObservation::into_mid_only)),
    };

    let outcome = match fetched {
      Ok(Some(reading)) => {
        if !gate.load(Ordering::Acquire) {
          debug!(role = role.as_str(), %symbol, "Publish gate closed, discarding reading");
          continue;
        }
        PollOutcome::Reading(reading)
      }
      Ok(None) => PollOutcome::Empty,
      Err(e) => {
        let error = FeedError::rest(format!("{e:#}"));
        warn!(role = role.as_str(), %symbol, error = %error, "Poll tick failed");
        PollOutcome::Failed(error.to_string())
      }
    };

    if reports
      .send(PollReport {
        role,
        epoch,
        outcome,
      })
      .await
      .is_err()
    {
      debug!(role = role.as_str(), %symbol, "Report channel closed, poller exiting");
      return;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  use async_trait::async_trait;

  use crate::domain::feed_config::FeedConfig;
  use crate::domain::snapshot::ObservationOrigin;
  use crate::ports::price_api::ServerFeedConfig;

  #[derive(Default)]
  struct CountingApi {
    cache_calls: AtomicUsize,
    market_calls: AtomicUsize,
    cache_empty: bool,
    cache_fails: bool,
  }

  #[async_trait]
  impl PriceApi for CountingApi {
    async fn cached_price(&self, _symbol: &Symbol) -> Result<Option<PriceObservation>> {
      self.cache_calls.fetch_add(1, Ordering::SeqCst);
      if self.cache_fails {
        anyhow::bail!("connection refused");
      }
      if self.cache_empty {
        return Ok(None);
      }
      Ok(Some(PriceObservation {
        bid_price: Some(99.0),
        ..PriceObservation::mid_only(100.0, ObservationOrigin::CacheEndpoint)
      }))
    }

    async fn market_price(&self, _symbol: &Symbol) -> Result<Option<PriceObservation>> {
      self.market_calls.fetch_add(1, Ordering::SeqCst);
      Ok(Some(PriceObservation::mid_only(101.0, ObservationOrigin::MarketEndpoint)))
    }

    async fn server_config(&self) -> Result<ServerFeedConfig> {
      anyhow::bail!("unused")
    }

    async fn update_server_config(&self, _config: &FeedConfig) -> Result<()> {
      Ok(())
    }
  }

  fn poller(api: Arc<CountingApi>, role: PollerRole, open: bool) -> (RestPoller, mpsc::Receiver<PollReport>) {
    let (tx, rx) = mpsc::channel(16);
    let gate = Arc::new(AtomicBool::new(open));
    (RestPoller::new(api, role, gate, tx), rx)
  }

  #[tokio::test(start_paused = true)]
  async fn test_start_is_idempotent() {
    let api = Arc::new(CountingApi::default());
    let (mut poller, mut rx) = poller(api.clone(), PollerRole::Primary, true);
    let symbol = Symbol::new("BTC");

    assert!(poller.start(&symbol, Duration::from_millis(1500)));
    assert!(!poller.start(&symbol, Duration::from_millis(1500)));

    for _ in 0..3 {
      let report = rx.recv().await.unwrap();
      assert!(poller.accepts(&report));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(api.cache_calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_empty_cache_falls_back_to_market() {
    let api = Arc::new(CountingApi {
      cache_empty: true,
      ..Default::default()
    });
    let (mut poller, mut rx) = poller(api.clone(), PollerRole::Primary, true);
    poller.start(&Symbol::new("ETH"), Duration::from_millis(1500));

    let report = rx.recv().await.unwrap();
    match report.outcome {
      PollOutcome::Reading(reading) => {
        assert_eq!(reading.mid_price, 101.0);
        assert_eq!(reading.origin, ObservationOrigin::MarketEndpoint);
      }
      other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(api.market_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failures_keep_interval_running() {
    let api = Arc::new(CountingApi {
      cache_fails: true,
      ..Default::default()
    });
    let (mut poller, mut rx) = poller(api.clone(), PollerRole::Primary, true);
    poller.start(&Symbol::new("BTC"), Duration::from_millis(1500));

    for _ in 0..2 {
      let report = rx.recv().await.unwrap();
      assert!(matches!(report.outcome, PollOutcome::Failed(_)));
    }
    assert!(poller.is_running());
    assert_eq!(api.market_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_closed_gate_discards_readings() {
    let api = Arc::new(CountingApi::default());
    let (mut poller, mut rx) = poller(api.clone(), PollerRole::Primary, false);
    poller.start(&Symbol::new("BTC"), Duration::from_millis(1500));

    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert!(rx.try_recv().is_err());
    assert!(api.cache_calls.load(Ordering::SeqCst) >= 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_mid_refresh_strips_quotes() {
    let api = Arc::new(CountingApi::default());
    let (mut poller, mut rx) = poller(api, PollerRole::MidRefresh, true);
    poller.start(&Symbol::new("BTC"), Duration::from_millis(500));

    let report = rx.recv().await.unwrap();
    assert_eq!(report.role, PollerRole::MidRefresh);
    match report.outcome {
      PollOutcome::Reading(reading) => {
        assert_eq!(reading.mid_price, 100.0);
        assert!(reading.bid_price.is_none());
      }
      other => panic!("unexpected outcome {other:?}"),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_invalidates_in_flight_reports() {
    let api = Arc::new(CountingApi::default());
    let (mut poller, mut rx) = poller(api, PollerRole::Primary, true);
    poller.start(&Symbol::new("BTC"), Duration::from_millis(1500));

    let report = rx.recv().await.unwrap();
    poller.stop();
    poller.stop();

    assert!(!poller.is_running());
    assert!(!poller.accepts(&report));
    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert!(rx.try_recv().is_err());
  }
}
