//! FeedOrchestrator - Transport Priority and Subscription Lifecycle
//!
//! Every subscription runs as one actor task that owns all of its feed
//! state: the `WebSocketChannel`, the primary and mid-refresh
//! `RestPoller`s, the `PriceReconciler`, the config listener and any
//! priming/backfill fetches in flight. Nothing else touches that state,
//! so no locks are involved.
//!
//! Priority policy, re-run on every config change:
//! - WebSocket enabled: open the channel. While it is not `Active`, only
//!   the mid-refresh poller runs (if REST is enabled); once `Active`, all
//!   REST polling stops.
//! - WebSocket disabled or exhausted, REST enabled: the primary poller runs.
//! - Neither enabled: nothing runs and the status reports `NoSource`.
//!
//! Publish gating happens when a result reaches the actor: REST readings
//! need the channel not `Active`, push-path readings need it `Active`, and
//! both need their producer's epoch to still be current.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::FeedSection;
use crate::domain::error::FeedError;
use crate::domain::feed_config::FeedConfig;
use crate::domain::reconciler::PriceReconciler;
use crate::domain::snapshot::{PriceObservation, PriceSnapshot, Symbol};
use crate::domain::transport::{
  FeedCondition, ReconnectState, TransportState, TransportStatus, DEFAULT_MAX_RECONNECT_ATTEMPTS,
  DEFAULT_RECONNECT_BASE_DELAY,
};
use crate::ports::price_api::PriceApi;
use crate::ports::push_channel::PushConnector;

use super::config_store::{ConfigStore, ConfigSubscription};
use super::rest_poller::{fetch_with_fallback, PollOutcome, PollReport, PollerRole, RestPoller};
use super::websocket_channel::{ChannelEvent, PushUpdate, WebSocketChannel};

/// Snapshot callback.
pub type SnapshotCallback = Arc<dyn Fn(&PriceSnapshot) + Send + Sync>;
/// Transport status callback.
pub type StatusCallback = Arc<dyn Fn(&TransportStatus) + Send + Sync>;

const REPORT_CHANNEL_CAPACITY: usize = 64;

/// Timing knobs shared by every subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
  /// Primary REST poll cadence.
  pub poll_interval: Duration,
  /// Mid-only refresh cadence while the push channel is not `Active`.
  pub mid_refresh_interval: Duration,
  /// Reconnect backoff unit.
  pub reconnect_base_delay: Duration,
  /// Reconnect attempts before giving up.
  pub max_reconnect_attempts: u32,
}

impl Default for FeedSettings {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_millis(1500),
      mid_refresh_interval: Duration::from_millis(500),
      reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
      max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
    }
  }
}

impl From<&FeedSection> for FeedSettings {
  fn from(section: &FeedSection) -> Self {
    Self {
      poll_interval: Duration::from_millis(section.poll_interval_ms),
      mid_refresh_interval: Duration::from_millis(section.mid_refresh_interval_ms),
      reconnect_base_delay: Duration::from_millis(section.reconnect_base_delay_ms),
      max_reconnect_attempts: section.max_reconnect_attempts,
    }
  }
}

enum Control {
  Stop { ack: oneshot::Sender<()> },
  SwitchSymbol { symbol: Symbol, ack: oneshot::Sender<()> },
}

/// Handle to one running subscription.
///
/// Dropping it aborts the subscription task; `FeedOrchestrator::unsubscribe`
/// is the graceful path.
pub struct SubscriptionHandle {
  id: Uuid,
  control_tx: mpsc::Sender<Control>,
  task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
  pub fn id(&self) -> Uuid {
    self.id
  }

  /// Whether the subscription task is still running.
  pub fn is_active(&self) -> bool {
    self.task.as_ref().is_some_and(|t| !t.is_finished())
  }

  /// Tear down every transport for the current symbol, then start `symbol`
  /// on the same callbacks. Returns `false` if the subscription is gone.
  pub async fn switch_symbol(&self, symbol: &str) -> bool {
    let (ack, done) = oneshot::channel();
    let cmd = Control::SwitchSymbol {
      symbol: Symbol::new(symbol),
      ack,
    };
    if self.control_tx.send(cmd).await.is_err() {
      return false;
    }
    done.await.is_ok()
  }
}

impl Drop for SubscriptionHandle {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

/// Entry point for price subscriptions.
pub struct FeedOrchestrator {
  api: Arc<dyn PriceApi>,
  connector: Arc<dyn PushConnector>,
  config: Arc<ConfigStore>,
  settings: FeedSettings,
}

impl FeedOrchestrator {
  pub fn new(
    api: Arc<dyn PriceApi>,
    connector: Arc<dyn PushConnector>,
    config: Arc<ConfigStore>,
    settings: FeedSettings,
  ) -> Self {
    Self {
      api,
      connector,
      config,
      settings,
    }
  }

  /// Start feeding `symbol`. Callbacks run on the subscription task.
  pub fn subscribe<S, T>(&self, symbol: &str, on_snapshot: S, on_status: T) -> SubscriptionHandle
  where
    S: Fn(&PriceSnapshot) + Send + Sync + 'static,
    T: Fn(&TransportStatus) + Send + Sync + 'static,
  {
    let id = Uuid::new_v4();
    let symbol = Symbol::new(symbol);
    let (control_tx, control_rx) = mpsc::channel(8);

    let actor = FeedActor::new(
      id,
      symbol.clone(),
      Arc::clone(&self.api),
      Arc::clone(&self.connector),
      self.config.on_change(),
      self.settings,
      Arc::new(on_snapshot),
      Arc::new(on_status),
      control_rx,
    );
    let task = tokio::spawn(actor.run());

    info!(subscription = %id, %symbol, "Subscription started");
    SubscriptionHandle {
      id,
      control_tx,
      task: Some(task),
    }
  }

  /// Stop a subscription. Once this returns no callback of it fires again.
  pub async fn unsubscribe(&self, mut handle: SubscriptionHandle) {
    let (ack, done) = oneshot::channel();
    if handle.control_tx.send(Control::Stop { ack }).await.is_ok() {
      let _ = done.await;
    }
    if let Some(task) = handle.task.take() {
      if let Err(e) = task.await {
        if !e.is_cancelled() {
          warn!(subscription = %handle.id, error = %e, "Subscription task failed");
        }
      }
    }
    info!(subscription = %handle.id, "Subscription stopped");
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPurpose {
  /// First read after a handshake, with market fallback.
  Priming,
  /// Cache read for a push update without an embedded payload.
  Backfill,
}

impl FetchPurpose {
  const fn as_str(self) -> &'static str {
    match self {
      Self::Priming => "priming",
      Self::Backfill => "backfill",
    }
  }
}

struct FetchReport {
  purpose: FetchPurpose,
  /// Channel epoch when the fetch was issued.
  epoch: u64,
  /// Push-path publications seen when the fetch was issued.
  push_seq: u64,
  outcome: Result<Option<PriceObservation>, String>,
}

struct FeedActor {
  id: Uuid,
  symbol: Symbol,
  api: Arc<dyn PriceApi>,
  settings: FeedSettings,
  config_rx: ConfigSubscription,
  config_open: bool,
  config: FeedConfig,
  ws: WebSocketChannel,
  primary: RestPoller,
  mid_refresh: RestPoller,
  /// True while the channel is not `Active`; checked by pollers before sending.
  rest_gate: Arc<AtomicBool>,
  rest_state: TransportState,
  poll_rx: mpsc::Receiver<PollReport>,
  fetch_tx: mpsc::Sender<FetchReport>,
  fetch_rx: mpsc::Receiver<FetchReport>,
  fetches: JoinSet<()>,
  /// Bumped on every push-path publish; older fetches are discarded.
  push_seq: u64,
  reconciler: PriceReconciler,
  last_status: Option<TransportStatus>,
  on_snapshot: SnapshotCallback,
  on_status: StatusCallback,
  control_rx: mpsc::Receiver<Control>,
}

impl FeedActor {
  #[allow(clippy::too_many_arguments)]
  fn new(
    id: Uuid,
    symbol: Symbol,
    api: Arc<dyn PriceApi>,
    connector: Arc<dyn PushConnector>,
    mut config_rx: ConfigSubscription,
    settings: FeedSettings,
    on_snapshot: SnapshotCallback,
    on_status: StatusCallback,
    control_rx: mpsc::Receiver<Control>,
  ) -> Self {
    let (poll_tx, poll_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
    let (fetch_tx, fetch_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
    let rest_gate = Arc::new(AtomicBool::new(true));
    let reconnect = ReconnectState::new(settings.reconnect_base_delay, settings.max_reconnect_attempts);
    let config = config_rx.current();

    Self {
      id,
      ws: WebSocketChannel::new(connector, symbol.clone(), reconnect),
      primary: RestPoller::new(
        Arc::clone(&api),
        PollerRole::Primary,
        Arc::clone(&rest_gate),
        poll_tx.clone(),
      ),
      mid_refresh: RestPoller::new(
        Arc::clone(&api),
        PollerRole::MidRefresh,
        Arc::clone(&rest_gate),
        poll_tx,
      ),
      reconciler: PriceReconciler::new(symbol.clone()),
      symbol,
      api,
      settings,
      config_rx,
      config_open: true,
      config,
      rest_gate,
      rest_state: TransportState::Idle,
      poll_rx,
      fetch_tx,
      fetch_rx,
      fetches: JoinSet::new(),
      push_seq: 0,
      last_status: None,
      on_snapshot,
      on_status,
      control_rx,
    }
  }

  #[instrument(skip(self), fields(subscription = %self.id, symbol = %self.symbol))]
  async fn run(mut self) {
    self.apply_config(None);

    loop {
      tokio::select! {
        biased;

        cmd = self.control_rx.recv() => match cmd {
          Some(Control::Stop { ack }) => {
            self.teardown();
            let _ = ack.send(());
            return;
          }
          Some(Control::SwitchSymbol { symbol, ack }) => {
            self.switch_symbol(symbol);
            let _ = ack.send(());
          }
          None => {
            self.teardown();
            return;
          }
        },

        changed = self.config_rx.changed(), if self.config_open => match changed {
          Some(next) => {
            let previous = self.config;
            self.config = next;
            info!(
              rest_enabled = next.rest_enabled,
              websocket_enabled = next.websocket_enabled,
              "Feed config changed, re-evaluating transports"
            );
            self.apply_config(Some(previous));
          }
          None => {
            debug!("Config store dropped, keeping last config");
            self.config_open = false;
          }
        },

        event = self.ws.next_event() => self.on_channel_event(event),

        Some(report) = self.poll_rx.recv() => self.on_poll_report(report),

        Some(report) = self.fetch_rx.recv() => self.on_fetch_report(report),

        Some(_) = self.fetches.join_next(), if !self.fetches.is_empty() => {}
      }
    }
  }

  /// Startup algorithm. Idempotent: it converges on the state the current
  /// config calls for, whatever is running now.
  fn apply_config(&mut self, previous: Option<FeedConfig>) {
    if self.config.websocket_enabled {
      let re_enabled = previous.is_some_and(|p| !p.websocket_enabled);
      match self.ws.state() {
        TransportState::Idle => self.ws.open(),
        TransportState::Closed if re_enabled => self.ws.open(),
        _ => {}
      }
    } else {
      self.ws.close();
    }

    self.sync_pollers();

    if !self.config.any_enabled() {
      debug!(error = %FeedError::NoSourceAvailable, "Feed idle");
    }
    self.publish_status();
  }

  fn sync_pollers(&mut self) {
    let ws_active = self.ws.state().is_active();
    let ws_pending = self.config.websocket_enabled && !self.ws.is_exhausted();
    let want_primary = self.config.rest_enabled && !ws_pending;
    let want_mid = self.config.rest_enabled && ws_pending && !ws_active;

    self.rest_gate.store(!ws_active, Ordering::Release);

    if want_primary {
      self.primary.start(&self.symbol, self.settings.poll_interval);
    } else {
      self.primary.stop();
    }
    if want_mid {
      self.mid_refresh.start(&self.symbol, self.settings.mid_refresh_interval);
    } else {
      self.mid_refresh.stop();
    }

    let running = self.primary.is_running() || self.mid_refresh.is_running();
    self.rest_state = match (running, self.rest_state) {
      (true, TransportState::Idle | TransportState::Closed) => TransportState::Connecting,
      (true, state) => state,
      (false, TransportState::Idle) => TransportState::Idle,
      (false, _) => TransportState::Closed,
    };
  }

  fn on_channel_event(&mut self, event: ChannelEvent) {
    match event {
      ChannelEvent::Connected => {
        self.sync_pollers();
        self.spawn_fetch(FetchPurpose::Priming);
      }
      ChannelEvent::Update(PushUpdate::Snapshot(reading)) => {
        if self.ws.state().is_active() {
          self.publish_push(&reading);
        }
      }
      ChannelEvent::Update(PushUpdate::Backfill { price }) => {
        debug!(price, "Push update without cache payload, backfilling");
        self.spawn_fetch(FetchPurpose::Backfill);
      }
      ChannelEvent::Retrying { .. } => self.sync_pollers(),
      ChannelEvent::Exhausted { attempts } => {
        info!(attempts, rest_enabled = self.config.rest_enabled, "Push channel unavailable");
        self.sync_pollers();
      }
    }
    self.publish_status();
  }

  fn on_poll_report(&mut self, report: PollReport) {
    let poller = match report.role {
      PollerRole::Primary => &self.primary,
      PollerRole::MidRefresh => &self.mid_refresh,
    };
    if !poller.accepts(&report) {
      debug!(role = report.role.as_str(), epoch = report.epoch, "Dropping stale poll report");
      return;
    }

    match report.outcome {
      PollOutcome::Reading(reading) => {
        self.rest_state = TransportState::Active;
        if self.ws.state().is_active() {
          debug!(role = report.role.as_str(), "Push channel active, discarding REST reading");
        } else {
          self.publish(&reading);
        }
      }
      PollOutcome::Empty => {
        self.rest_state = TransportState::Active;
        debug!(role = report.role.as_str(), "No usable price this tick");
      }
      PollOutcome::Failed(_) => self.rest_state = TransportState::Degraded,
    }
    self.publish_status();
  }

  fn on_fetch_report(&mut self, report: FetchReport) {
    if report.epoch != self.ws.epoch() || !self.ws.state().is_active() {
      debug!(purpose = report.purpose.as_str(), "Dropping stale push-path fetch");
      return;
    }
    if report.push_seq != self.push_seq {
      debug!(
        purpose = report.purpose.as_str(),
        "Newer push update already published, dropping fetch"
      );
      return;
    }
    match report.outcome {
      Ok(Some(reading)) => self.publish_push(&reading),
      Ok(None) => debug!(purpose = report.purpose.as_str(), "Cache had no usable price"),
      Err(e) => warn!(purpose = report.purpose.as_str(), error = %e, "Push-path fetch failed"),
    }
  }

  fn spawn_fetch(&mut self, purpose: FetchPurpose) {
    let api = Arc::clone(&self.api);
    let symbol = self.symbol.clone();
    let tx = self.fetch_tx.clone();
    let epoch = self.ws.epoch();
    let push_seq = self.push_seq;

    self.fetches.spawn(async move {
      let outcome = match purpose {
        FetchPurpose::Priming => fetch_with_fallback(api.as_ref(), &symbol).await,
        FetchPurpose::Backfill => api
          .cached_price(&symbol)
          .await
          .map(|r| r.filter(PriceObservation::is_usable)),
      };
      let _ = tx
        .send(FetchReport {
          purpose,
          epoch,
          push_seq,
          outcome: outcome.map_err(|e| FeedError::rest(format!("{e:#}")).to_string()),
        })
        .await;
    });
  }

  fn publish_push(&mut self, reading: &PriceObservation) {
    self.push_seq += 1;
    self.publish(reading);
  }

  fn publish(&mut self, reading: &PriceObservation) {
    if let Some(snapshot) = self.reconciler.apply(reading) {
      (self.on_snapshot)(snapshot);
    }
  }

  fn status(&self) -> TransportStatus {
    TransportStatus {
      symbol: self.symbol.clone(),
      websocket: self.ws.state(),
      rest: self.rest_state,
      condition: self.condition(),
      reconnect_attempt: self.ws.attempt(),
    }
  }

  fn condition(&self) -> FeedCondition {
    if !self.config.any_enabled() {
      return FeedCondition::NoSource;
    }
    if self.ws.state().is_active() {
      return FeedCondition::Streaming;
    }
    if !self.config.websocket_enabled {
      return FeedCondition::Polling;
    }
    if self.ws.is_exhausted() {
      return FeedCondition::WebSocketUnavailable {
        rest_fallback: self.primary.is_running(),
      };
    }
    match self.ws.pending_delay() {
      Some(delay) => FeedCondition::Reconnecting {
        attempt: self.ws.attempt(),
        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
      },
      None => FeedCondition::Connecting,
    }
  }

  fn publish_status(&mut self) {
    let status = self.status();
    if self.last_status.as_ref() != Some(&status) {
      debug!(
        websocket = %status.websocket,
        rest = %status.rest,
        condition = ?status.condition,
        "Transport status changed"
      );
      (self.on_status)(&status);
      self.last_status = Some(status);
    }
  }

  fn stop_transports(&mut self) {
    self.ws.close();
    self.primary.stop();
    self.mid_refresh.stop();
    self.fetches.abort_all();
  }

  fn switch_symbol(&mut self, symbol: Symbol) {
    if symbol == self.symbol {
      debug!(%symbol, "Already on symbol");
      return;
    }
    info!(from = %self.symbol, to = %symbol, "Switching symbol");
    self.stop_transports();
    self.ws.reset(symbol.clone());
    self.reconciler.reset(symbol.clone());
    self.symbol = symbol;
    self.rest_state = TransportState::Idle;
    self.apply_config(None);
  }

  fn teardown(&mut self) {
    self.stop_transports();
    debug!("Subscription torn down");
  }
}
