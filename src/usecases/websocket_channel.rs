//! WebSocketChannel - Push Connection State Machine
//!
//! Owns one push connection for one symbol: the in-flight handshake, the
//! pending reconnect timer, the live session and the `ReconnectState`.
//! All of it lives in fields, so `next_event()` can sit inside a
//! `tokio::select!` and be cancelled at any point without losing progress.
//!
//! Transitions:
//! - `Idle → Connecting` on `open()`.
//! - `Connecting → Active` on handshake; the attempt counter resets.
//! - `Active | Connecting → Connecting` on close/error while attempts remain,
//!   after `base × attempt` (2s, 4s, 6s, 8s, 10s by default).
//! - `Connecting → Closed` once the attempts are spent (`Exhausted`).
//! - any `→ Closed` on `close()`, dropping timer, handshake and socket.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn};

use crate::domain::error::FeedError;
use crate::domain::snapshot::{is_positive_price, ObservationOrigin, PriceObservation, Symbol};
use crate::domain::transport::{ReconnectState, TransportState};
use crate::domain::wire::PushMessage;
use crate::ports::push_channel::{PushConnector, PushEvent, PushSession};

type Handshake = Pin<Box<dyn Future<Output = Result<PushSession>> + Send>>;

/// Decoded `price_update` for the subscribed symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum PushUpdate {
  /// Embedded cache payload, used as-is.
  Snapshot(PriceObservation),
  /// No usable payload; the cache endpoint must be read to backfill.
  Backfill { price: f64 },
}

/// What the channel reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
  /// Handshake completed.
  Connected,
  Update(PushUpdate),
  /// Connection failed or dropped; a reconnect is scheduled.
  Retrying { attempt: u32, delay: Duration },
  /// Attempt budget spent. The channel is `Closed` and eligible for REST fallback.
  Exhausted { attempts: u32 },
}

pub struct WebSocketChannel {
  connector: Arc<dyn PushConnector>,
  symbol: Symbol,
  state: TransportState,
  reconnect: ReconnectState,
  /// Bumped on every open, close and successful handshake.
  epoch: u64,
  handshake: Option<Handshake>,
  reconnect_timer: Option<Pin<Box<Sleep>>>,
  pending_delay: Option<Duration>,
  session: Option<PushSession>,
  exhausted: bool,
}

impl WebSocketChannel {
  pub fn new(connector: Arc<dyn PushConnector>, symbol: Symbol, reconnect: ReconnectState) -> Self {
    Self {
      connector,
      symbol,
      state: TransportState::Idle,
      reconnect,
      epoch: 0,
      handshake: None,
      reconnect_timer: None,
      pending_delay: None,
      session: None,
      exhausted: false,
    }
  }

  pub fn state(&self) -> TransportState {
    self.state
  }

  pub fn epoch(&self) -> u64 {
    self.epoch
  }

  /// Failures recorded since the last successful handshake.
  pub fn attempt(&self) -> u32 {
    self.reconnect.attempt()
  }

  /// Gave up reconnecting since the last `open()`.
  pub fn is_exhausted(&self) -> bool {
    self.exhausted
  }

  /// Delay of the reconnect currently waited on.
  pub fn pending_delay(&self) -> Option<Duration> {
    self.pending_delay
  }

  /// Start a fresh connection cycle with a full attempt budget.
  pub fn open(&mut self) {
    self.drop_connection();
    self.reconnect.reset();
    self.exhausted = false;
    self.epoch += 1;
    info!(symbol = %self.symbol, "Opening push channel");
    self.begin_handshake();
  }

  /// Close the socket and cancel any pending reconnect. Idempotent.
  pub fn close(&mut self) {
    let had_resources = self.drop_connection();
    if self.state != TransportState::Idle && self.state != TransportState::Closed {
      self.state = TransportState::Closed;
      self.epoch += 1;
      info!(symbol = %self.symbol, "Push channel closed");
    } else if had_resources {
      self.epoch += 1;
    }
  }

  /// Close and retarget at `symbol`, back in `Idle`.
  pub fn reset(&mut self, symbol: Symbol) {
    self.close();
    self.symbol = symbol;
    self.state = TransportState::Idle;
    self.reconnect.reset();
    self.exhausted = false;
  }

  /// Wait for the next event. Pends forever while `Idle` or `Closed`.
  pub async fn next_event(&mut self) -> ChannelEvent {
    loop {
      if let Some(handshake) = self.handshake.as_mut() {
        let result = handshake.await;
        self.handshake = None;
        match result {
          Ok(session) => {
            self.session = Some(session);
            self.state = TransportState::Active;
            self.reconnect.reset();
            self.epoch += 1;
            info!(symbol = %self.symbol, "Push channel connected");
            return ChannelEvent::Connected;
          }
          Err(e) => return self.record_failure(&format!("{e:#}")),
        }
      }

      if let Some(timer) = self.reconnect_timer.as_mut() {
        timer.as_mut().await;
        self.reconnect_timer = None;
        self.pending_delay = None;
        debug!(symbol = %self.symbol, attempt = self.reconnect.attempt(), "Reconnecting push channel");
        self.begin_handshake();
        continue;
      }

      if let Some(session) = self.session.as_mut() {
        match session.recv().await {
          PushEvent::Text(text) => {
            if let Some(update) = self.decode(&text) {
              return ChannelEvent::Update(update);
            }
          }
          PushEvent::Closed { reason } => {
            self.session = None;
            return self.record_failure(&reason);
          }
        }
        continue;
      }

      return std::future::pending().await;
    }
  }

  fn begin_handshake(&mut self) {
    self.state = TransportState::Connecting;
    let connector = Arc::clone(&self.connector);
    self.handshake = Some(Box::pin(async move { connector.connect().await }));
  }

  fn record_failure(&mut self, reason: &str) -> ChannelEvent {
    let error = FeedError::websocket(reason);
    match self.reconnect.record_failure() {
      Some(delay) => {
        let attempt = self.reconnect.attempt();
        warn!(
          symbol = %self.symbol,
          attempt,
          max_attempts = self.reconnect.max_attempts(),
          delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
          error = %error,
          "Push channel lost, scheduling reconnect"
        );
        self.state = TransportState::Connecting;
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
        self.pending_delay = Some(delay);
        ChannelEvent::Retrying { attempt, delay }
      }
      None => {
        let attempts = self.reconnect.max_attempts();
        warn!(
          symbol = %self.symbol,
          error = %FeedError::ExhaustedRetries { attempts },
          last_error = %error,
          "Push channel giving up"
        );
        self.state = TransportState::Closed;
        self.exhausted = true;
        ChannelEvent::Exhausted { attempts }
      }
    }
  }

  /// Returns whether anything was held.
  fn drop_connection(&mut self) -> bool {
    let had = self.handshake.is_some() || self.reconnect_timer.is_some() || self.session.is_some();
    self.handshake = None;
    self.reconnect_timer = None;
    self.pending_delay = None;
    if let Some(mut session) = self.session.take() {
      session.close();
    }
    had
  }

  fn decode(&self, text: &str) -> Option<PushUpdate> {
    let msg: PushMessage = match serde_json::from_str(text) {
      Ok(msg) => msg,
      Err(e) => {
        debug!(symbol = %self.symbol, error = %FeedError::websocket(e), "Undecodable push frame");
        return None;
      }
    };

    if !msg.is_price_update() {
      return None;
    }
    if !msg.symbol.as_deref().is_some_and(|s| self.symbol.matches(s)) {
      return None;
    }

    let Some(price) = msg.price().filter(|p| is_positive_price(*p)) else {
      let detail = format!("price {:?}", msg.price);
      warn!(error = %FeedError::invalid(&self.symbol, detail), "Discarding push update");
      return None;
    };

    match msg
      .cache_data
      .and_then(|payload| payload.into_observation(ObservationOrigin::EmbeddedCache))
    {
      Some(reading) => Some(PushUpdate::Snapshot(reading)),
      None => Some(PushUpdate::Backfill { price }),
    }
  }
}

impl Drop for WebSocketChannel {
  fn drop(&mut self) {
    self.drop_connection();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::VecDeque;
  use std::sync::Mutex;

  use async_trait::async_trait;
  use tokio::sync::{mpsc, oneshot};
  use tokio::time::Instant;

  /// Hands out scripted outcomes; `Ok` carries the frame sender.
  #[derive(Default)]
  struct ScriptedConnector {
    script: Mutex<VecDeque<bool>>,
    senders: Mutex<Vec<mpsc::Sender<PushEvent>>>,
  }

  impl ScriptedConnector {
    fn with(outcomes: &[bool]) -> Arc<Self> {
      Arc::new(Self {
        script: Mutex::new(outcomes.iter().copied().collect()),
        senders: Mutex::default(),
      })
    }

    fn last_sender(&self) -> mpsc::Sender<PushEvent> {
      self.senders.lock().unwrap().last().cloned().unwrap()
    }
  }

  #[async_trait]
  impl PushConnector for ScriptedConnector {
    async fn connect(&self) -> Result<PushSession> {
      let ok = self.script.lock().unwrap().pop_front().unwrap_or(false);
      if !ok {
        anyhow::bail!("connection refused");
      }
      let (tx, rx) = mpsc::channel(16);
      let (close_tx, _close_rx) = oneshot::channel();
      self.senders.lock().unwrap().push(tx);
      Ok(PushSession::new(rx, close_tx))
    }
  }

  fn channel(connector: Arc<ScriptedConnector>) -> WebSocketChannel {
    WebSocketChannel::new(connector, Symbol::new("BTC"), ReconnectState::default())
  }

  #[tokio::test(start_paused = true)]
  async fn test_backoff_then_exhausted() {
    let mut ws = channel(ScriptedConnector::with(&[]));
    ws.open();
    assert_eq!(ws.state(), TransportState::Connecting);

    let started = Instant::now();
    let mut delays = Vec::new();
    loop {
      match ws.next_event().await {
        ChannelEvent::Retrying { attempt, delay } => {
          assert_eq!(attempt as usize, delays.len() + 1);
          delays.push(delay.as_millis());
        }
        ChannelEvent::Exhausted { attempts } => {
          assert_eq!(attempts, 5);
          break;
        }
        other => panic!("unexpected event {other:?}"),
      }
    }

    assert_eq!(delays, vec![2000, 4000, 6000, 8000, 10000]);
    assert_eq!(started.elapsed(), Duration::from_millis(30_000));
    assert_eq!(ws.state(), TransportState::Closed);
    assert!(ws.is_exhausted());
  }

  #[tokio::test(start_paused = true)]
  async fn test_success_resets_attempts() {
    let connector = ScriptedConnector::with(&[false, false, true]);
    let mut ws = channel(connector.clone());
    ws.open();

    assert!(matches!(ws.next_event().await, ChannelEvent::Retrying { attempt: 1, .. }));
    assert!(matches!(ws.next_event().await, ChannelEvent::Retrying { attempt: 2, .. }));
    assert_eq!(ws.next_event().await, ChannelEvent::Connected);
    assert_eq!(ws.attempt(), 0);
    assert_eq!(ws.state(), TransportState::Active);

    drop(connector.last_sender());
    connector.senders.lock().unwrap().clear();
    match ws.next_event().await {
      ChannelEvent::Retrying { attempt, delay } => {
        assert_eq!(attempt, 1);
        assert_eq!(delay, Duration::from_millis(2000));
      }
      other => panic!("unexpected event {other:?}"),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_decodes_only_matching_price_updates() {
    let connector = ScriptedConnector::with(&[true]);
    let mut ws = channel(connector.clone());
    ws.open();
    assert_eq!(ws.next_event().await, ChannelEvent::Connected);

    let tx = connector.last_sender();
    for frame in [
      "not json",
      r#"{"type":"heartbeat"}"#,
      r#"{"type":"price_update","symbol":"ETH","price":3000}"#,
      r#"{"type":"price_update","symbol":"BTC","price":-5}"#,
      r#"{"type":"price_update","symbol":"btc","price":"50000.1"}"#,
      r#"{"type":"price_update","symbol":"BTC","price":50001,"cache_data":{"mid_price":"50000.123"}}"#,
    ] {
      tx.send(PushEvent::Text(frame.to_string())).await.unwrap();
    }

    assert_eq!(
      ws.next_event().await,
      ChannelEvent::Update(PushUpdate::Backfill { price: 50_000.1 })
    );
    match ws.next_event().await {
      ChannelEvent::Update(PushUpdate::Snapshot(reading)) => {
        assert_eq!(reading.mid_price, 50_000.123);
        assert_eq!(reading.origin, ObservationOrigin::EmbeddedCache);
        assert!(reading.bid_price.is_none());
      }
      other => panic!("unexpected event {other:?}"),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_close_cancels_pending_reconnect() {
    let mut ws = channel(ScriptedConnector::with(&[]));
    ws.open();
    assert!(matches!(ws.next_event().await, ChannelEvent::Retrying { .. }));
    assert!(ws.pending_delay().is_some());

    ws.close();
    ws.close();
    assert_eq!(ws.state(), TransportState::Closed);
    assert!(ws.pending_delay().is_none());

    let idle = tokio::time::timeout(Duration::from_secs(60), ws.next_event()).await;
    assert!(idle.is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_open_after_exhaustion_restores_budget() {
    let connector = ScriptedConnector::with(&[false, false, false, false, false, false, true]);
    let mut ws = channel(connector);
    ws.open();
    while !matches!(ws.next_event().await, ChannelEvent::Exhausted { .. }) {}

    ws.open();
    assert!(!ws.is_exhausted());
    assert_eq!(ws.next_event().await, ChannelEvent::Connected);
  }
}
