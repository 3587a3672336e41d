//! Transport states, reconnect backoff and the status reported to subscribers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::snapshot::Symbol;

/// The two delivery mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    WebSocket,
    Rest,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebSocket => write!(f, "websocket"),
            Self::Rest => write!(f, "rest"),
        }
    }
}

/// Lifecycle state of one transport for one subscription.
///
/// At most one transport is `Active` at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Idle,
    Connecting,
    Active,
    /// Running but the last attempt failed (REST tick error).
    Degraded,
    Closed,
}

impl TransportState {
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Numeric encoding for the transport state gauge.
    pub const fn as_gauge(self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Active => 2,
            Self::Degraded => 3,
            Self::Closed => 4,
        }
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Default number of reconnect attempts before the push channel gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default backoff unit; attempt `n` waits `n × base`.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Reconnect bookkeeping for the push channel.
///
/// Linear backoff: the pre-incremented attempt number scales the base delay,
/// so with the defaults the waits are 2s, 4s, 6s, 8s, 10s and the sixth
/// failure exhausts the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectState {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
}

impl ReconnectState {
    pub const fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base_delay,
        }
    }

    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay the next failure would schedule, without consuming an attempt.
    pub fn next_delay(&self) -> Option<Duration> {
        (self.attempt < self.max_attempts).then(|| self.base_delay * (self.attempt + 1))
    }

    pub fn next_delay_ms(&self) -> Option<u64> {
        self.next_delay()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// Record a failure. Returns the reconnect delay, or `None` once the
    /// attempt budget is spent.
    pub fn record_failure(&mut self) -> Option<Duration> {
        let delay = self.next_delay()?;
        self.attempt += 1;
        Some(delay)
    }

    pub const fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Called on every successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}

/// Coarse feed condition for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedCondition {
    /// Push channel is active.
    Streaming,
    /// REST poller is the publishing transport.
    Polling,
    /// First push connection attempt in flight.
    Connecting,
    /// Push channel lost, waiting to reconnect.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Push channel gave up; `rest_fallback` tells whether REST took over.
    WebSocketUnavailable { rest_fallback: bool },
    /// Both sources disabled.
    NoSource,
}

/// Transport-status flags published alongside snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStatus {
    pub symbol: Symbol,
    pub websocket: TransportState,
    pub rest: TransportState,
    pub condition: FeedCondition,
    pub reconnect_attempt: u32,
}

impl TransportStatus {
    /// The transport currently authorised to publish, if any.
    pub fn active_transport(&self) -> Option<TransportKind> {
        if self.websocket.is_active() {
            Some(TransportKind::WebSocket)
        } else if matches!(self.rest, TransportState::Active | TransportState::Degraded) {
            Some(TransportKind::Rest)
        } else {
            None
        }
    }

    pub fn has_source(&self) -> bool {
        !matches!(self.condition, FeedCondition::NoSource)
    }
}
