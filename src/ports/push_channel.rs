//! Push Channel Port - WebSocket Connection Interface
//!
//! A connector opens one push connection and hands back a `PushSession`:
//! a FIFO of inbound frames plus a close handle. Dropping the session
//! closes the underlying socket.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Inbound event on an open push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
  /// A text frame, delivered in arrival order.
  Text(String),
  /// The connection ended (server close, error or stream end).
  Closed {
    /// Human-readable cause for logs.
    reason: String,
  },
}

/// One live push connection.
#[derive(Debug)]
pub struct PushSession {
  /// Inbound frames.
  events: mpsc::Receiver<PushEvent>,
  /// Fires once to ask the connection task to close the socket.
  close_tx: Option<oneshot::Sender<()>>,
}

impl PushSession {
  /// Wrap an event stream and its close trigger.
  pub fn new(events: mpsc::Receiver<PushEvent>, close_tx: oneshot::Sender<()>) -> Self {
    Self {
      events,
      close_tx: Some(close_tx),
    }
  }

  /// Next inbound event. A dropped sender reads as a close.
  pub async fn recv(&mut self) -> PushEvent {
    self.events.recv().await.unwrap_or_else(|| PushEvent::Closed {
      reason: "event stream ended".to_string(),
    })
  }

  /// Close the connection. Idempotent.
  pub fn close(&mut self) {
    if let Some(tx) = self.close_tx.take() {
      let _ = tx.send(());
    }
    self.events.close();
  }

  /// Whether `close()` has been called.
  pub fn is_closed(&self) -> bool {
    self.close_tx.is_none()
  }
}

impl Drop for PushSession {
  fn drop(&mut self) {
    self.close();
  }
}

/// Trait for push channel connectors.
#[async_trait]
pub trait PushConnector: Send + Sync + 'static {
  /// Open a connection. Resolves once the handshake completes.
  async fn connect(&self) -> anyhow::Result<PushSession>;
}
