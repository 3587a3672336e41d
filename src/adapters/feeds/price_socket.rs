//! Price Socket - WebSocket Push Channel Adapter
//!
//! Implements the `PushConnector` port with tokio-tungstenite. Each
//! `connect()` opens one socket and spawns a reader task that forwards
//! text frames, in order, into the session's event channel. The task
//! exits when the socket ends, when the session asks it to close, or
//! when the session is dropped.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument};

use crate::ports::push_channel::{PushConnector, PushEvent, PushSession};

/// Inbound frames buffered per connection.
const EVENT_BUFFER: usize = 1024;

/// Connector for the server's `/ws/price` push endpoint.
pub struct PriceSocketConnector {
    /// WebSocket URL.
    ws_url: String,
    /// Handshake timeout.
    connect_timeout: Duration,
}

impl PriceSocketConnector {
    pub fn new(ws_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ws_url: ws_url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl PushConnector for PriceSocketConnector {
    #[instrument(skip(self), fields(url = %self.ws_url))]
    async fn connect(&self) -> Result<PushSession> {
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(&self.ws_url))
            .await
            .context("Price WebSocket handshake timed out")?
            .context("Price WebSocket connection failed")?;

        let (mut write, mut read) = ws_stream.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        info!("Price WebSocket connected");

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    biased;
                    _ = &mut close_rx => {
                        let _ = write.send(Message::Close(None)).await;
                        debug!("Price WebSocket closed by client");
                        return;
                    }
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if event_tx.send(PushEvent::Text(text)).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!(len = data.len(), "Price WebSocket ping received");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| format!("server closed: {} {}", f.code, f.reason))
                                .unwrap_or_else(|| "server closed".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("WebSocket error: {e}"),
                        None => break "WebSocket stream ended".to_string(),
                    },
                }
            };
            let _ = event_tx.send(PushEvent::Closed { reason }).await;
        });

        Ok(PushSession::new(event_rx, close_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection_is_an_error() {
        let connector = PriceSocketConnector::new("ws://127.0.0.1:9/ws/price", Duration::from_millis(500));
        assert!(connector.connect().await.is_err());
    }
}
