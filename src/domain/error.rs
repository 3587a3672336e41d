//! Feed error taxonomy.
//!
//! None of these cross the orchestrator's subscription boundary. They
//! classify failures for logging and for the state transitions they cause.

use thiserror::Error;

use super::snapshot::Symbol;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Socket error/close, undecodable push frame, or failed HTTP poll.
    #[error("{transport} transport failure: {reason}")]
    TransportFailure {
        transport: &'static str,
        reason: String,
    },

    /// Non-numeric or non-positive price.
    #[error("invalid price data for {symbol}: {detail}")]
    InvalidData { symbol: Symbol, detail: String },

    /// Push channel gave up reconnecting.
    #[error("websocket unavailable after {attempts} reconnect attempts")]
    ExhaustedRetries { attempts: u32 },

    /// Both sources disabled. A valid idle state, reported as status.
    #[error("no price source enabled")]
    NoSourceAvailable,

    /// Persisted settings could not be read or written.
    #[error("settings error: {0}")]
    Settings(String),
}

impl FeedError {
    pub fn rest(reason: impl std::fmt::Display) -> Self {
        Self::TransportFailure {
            transport: "rest",
            reason: reason.to_string(),
        }
    }

    pub fn websocket(reason: impl std::fmt::Display) -> Self {
        Self::TransportFailure {
            transport: "websocket",
            reason: reason.to_string(),
        }
    }

    pub fn invalid(symbol: &Symbol, detail: impl Into<String>) -> Self {
        Self::InvalidData {
            symbol: symbol.clone(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            FeedError::websocket("connection reset").to_string(),
            "websocket transport failure: connection reset"
        );
        assert_eq!(
            FeedError::invalid(&Symbol::new("btc"), "price -1").to_string(),
            "invalid price data for BTC: price -1"
        );
        assert_eq!(
            FeedError::ExhaustedRetries { attempts: 5 }.to_string(),
            "websocket unavailable after 5 reconnect attempts"
        );
    }
}
