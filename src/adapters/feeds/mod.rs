//! Push Feed Adapters - Real-time Price Streaming
//!
//! Provides the WebSocket connector for the server's price push channel.

pub mod price_socket;

pub use price_socket::PriceSocketConnector;
