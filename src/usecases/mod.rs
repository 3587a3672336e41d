//! Use Cases Layer - Feed Coordination Logic
//!
//! Drives the domain's price and transport models through the ports to
//! keep one price snapshot per subscription fresh.
//!
//! Use cases:
//! - `ConfigStore`: persisted source flags with change notification
//! - `RestPoller`: fixed-interval cache/market polling
//! - `WebSocketChannel`: push connection state machine and decoding
//! - `FeedOrchestrator`: transport priority and subscription lifecycle

pub mod config_store;
pub mod orchestrator;
pub mod rest_poller;
pub mod websocket_channel;

pub use config_store::{ConfigStore, ConfigSubscription};
pub use orchestrator::{FeedOrchestrator, FeedSettings, SubscriptionHandle};
pub use rest_poller::RestPoller;
pub use websocket_channel::WebSocketChannel;
