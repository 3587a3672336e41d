//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `PriceApi`: REST cache/market/config endpoints
//! - `PushConnector`: WebSocket push channel
//! - `SettingsStorage`: persisted enablement flags

pub mod price_api;
pub mod push_channel;
pub mod settings;
