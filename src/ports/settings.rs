//! Settings Storage Port - Persisted Feed Flags
//!
//! Key/value storage for the feed enablement flags, shaped like browser
//! local storage: string keys, string values. Calls are synchronous so a
//! `set` is durable before anything else happens.

use std::collections::BTreeMap;

/// Persisted key for the REST flag (`"true"` / `"false"`).
pub const REST_ENABLED_KEY: &str = "rest_enabled";
/// Persisted key for the WebSocket flag (`"true"` / `"false"`).
pub const WEBSOCKET_ENABLED_KEY: &str = "websocket_enabled";
/// Persisted key for the derived primary source (`"rest"` / `"websocket"`).
pub const PRICE_SOURCE_KEY: &str = "price_source";

/// Trait for settings persistence backends.
#[cfg_attr(test, mockall::automock)]
pub trait SettingsStorage: Send + Sync + 'static {
  /// Read every stored entry.
  fn load(&self) -> anyhow::Result<BTreeMap<String, String>>;

  /// Replace the stored entries.
  fn save(&self, entries: &BTreeMap<String, String>) -> anyhow::Result<()>;
}
