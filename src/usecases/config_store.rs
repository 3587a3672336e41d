//! ConfigStore - Persisted Source Enablement Flags
//!
//! Process-wide owner of `FeedConfig`. Reads and writes go straight to a
//! `SettingsStorage` backend; every change of the effective flags is
//! published on a `watch` channel, whatever its origin:
//! - `set()` from this process,
//! - `refresh()` after another process edited the backing file
//!   (driven by `config::hot_reload::SettingsWatcher`),
//! - `notify_changed()` as an explicit in-process signal.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::error::FeedError;
use crate::domain::feed_config::{FeedConfig, FeedConfigPatch};
use crate::ports::price_api::{PriceApi, ServerFeedConfig};
use crate::ports::settings::{
  SettingsStorage, PRICE_SOURCE_KEY, REST_ENABLED_KEY, WEBSOCKET_ENABLED_KEY,
};

/// Shared, persisted feed configuration with change notification.
pub struct ConfigStore {
  storage: Arc<dyn SettingsStorage>,
  tx: watch::Sender<FeedConfig>,
  /// Serialises read-modify-write cycles against the backend.
  write_lock: Mutex<()>,
}

impl ConfigStore {
  /// Open the store, reading the current flags from `storage`.
  pub fn open(storage: Arc<dyn SettingsStorage>) -> Result<Self> {
    let entries = load_entries(storage.as_ref(), "load")?;
    let config = config_from_entries(&entries);
    let (tx, _) = watch::channel(config);

    info!(
      rest_enabled = config.rest_enabled,
      websocket_enabled = config.websocket_enabled,
      primary = %config.primary_source(),
      "Feed settings loaded"
    );

    Ok(Self {
      storage,
      tx,
      write_lock: Mutex::new(()),
    })
  }

  /// Current flags.
  pub fn get(&self) -> FeedConfig {
    *self.tx.borrow()
  }

  /// Apply `patch`, persist it, then notify listeners if anything changed.
  pub fn set(&self, patch: FeedConfigPatch) -> Result<FeedConfig> {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;

    let next = self.get().patched(patch);
    let mut entries = load_entries(self.storage.as_ref(), "load")?;
    write_entries(&mut entries, next);
    save_entries(self.storage.as_ref(), &entries)?;

    if self.publish(next) {
      info!(
        rest_enabled = next.rest_enabled,
        websocket_enabled = next.websocket_enabled,
        "Feed settings changed"
      );
    }
    Ok(next)
  }

  /// `set()`, then mirror the result to the server.
  ///
  /// The local write always lands first; a failed server update is logged
  /// and leaves the local flags in place.
  pub async fn set_and_sync<A: PriceApi + ?Sized>(
    &self,
    api: &A,
    patch: FeedConfigPatch,
  ) -> Result<FeedConfig> {
    let next = self.set(patch)?;
    if let Err(e) = api.update_server_config(&next).await {
      warn!(error = %e, "Failed to mirror feed settings to server");
    }
    Ok(next)
  }

  /// Re-read the backend and notify if the flags differ from the last
  /// observed value. Returns whether a change was published.
  pub fn refresh(&self) -> Result<bool> {
    let entries = load_entries(self.storage.as_ref(), "reload")?;
    let changed = self.publish(config_from_entries(&entries));
    if changed {
      info!("Feed settings changed externally");
    } else {
      debug!("Feed settings unchanged");
    }
    Ok(changed)
  }

  /// Explicit same-process "config changed" signal.
  pub fn notify_changed(&self) {
    if let Err(e) = self.refresh() {
      warn!(error = %e, "Failed to apply config change signal");
    }
  }

  /// Fill flags missing from storage with the server's defaults.
  ///
  /// Stored values always win. Returns the resulting flags.
  pub fn seed_defaults(&self, server: &ServerFeedConfig) -> Result<FeedConfig> {
    {
      let _guard = self
        .write_lock
        .lock()
        .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;

      let mut entries = load_entries(self.storage.as_ref(), "load")?;
      let stored_rest = parse_flag(&entries, REST_ENABLED_KEY);
      let stored_ws = parse_flag(&entries, WEBSOCKET_ENABLED_KEY);

      if stored_rest.is_none() || stored_ws.is_none() {
        let seeded = FeedConfig {
          rest_enabled: stored_rest.unwrap_or(server.rest_enabled),
          websocket_enabled: stored_ws.unwrap_or(server.websocket_enabled),
        };
        write_entries(&mut entries, seeded);
        save_entries(self.storage.as_ref(), &entries)?;
        info!(
          rest_enabled = seeded.rest_enabled,
          websocket_enabled = seeded.websocket_enabled,
          "Feed settings seeded from server defaults"
        );
      }
    }
    self.refresh()?;
    Ok(self.get())
  }

  /// Listen for changes. Dropping the subscription unsubscribes.
  pub fn on_change(&self) -> ConfigSubscription {
    ConfigSubscription {
      rx: self.tx.subscribe(),
    }
  }

  /// Number of live subscriptions.
  pub fn listener_count(&self) -> usize {
    self.tx.receiver_count()
  }

  fn publish(&self, next: FeedConfig) -> bool {
    self.tx.send_if_modified(|current| {
      if *current == next {
        false
      } else {
        *current = next;
        true
      }
    })
  }
}

/// Change listener handed out by `ConfigStore::on_change`.
#[derive(Debug, Clone)]
pub struct ConfigSubscription {
  rx: watch::Receiver<FeedConfig>,
}

impl ConfigSubscription {
  /// Wait for the next change. Bursts of changes coalesce into the latest
  /// value. `None` once the store is gone.
  pub async fn changed(&mut self) -> Option<FeedConfig> {
    self.rx.changed().await.ok()?;
    Some(*self.rx.borrow_and_update())
  }

  /// Latest flags, marking them as seen.
  pub fn current(&mut self) -> FeedConfig {
    *self.rx.borrow_and_update()
  }
}

/// Unreadable storage is an error, never an empty map.
fn load_entries(storage: &dyn SettingsStorage, action: &str) -> Result<BTreeMap<String, String>> {
  storage
    .load()
    .map_err(|e| FeedError::Settings(format!("failed to {action} feed settings: {e:#}")).into())
}

fn save_entries(storage: &dyn SettingsStorage, entries: &BTreeMap<String, String>) -> Result<()> {
  storage
    .save(entries)
    .map_err(|e| FeedError::Settings(format!("failed to persist feed settings: {e:#}")).into())
}

fn parse_flag(entries: &BTreeMap<String, String>, key: &str) -> Option<bool> {
  match entries.get(key)?.trim().to_ascii_lowercase().as_str() {
    "true" => Some(true),
    "false" => Some(false),
    _ => None,
  }
}

fn config_from_entries(entries: &BTreeMap<String, String>) -> FeedConfig {
  let defaults = FeedConfig::default();
  FeedConfig {
    rest_enabled: parse_flag(entries, REST_ENABLED_KEY).unwrap_or(defaults.rest_enabled),
    websocket_enabled: parse_flag(entries, WEBSOCKET_ENABLED_KEY)
      .unwrap_or(defaults.websocket_enabled),
  }
}

fn write_entries(entries: &mut BTreeMap<String, String>, config: FeedConfig) {
  entries.insert(REST_ENABLED_KEY.to_string(), config.rest_enabled.to_string());
  entries.insert(
    WEBSOCKET_ENABLED_KEY.to_string(),
    config.websocket_enabled.to_string(),
  );
  entries.insert(
    PRICE_SOURCE_KEY.to_string(),
    config.primary_source().as_str().to_string(),
  );
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::persistence::MemorySettings;
  use crate::ports::settings::MockSettingsStorage;

  fn store_with(entries: &[(&str, &str)]) -> (Arc<MemorySettings>, ConfigStore) {
    let storage = Arc::new(MemorySettings::with_entries(entries));
    let store = ConfigStore::open(storage.clone()).unwrap();
    (storage, store)
  }

  #[test]
  fn test_defaults_when_empty() {
    let (_, store) = store_with(&[]);
    assert_eq!(store.get(), FeedConfig::default());
  }

  #[test]
  fn test_set_persists_string_flags() {
    let (storage, store) = store_with(&[("unrelated", "kept")]);
    store.set(FeedConfigPatch::websocket(true)).unwrap();

    let entries = storage.load().unwrap();
    assert_eq!(entries["websocket_enabled"], "true");
    assert_eq!(entries["rest_enabled"], "true");
    assert_eq!(entries["price_source"], "websocket");
    assert_eq!(entries["unrelated"], "kept");
  }

  #[tokio::test]
  async fn test_set_notifies_only_on_change() {
    let (_, store) = store_with(&[]);
    let mut sub = store.on_change();

    store.set(FeedConfigPatch::rest(true)).unwrap();
    assert!(!sub.rx.has_changed().unwrap());

    store.set(FeedConfigPatch::websocket(true)).unwrap();
    let cfg = sub.changed().await.unwrap();
    assert!(cfg.websocket_enabled);
  }

  #[test]
  fn test_refresh_picks_up_external_write() {
    let (storage, store) = store_with(&[("rest_enabled", "true")]);
    let mut sub = store.on_change();

    let mut entries = BTreeMap::new();
    entries.insert("rest_enabled".to_string(), "false".to_string());
    entries.insert("websocket_enabled".to_string(), "true".to_string());
    storage.save(&entries).unwrap();

    assert!(store.refresh().unwrap());
    assert!(!store.refresh().unwrap());
    assert_eq!(
      sub.current(),
      FeedConfig { rest_enabled: false, websocket_enabled: true }
    );
  }

  #[tokio::test]
  async fn test_notify_changed_publishes_external_edit() {
    let (storage, store) = store_with(&[]);
    let mut sub = store.on_change();

    let mut entries = storage.load().unwrap();
    entries.insert("websocket_enabled".to_string(), "true".to_string());
    storage.save(&entries).unwrap();
    store.notify_changed();

    let cfg = sub.changed().await.unwrap();
    assert!(cfg.websocket_enabled);
  }

  #[test]
  fn test_seed_defaults_respects_stored_values() {
    let (storage, store) = store_with(&[("rest_enabled", "false")]);
    let server = ServerFeedConfig {
      price_source: "websocket".to_string(),
      rest_enabled: true,
      websocket_enabled: true,
      websocket_running: true,
      websocket_prices: Default::default(),
    };

    let cfg = store.seed_defaults(&server).unwrap();
    assert_eq!(cfg, FeedConfig { rest_enabled: false, websocket_enabled: true });
    assert_eq!(storage.load().unwrap()["price_source"], "websocket");
  }

  #[test]
  fn test_unparseable_flag_falls_back() {
    let (_, store) = store_with(&[("rest_enabled", "maybe"), ("websocket_enabled", "TRUE")]);
    assert_eq!(store.get(), FeedConfig { rest_enabled: true, websocket_enabled: true });
  }

  #[test]
  fn test_persist_failure_leaves_flags() {
    let mut storage = MockSettingsStorage::new();
    storage.expect_load().returning(|| Ok(BTreeMap::new()));
    storage
      .expect_save()
      .returning(|_| Err(anyhow::anyhow!("disk full")));
    let store = ConfigStore::open(Arc::new(storage)).unwrap();

    assert!(store.set(FeedConfigPatch::websocket(true)).is_err());
    assert!(!store.get().websocket_enabled);
  }

  #[test]
  fn test_unreadable_storage_blocks_writes() {
    let loads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let mut storage = MockSettingsStorage::new();
    storage.expect_load().returning(move || {
      if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
        Ok(BTreeMap::new())
      } else {
        Err(anyhow::anyhow!("unexpected JSON shape"))
      }
    });
    storage.expect_save().never();
    let store = ConfigStore::open(Arc::new(storage)).unwrap();

    let err = store.set(FeedConfigPatch::websocket(true)).unwrap_err();
    assert!(matches!(err.downcast_ref::<FeedError>(), Some(FeedError::Settings(_))));
    assert!(store
      .seed_defaults(&ServerFeedConfig {
        price_source: "websocket".to_string(),
        rest_enabled: true,
        websocket_enabled: true,
        websocket_running: false,
        websocket_prices: Default::default(),
      })
      .is_err());
    assert_eq!(store.get(), FeedConfig::default());
    assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 3);
  }

  #[test]
  fn test_foreign_settings_file_is_left_untouched() {
    use crate::adapters::persistence::JsonFileSettings;

    let path = std::env::temp_dir()
      .join(format!("price-feed-foreign-{}", uuid::Uuid::new_v4()))
      .join("settings.json");
    let storage = Arc::new(JsonFileSettings::new(&path).unwrap());
    let store = ConfigStore::open(storage).unwrap();

    let foreign = r#"{"theme":"dark","font_size":14}"#;
    std::fs::write(&path, foreign).unwrap();

    assert!(store.set(FeedConfigPatch::websocket(true)).is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), foreign);
    assert!(!store.get().websocket_enabled);
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
  }

  #[test]
  fn test_changed_waits_for_a_real_change() {
    let (_, store) = store_with(&[]);
    let mut sub = store.on_change();
    let mut changed = tokio_test::task::spawn(sub.changed());
    tokio_test::assert_pending!(changed.poll());

    store.set(FeedConfigPatch::rest(true)).unwrap();
    tokio_test::assert_pending!(changed.poll());

    store.set(FeedConfigPatch::websocket(true)).unwrap();
    assert!(changed.is_woken());
    let cfg = tokio_test::assert_ready!(changed.poll()).unwrap();
    assert!(cfg.websocket_enabled);
  }

  #[test]
  fn test_dropping_subscription_unsubscribes() {
    let (_, store) = store_with(&[]);
    let sub = store.on_change();
    assert_eq!(store.listener_count(), 1);
    drop(sub);
    assert_eq!(store.listener_count(), 0);
  }
}
