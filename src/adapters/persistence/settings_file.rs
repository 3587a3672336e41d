//! Settings File - Atomic JSON Persistence of Feed Flags
//!
//! Stores the persisted feed settings as one flat JSON object of string
//! values in `settings.json`, using atomic writes (write to tmp file,
//! then rename) so a reader in another process never sees a partial
//! file. Writes are synchronous: `ConfigStore::set()` must have persisted
//! before it returns.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::ports::settings::SettingsStorage;

/// JSON file backend for `SettingsStorage`.
pub struct JsonFileSettings {
    /// Path to the settings file.
    path: PathBuf,
    /// Temporary path for atomic writes.
    tmp_path: PathBuf,
}

impl JsonFileSettings {
    /// Use `path`, creating its parent directory if needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).context("Failed to create settings directory")?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        Ok(Self { path, tmp_path })
    }
}

impl SettingsStorage for JsonFileSettings {
    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No settings file, using defaults");
            return Ok(BTreeMap::new());
        }

        let json = fs::read_to_string(&self.path).context("Failed to read settings file")?;
        if json.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&json).context("Failed to parse settings JSON")
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let json =
            serde_json::to_string_pretty(entries).context("Failed to serialize settings")?;

        fs::write(&self.tmp_path, &json).context("Failed to write tmp settings file")?;
        fs::rename(&self.tmp_path, &self.path).context("Failed to rename settings file")?;

        info!(path = %self.path.display(), keys = entries.len(), "Feed settings saved");
        Ok(())
    }
}
