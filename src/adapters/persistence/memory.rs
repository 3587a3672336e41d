//! In-process settings backend, used when no settings path is configured
//! and by tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;

use crate::ports::settings::SettingsStorage;

#[derive(Debug, Default)]
pub struct MemorySettings {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: &[(&str, &str)]) -> Self {
        let map = entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self {
            entries: Mutex::new(map),
        }
    }
}

impl SettingsStorage for MemorySettings {
    fn load(&self) -> Result<BTreeMap<String, String>> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        *guard = entries.clone();
        Ok(())
    }
}
