//! Persistence Adapters - Feed Settings Storage
//!
//! Implements the `SettingsStorage` port with an atomic JSON file
//! (shared with other processes) and an in-memory map.

pub mod memory;
pub mod settings_file;

pub use memory::MemorySettings;
pub use settings_file::JsonFileSettings;
