//! Key-value persistence for settings and conversations
//!
//! The chat app only needs "load/save a JSON document by key". [`FileStore`]
//! keeps one `<key>.json` file per key under a data directory
//! (`~/.nexus` by default); [`MemoryStore`] backs tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Settings;

/// Storage key for the settings document
pub const SETTINGS_KEY: &str = "settings";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// Load/save string documents by key
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Remove every key
    fn clear(&self) -> Result<(), StoreError>;
}

/// Deserialize the document stored under `key`, if any
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, StoreError> {
    match store.load(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn save_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    store.save(key, &json)
}

/// Saved settings merged over defaults, then environment overrides
pub fn load_settings(store: &dyn KeyValueStore) -> Result<Settings, StoreError> {
    let mut settings: Settings = load_json(store, SETTINGS_KEY)?.unwrap_or_default();
    settings.apply_env();
    Ok(settings)
}

pub fn save_settings(store: &dyn KeyValueStore, settings: &Settings) -> Result<(), StoreError> {
    save_json(store, SETTINGS_KEY, settings)
}

/// One JSON file per key in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Create with default directory (~/.nexus)
    pub fn default_store() -> std::io::Result<Self> {
        Self::new(default_data_dir())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key))
    }
}

/// `$HOME/.nexus`, or `./.nexus` without a home directory
pub fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".nexus")
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.key_path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        // Write-then-rename so a crash never leaves a half-written document
        let path = self.key_path(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data")).unwrap();
        assert!(store.load("settings").unwrap().is_none());

        store.save("settings", "{\"a\":1}").unwrap();
        assert_eq!(store.load("settings").unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(dir.path().join("data/settings.json").exists());
    }

    #[test]
    fn test_file_store_clear_only_removes_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.save("settings", "{}").unwrap();
        store.save("conversations", "[]").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        store.clear().unwrap();
        assert!(store.load("settings").unwrap().is_none());
        assert!(store.load("conversations").unwrap().is_none());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_settings_merge_over_defaults() {
        let store = MemoryStore::new();
        store
            .save(SETTINGS_KEY, r#"{"llm": {"model": "openai/gpt-4o"}, "agent": {"max_turns": 3}}"#)
            .unwrap();
        let settings: Settings = load_json(&store, SETTINGS_KEY).unwrap().unwrap();
        assert_eq!(settings.llm.model, "openai/gpt-4o");
        assert_eq!(settings.llm.max_tokens, 4000);
        assert_eq!(settings.agent.max_turns, 3);
        assert!(settings.advanced.auto_save);
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let store = MemoryStore::new();
        store.save(SETTINGS_KEY, "not json").unwrap();
        let err = load_json::<Settings>(&store, SETTINGS_KEY).unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }

    #[test]
    fn test_save_settings_then_load() {
        let store = MemoryStore::new();
        let mut settings = Settings::default();
        settings.search.api_key = "serper".to_string();
        save_settings(&store, &settings).unwrap();
        let loaded: Settings = load_json(&store, SETTINGS_KEY).unwrap().unwrap();
        assert_eq!(loaded.search.api_key, "serper");
    }
}
