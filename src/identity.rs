//! Persisted sharing identity
//!
//! Nickname, sharing id, fleet id and the recently used sharing ids are kept
//! in an injected key-value store so they survive restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::VesselWatchError;

/// Number of previously used sharing ids kept in history
pub const HISTORY_LEN: usize = 5;

const IDENTITY_KEY: &str = "identity";

/// Local key-value persistence
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, VesselWatchError>;
    fn set(&self, key: &str, value: &str) -> Result<(), VesselWatchError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryKeyValueStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, VesselWatchError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VesselWatchError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Key-value store backed by a single JSON document on disk
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(path: &Path) -> Result<HashMap<String, String>, VesselWatchError> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, VesselWatchError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Self::read_all(&self.path)?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VesselWatchError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = Self::read_all(&self.path)?;
        values.insert(key.to_string(), value.to_string());

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                warn!("State directory does not exist, attempting to create it");
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&values)?)?;
        Ok(())
    }
}

/// Normalize a sharing id: trimmed and lower-cased
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Identity under which a vessel publishes its state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub account_id: String,
    pub nickname: String,
    #[serde(default)]
    pub sharing_id: Option<String>,
    #[serde(default)]
    pub fleet_id: Option<String>,
    /// Most recent first, at most [`HISTORY_LEN`] entries
    #[serde(default)]
    pub history: Vec<String>,
}

impl Identity {
    /// Sharing id to publish under, defaulting to the account id
    pub fn effective_sharing_id(&self) -> String {
        let chosen = self
            .sharing_id
            .as_deref()
            .map(normalize_id)
            .filter(|id| !id.is_empty());
        chosen.unwrap_or_else(|| normalize_id(&self.account_id))
    }

    /// Display name, defaulting to the sharing id
    pub fn display_name(&self) -> String {
        let nickname = self.nickname.trim();
        if nickname.is_empty() {
            self.effective_sharing_id()
        } else {
            nickname.to_string()
        }
    }

    pub fn fleet(&self) -> Option<String> {
        self.fleet_id
            .as_deref()
            .map(normalize_id)
            .filter(|id| !id.is_empty())
    }

    /// Record a sharing id at the front of the history
    pub fn remember(&mut self, id: &str) {
        let id = normalize_id(id);
        if id.is_empty() {
            return;
        }
        self.history.retain(|existing| *existing != id);
        self.history.insert(0, id);
        self.history.truncate(HISTORY_LEN);
    }
}

/// Loads and saves the [`Identity`] through a [`KeyValueStore`]
pub struct IdentityStore {
    kv: Arc<dyn KeyValueStore>,
}

impl IdentityStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Load the stored identity, using `defaults` for a fresh install
    pub fn load(&self, defaults: Identity) -> Result<Identity, VesselWatchError> {
        match self.kv.get(IDENTITY_KEY)? {
            Some(raw) => {
                let stored: Identity = serde_json::from_str(&raw)?;
                debug!("Loaded stored identity {}", stored.effective_sharing_id());
                Ok(stored)
            }
            None => Ok(defaults),
        }
    }

    pub fn save(&self, identity: &Identity) -> Result<(), VesselWatchError> {
        self.kv.set(IDENTITY_KEY, &serde_json::to_string(identity)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sharing_id_defaults_to_account() {
        let identity = Identity {
            account_id: "ACC-42".to_string(),
            sharing_id: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(identity.effective_sharing_id(), "acc-42");
        assert_eq!(identity.display_name(), "acc-42");
    }

    #[test]
    fn history_is_bounded_and_deduplicated() {
        let mut identity = Identity::default();
        for id in ["a", "b", "c", "d", "e", "f"] {
            identity.remember(id);
        }
        identity.remember("D ");

        assert_eq!(identity.history, vec!["d", "f", "e", "c", "b"]);
    }

    #[test]
    fn identity_survives_restart() -> Result<(), VesselWatchError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("identity.json");

        let mut identity = Identity {
            account_id: "acc".to_string(),
            nickname: "Kanaka".to_string(),
            sharing_id: Some("Kanaka-NC".to_string()),
            fleet_id: Some("Noumea".to_string()),
            history: Vec::new(),
        };
        identity.remember("Kanaka-NC");
        IdentityStore::new(Arc::new(FileKeyValueStore::new(&path))).save(&identity)?;

        let reloaded =
            IdentityStore::new(Arc::new(FileKeyValueStore::new(&path))).load(Identity::default())?;
        assert_eq!(reloaded, identity);
        assert_eq!(reloaded.effective_sharing_id(), "kanaka-nc");
        assert_eq!(reloaded.fleet().as_deref(), Some("noumea"));
        Ok(())
    }

    #[test]
    fn fresh_install_uses_defaults() -> Result<(), VesselWatchError> {
        let store = IdentityStore::new(Arc::new(MemoryKeyValueStore::new()));
        let defaults = Identity {
            account_id: "acc".to_string(),
            ..Default::default()
        };
        assert_eq!(store.load(defaults.clone())?, defaults);
        Ok(())
    }
}
