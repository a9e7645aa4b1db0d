//! Key-value persistence boundary.
//!
//! Templates and provider credentials are persisted through a generic
//! store collaborator. This crate does not define the storage format —
//! only that `save`/`load` exist and that an absent key is a normal,
//! non-erroneous condition.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::Result;

/// Generic key-value store. Absence of a key is `Ok(None)`, never an error.
pub trait KvStore: Send + Sync {
    /// Persist a value under a key, replacing any previous value.
    fn save(&self, key: &str, value: Value) -> Result<()>;

    /// Load the value stored under a key, or `None` if absent.
    fn load(&self, key: &str) -> Result<Option<Value>>;
}

/// In-memory store, used in tests and as a default when no persistence
/// collaborator is wired in.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn save(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| crate::OrchestratorError::Store(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| crate::OrchestratorError::Store(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }
}

/// Provider credentials loaded from the store at startup.
///
/// Stored under `credentials.<provider_id>` as `{"api_key": "..."}`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
}

impl ProviderCredentials {
    /// Load credentials for a provider; absence yields empty credentials.
    pub fn load(store: &dyn KvStore, provider_id: &str) -> Result<Self> {
        let key = format!("credentials.{}", provider_id);
        match store.load(&key)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Self::default()),
        }
    }

    /// Persist credentials for a provider.
    pub fn save(&self, store: &dyn KvStore, provider_id: &str) -> Result<()> {
        let key = format!("credentials.{}", provider_id);
        store.save(&key, serde_json::to_value(self)?)
    }
}
