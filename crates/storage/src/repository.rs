use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by key-value store adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage quota of {limit} bytes exceeded")]
    QuotaExceeded { limit: usize },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// String-keyed, string-valued store shared by every profile on a device.
///
/// Call sites never touch an implementation directly; they go through the
/// services crate, which owns the key layout.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::QuotaExceeded` when the store is full, or other
    /// storage errors.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Write `value` only if nothing is stored under `key` yet.
    ///
    /// Returns `true` when this call wrote the value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StorageError>;

    /// Delete `key`. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Every key currently stored, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be enumerated.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<String, String>,
    quota: Option<usize>,
    disabled: bool,
}

impl MemoryState {
    fn used_bytes(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.disabled {
            return Err(StorageError::Unavailable("store disabled".into()));
        }
        Ok(())
    }

    fn check_quota(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let Some(limit) = self.quota else {
            return Ok(());
        };
        let replaced = self.entries.get(key).map_or(0, |old| key.len() + old.len());
        if self.used_bytes() - replaced + key.len() + value.len() > limit {
            return Err(StorageError::QuotaExceeded { limit });
        }
        Ok(())
    }
}

/// In-memory store for tests and prototyping.
///
/// Clones share the same entries, like several tabs sharing one browser store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes once keys plus values exceed `limit` bytes.
    #[must_use]
    pub fn with_quota(limit: usize) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            state.quota = Some(limit);
        }
        store
    }

    /// Make every subsequent operation fail with `StorageError::Unavailable`.
    pub fn set_disabled(&self, disabled: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.disabled = disabled;
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self.lock()?;
        guard.check_enabled()?;
        Ok(guard.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.check_enabled()?;
        guard.check_quota(key, value)?;
        guard.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        guard.check_enabled()?;
        if guard.entries.contains_key(key) {
            return Ok(false);
        }
        guard.check_quota(key, value)?;
        guard.entries.insert(key.to_owned(), value.to_owned());
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.check_enabled()?;
        guard.entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let guard = self.lock()?;
        guard.check_enabled()?;
        Ok(guard.entries.keys().cloned().collect())
    }
}

/// Holds the store behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub kv: Arc<dyn KeyValueStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            kv: Arc::new(InMemoryStore::new()),
        }
    }
}
