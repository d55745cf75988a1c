//! Persistent value storage.
//!
//! The host keeps the serialized value tree under one opaque key. The core
//! only needs "return what was stored, or nothing" and "store this".
//! Backends are the embedder's choice; [`MemoryStore`] serves tests and
//! simulations.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend could not be reached or refused the operation
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Stored bytes could not be interpreted
    #[error("corrupt value under '{key}': {reason}")]
    Corrupt {
        /// Storage key
        key: String,
        /// What went wrong
        reason: String,
    },
}

/// Get/set-by-key string blob store
pub trait ValueStore: Send + Sync {
    /// Previously stored value, or `None`
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the backend fails.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing what was there
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the backend fails.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// In-memory store for testing and simulation
///
/// Clones share the same map, so a test can keep a handle while the host
/// endpoint owns another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    values: HashMap<String, String>,
    writes: usize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls
    ///
    /// Useful for asserting that rejected saves never persist.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.writes).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryStoreInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Unavailable("MemoryStore mutex poisoned".into()))
    }
}

impl ValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner.values.insert(key.to_string(), value.to_string());
        inner.writes += 1;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("writes", &self.write_count()).finish()
    }
}
