//! Key/value persistence backends
//!
//! The session lifecycle only needs the semantics of browser storage:
//! string values under stable string keys.  [`Storage`] captures that, and
//! the backends here decide where the values live.
//!
//! - [`MemoryStorage`]  -- process memory; used for tab-scoped state and tests
//! - [`FileStorage`]    -- a JSON map file under the data directory
//! - [`KeyringStorage`] -- one OS keyring entry per key

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{AuthError, Result};

pub mod file;
pub mod keychain;

pub use file::FileStorage;
pub use keychain::KeyringStorage;

/// Key holding the last host used for login (plain string).
pub const HOST_PREFERENCE_KEY: &str = "fbl:pdsHost";

/// Key holding the persisted session record.
pub const SESSION_KEY: &str = "fbl:session:v1";

/// Key holding the pending login record (tab-scoped storage).
pub const PENDING_LOGIN_KEY: &str = "fbl:pendingLogin:v1";

/// Synchronous string key/value store.
///
/// Implementations must be safe to share between tasks.  `remove` on a
/// missing key is not an error.
pub trait Storage: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`.
    fn remove(&self, key: &str) -> Result<()>;

    /// Removes `key` and returns its value if `consume` accepts it.  A
    /// rejected value stays in place.
    ///
    /// Backends override this to run the check and the removal as one step;
    /// the default reads and removes separately.
    fn take_if(&self, key: &str, consume: &dyn Fn(&str) -> bool) -> Result<Option<String>> {
        match self.get(key)? {
            Some(value) if consume(&value) => {
                self.remove(key)?;
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }
}

/// In-memory storage.
///
/// Cloning shares the underlying map, which lets tests inspect what a
/// component persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| AuthError::Storage("memory storage lock poisoned".to_string()))
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn take_if(&self, key: &str, consume: &dyn Fn(&str) -> bool) -> Result<Option<String>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(value) if consume(value) => Ok(entries.remove(key)),
            _ => Ok(None),
        }
    }
}

/// Builds the durable storage backend selected by configuration.
///
/// # Errors
///
/// Returns [`AuthError::Storage`] if the file backend cannot determine or
/// create its data directory.
pub fn open_durable(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match config.backend {
        StorageBackend::File => {
            let storage = match &config.path {
                Some(dir) => FileStorage::new_with_path(dir.join("state.json"))?,
                None => FileStorage::new("state.json")?,
            };
            Ok(Arc::new(storage))
        }
        StorageBackend::Keyring => Ok(Arc::new(KeyringStorage::new("furlist"))),
        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
    }
}

/// Builds the storage used for tab-scoped state (the pending login).
///
/// A terminal has no tab, so for the file backend the pending login lives in
/// its own file next to the durable state; `login` and `callback` may run
/// in separate processes.
///
/// # Errors
///
/// Returns [`AuthError::Storage`] if the data directory is unusable.
pub fn open_tab_scoped(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match config.backend {
        StorageBackend::File | StorageBackend::Keyring => {
            let storage = match &config.path {
                Some(dir) => FileStorage::new_with_path(dir.join("pending.json"))?,
                None => FileStorage::new("pending.json")?,
            };
            Ok(Arc::new(storage))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
    }
}
