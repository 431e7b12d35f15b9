//! OS keyring storage backend
//!
//! Stores each key as its own credential in the operating system's native
//! store (Keychain on macOS, Secret Service on Linux, Windows Credential
//! Manager on Windows).  Session tokens never touch the filesystem when this
//! backend is selected.

use super::Storage;
use crate::error::{AuthError, Result};

/// Namespaced accessor for the OS keyring.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    /// Creates an accessor whose entries live under `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<::keyring::Entry> {
        ::keyring::Entry::new(&self.service, key).map_err(AuthError::Keyring)
    }
}

impl Storage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(::keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Keyring(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .map_err(AuthError::Keyring)
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(::keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Keyring(e)),
        }
    }
}
