//! Bearer token persistence behind a pluggable trait.
//!
//! Platforms with an OS keyring use [`KeyringTokenStore`]; when no secure
//! store is available the engine falls back to the plain key-value store.

use keyring::Entry;

use crate::error::{Error, Result};

/// Persistence seam for the sync bearer token.
pub trait TokenStore: Send + Sync + 'static {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

const KEYRING_SERVICE_NAME: &str = "jot";
const KEYRING_TOKEN_USERNAME: &str = "sync_token";

/// Token store backed by the OS keyring (`keyring` crate).
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service_name: String,
    username: String,
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self {
            service_name: KEYRING_SERVICE_NAME.to_string(),
            username: KEYRING_TOKEN_USERNAME.to_string(),
        }
    }
}

impl KeyringTokenStore {
    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service_name, &self.username)
            .map_err(|error| Error::SecureStorage(error.to_string()))
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<String>> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(raw) => Ok(Some(raw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(Error::SecureStorage(error.to_string())),
        }
    }

    fn save(&self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .map_err(|error| Error::SecureStorage(error.to_string()))
    }

    fn clear(&self) -> Result<()> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(Error::SecureStorage(error.to_string())),
        }
    }
}

/// In-memory token store for tests and headless environments.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    token: std::sync::Mutex<Option<String>>,
}

impl InMemoryTokenStore {
    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.token
            .lock()
            .map_err(|_| Error::SecureStorage("token store poisoned".to_string()))
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, token: &str) -> Result<()> {
        *self.slot()? = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot()? = None;
        Ok(())
    }
}
