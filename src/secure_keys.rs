//! Secure API key storage in the OS credential vault.
//!
//! The global API key lives in the platform keyring (Windows Credential Manager,
//! macOS Keychain, Secret Service on Linux). Older versions kept it in plaintext in
//! the settings file; [`migrate_legacy_key`] moves it over on load.

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::sync::Mutex;

const SERVICE_NAME: &str = "io.seltrans.app";
const GLOBAL_KEY_ACCOUNT: &str = "global_api_key";

pub trait CredentialStore: Send + Sync {
    /// The stored key, or an empty string when none is stored.
    fn get(&self) -> Result<String>;
    /// Stores `key`. A blank key deletes the stored one.
    fn set(&self, key: &str) -> Result<()>;

    fn has_key(&self) -> bool {
        self.get().map(|key| !key.trim().is_empty()).unwrap_or(false)
    }
}

pub struct KeyringCredentialStore {
    service: String,
    account: String,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME, GLOBAL_KEY_ACCOUNT)
    }
}

impl KeyringCredentialStore {
    pub fn new(service: &str, account: &str) -> Self {
        Self {
            service: service.to_string(),
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| anyhow!("Failed to open credential entry: {}", e))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self) -> Result<String> {
        match self.entry()?.get_password() {
            Ok(key) => Ok(key),
            // No credential stored - not an error
            Err(keyring::Error::NoEntry) => Ok(String::new()),
            Err(e) => Err(anyhow!("Failed to read API key: {}", e)),
        }
    }

    fn set(&self, key: &str) -> Result<()> {
        let entry = self.entry()?;
        let key = key.trim();

        if key.is_empty() {
            return match entry.delete_password() {
                Ok(()) => {
                    debug!("Deleted credential: {}", self.account);
                    Ok(())
                }
                Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(anyhow!("Failed to delete credential: {}", e)),
            };
        }

        debug!("Storing API key in credential manager: {}", self.account);
        entry
            .set_password(key)
            .map_err(|e| anyhow!("Failed to store API key: {}", e))
    }
}

/// Process-local store for tests and for hosts without an OS vault.
#[derive(Default)]
pub struct MemoryCredentialStore {
    key: Mutex<String>,
}

impl MemoryCredentialStore {
    pub fn new(key: &str) -> Self {
        Self {
            key: Mutex::new(key.trim().to_string()),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<String> {
        Ok(self
            .key
            .lock()
            .map_err(|e| anyhow!("Credential lock poisoned: {}", e))?
            .clone())
    }

    fn set(&self, key: &str) -> Result<()> {
        *self
            .key
            .lock()
            .map_err(|e| anyhow!("Credential lock poisoned: {}", e))? = key.trim().to_string();
        Ok(())
    }
}

/// Moves a plaintext key from the settings file into `store`.
///
/// Returns true when the caller should clear the plaintext copy: either it was
/// migrated, or the store already holds a key and the legacy one is stale.
pub fn migrate_legacy_key(store: &dyn CredentialStore, legacy_key: &str) -> bool {
    if legacy_key.trim().is_empty() {
        return false;
    }

    match store.get() {
        Ok(existing) if !existing.trim().is_empty() => {
            debug!("Secure store already has an API key, dropping plaintext copy");
            true
        }
        Ok(_) => match store.set(legacy_key) {
            Ok(()) => {
                info!("Migrated API key from settings to secure storage");
                true
            }
            Err(e) => {
                warn!("Failed to migrate API key to secure storage: {}", e);
                false
            }
        },
        Err(e) => {
            warn!("Secure storage unavailable, keeping plaintext API key: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnavailableStore;

    impl CredentialStore for UnavailableStore {
        fn get(&self) -> Result<String> {
            Err(anyhow!("no vault"))
        }
        fn set(&self, _key: &str) -> Result<()> {
            Err(anyhow!("no vault"))
        }
    }

    #[test]
    fn test_memory_store_trims_and_clears() {
        let store = MemoryCredentialStore::default();
        assert!(!store.has_key());
        store.set("  sk-123 \n").unwrap();
        assert_eq!(store.get().unwrap(), "sk-123");
        assert!(store.has_key());
        store.set("   ").unwrap();
        assert_eq!(store.get().unwrap(), "");
    }

    #[test]
    fn test_migrate_into_empty_store() {
        let store = MemoryCredentialStore::default();
        assert!(migrate_legacy_key(&store, "sk-legacy"));
        assert_eq!(store.get().unwrap(), "sk-legacy");
    }

    #[test]
    fn test_migrate_keeps_existing_key() {
        let store = MemoryCredentialStore::new("sk-current");
        assert!(migrate_legacy_key(&store, "sk-legacy"));
        assert_eq!(store.get().unwrap(), "sk-current");
    }

    #[test]
    fn test_migrate_nothing_or_unavailable() {
        let store = MemoryCredentialStore::default();
        assert!(!migrate_legacy_key(&store, "  "));
        assert!(!migrate_legacy_key(&UnavailableStore, "sk-legacy"));
        assert!(!UnavailableStore.has_key());
    }
}
