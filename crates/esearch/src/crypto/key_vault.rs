//! Per-user index key, kept in the platform secret store

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{IndexError, Result};

/// Keyring service name for index keys
pub const KEYRING_SERVICE: &str = "esearch";

/// Length of the index key in bytes
pub const KEY_LEN: usize = 32;

/// Symmetric key that encrypts index content at rest
#[derive(Clone, PartialEq, Eq)]
pub struct IndexKey([u8; KEY_LEN]);

impl IndexKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh key from the OS random source
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        getrandom::getrandom(&mut key)
            .map_err(|e| IndexError::KeyUnavailable(format!("random source failed: {e}")))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IndexKey(..)")
    }
}

/// Keychain-equivalent storage for opaque secrets
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, name: &str, secret: &[u8]) -> Result<()>;

    fn delete(&self, name: &str) -> Result<()>;
}

/// Secret store backed by the OS keyring (Keychain, Credential Manager,
/// Secret Service)
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name)
            .map_err(|e| IndexError::KeyUnavailable(e.to_string()))
    }
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.entry(name)?.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(IndexError::KeyUnavailable(e.to_string())),
        }
    }

    fn set(&self, name: &str, secret: &[u8]) -> Result<()> {
        self.entry(name)?
            .set_secret(secret)
            .map_err(|e| IndexError::KeyUnavailable(e.to_string()))
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(IndexError::KeyUnavailable(e.to_string())),
        }
    }
}

/// In-memory secret store for tests and hosts without a keyring
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| IndexError::KeyUnavailable("secret store lock poisoned".into()))?;
        Ok(secrets.get(name).cloned())
    }

    fn set(&self, name: &str, secret: &[u8]) -> Result<()> {
        let mut secrets = self
            .secrets
            .write()
            .map_err(|_| IndexError::KeyUnavailable("secret store lock poisoned".into()))?;
        secrets.insert(name.to_string(), secret.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut secrets = self
            .secrets
            .write()
            .map_err(|_| IndexError::KeyUnavailable("secret store lock poisoned".into()))?;
        secrets.remove(name);
        Ok(())
    }
}

/// Hands out the index key for a user, creating it on first use
pub struct KeyVault {
    store: Arc<dyn SecretStore>,
    // Serializes get-or-create so two callers never race to create a key
    create_lock: Mutex<()>,
}

impl KeyVault {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            create_lock: Mutex::new(()),
        }
    }

    /// Secret store entry name for a user's key
    pub fn secret_name(user_id: &str) -> String {
        format!("searchIndexKey_{user_id}")
    }

    pub fn get_or_create_key(&self, user_id: &str) -> Result<IndexKey> {
        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| IndexError::KeyUnavailable("key vault lock poisoned".into()))?;
        let name = Self::secret_name(user_id);

        if let Some(bytes) = self.store.get(&name)? {
            let bytes: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
                IndexError::KeyUnavailable(format!(
                    "stored index key has {} bytes, expected {KEY_LEN}",
                    bytes.len()
                ))
            })?;
            return Ok(IndexKey::from_bytes(bytes));
        }

        let key = IndexKey::generate()?;
        self.store.set(&name, key.as_bytes())?;
        log::info!("Created index key for user {user_id}");
        Ok(key)
    }

    /// Remove the user's key. Existing index content becomes unreadable.
    pub fn delete_key(&self, user_id: &str) -> Result<()> {
        self.store.delete(&Self::secret_name(user_id))
    }
}
