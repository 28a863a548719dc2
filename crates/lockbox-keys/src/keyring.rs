//! OS credential store provider.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)
//!
//! Keys are stored base64-encoded under service `lockbox`, with the store's
//! path as the account so several archives keep independent keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, Zeroizing};

use lockbox_crypto::EncryptionKey;

use crate::error::{KeyError, KeyResult};
use crate::provider::{KeyContext, KeySource};

const SERVICE_NAME: &str = "lockbox";
const PROVIDER: &str = "keyring";

/// Backing secret store for [`KeyringProvider`].
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// `Ok(None)` when no entry exists.
    fn get(&self, service: &str, account: &str) -> KeyResult<Option<SecretString>>;
    fn set(&self, service: &str, account: &str, secret: &str) -> KeyResult<()>;
    /// Deleting a missing entry is not an error.
    fn delete(&self, service: &str, account: &str) -> KeyResult<()>;
}

/// The platform keychain.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsCredentialStore;

fn unavailable(detail: String) -> KeyError {
    KeyError::ProviderSourceUnavailable {
        provider: PROVIDER,
        detail,
    }
}

impl OsCredentialStore {
    fn entry(service: &str, account: &str) -> KeyResult<keyring::Entry> {
        keyring::Entry::new(service, account)
            .map_err(|e| unavailable(format!("keychain entry creation: {e}")))
    }
}

impl CredentialStore for OsCredentialStore {
    fn get(&self, service: &str, account: &str) -> KeyResult<Option<SecretString>> {
        match Self::entry(service, account)?.get_password() {
            Ok(mut password) => {
                let secret = SecretString::from(password.clone());
                password.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(unavailable(format!("reading key from OS keyring: {e}"))),
        }
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> KeyResult<()> {
        Self::entry(service, account)?
            .set_password(secret)
            .map_err(|e| unavailable(format!("storing key in OS keyring: {e}")))
    }

    fn delete(&self, service: &str, account: &str) -> KeyResult<()> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(unavailable(format!("deleting key from OS keyring: {e}"))),
        }
    }
}

/// Process-local credential store. Clones of the `Arc` share entries, which
/// makes it usable for tests and headless runs without a keychain daemon.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<(String, String), Zeroizing<String>>>,
}

impl MemoryCredentialStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Zeroizing<String>>> {
        // a poisoned map is still a consistent map of strings
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, service: &str, account: &str) -> KeyResult<Option<SecretString>> {
        Ok(self
            .lock()
            .get(&(service.to_string(), account.to_string()))
            .map(|v| SecretString::from(v.as_str().to_string())))
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> KeyResult<()> {
        self.lock().insert(
            (service.to_string(), account.to_string()),
            Zeroizing::new(secret.to_string()),
        );
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> KeyResult<()> {
        self.lock()
            .remove(&(service.to_string(), account.to_string()));
        Ok(())
    }
}

/// Stores and retrieves the archive key from a credential store, scoped by an
/// opaque identifier (normally the database path).
#[derive(Debug, Clone)]
pub struct KeyringProvider {
    scope: String,
    store: Arc<dyn CredentialStore>,
}

impl KeyringProvider {
    /// Provider backed by the platform keychain.
    pub fn new(scope: impl Into<String>) -> Self {
        Self::with_store(scope, Arc::new(OsCredentialStore))
    }

    pub fn with_store(scope: impl Into<String>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            scope: scope.into(),
            store,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn lookup(&self) -> KeyResult<EncryptionKey> {
        let encoded = self
            .store
            .get(SERVICE_NAME, &self.scope)?
            .ok_or_else(|| KeyError::KeyNotFound {
                provider: PROVIDER,
                scope: self.scope.clone(),
            })?;
        EncryptionKey::from_base64(encoded.expose_secret())
            .map_err(|e| KeyError::from_crypto(PROVIDER, e))
    }

    pub fn set_key(&self, key: &EncryptionKey) -> KeyResult<()> {
        self.store
            .set(SERVICE_NAME, &self.scope, key.to_base64().as_str())?;
        tracing::debug!(scope = %self.scope, "stored key in credential store");
        Ok(())
    }

    pub fn delete_key(&self) -> KeyResult<()> {
        self.store.delete(SERVICE_NAME, &self.scope)?;
        tracing::debug!(scope = %self.scope, "deleted key from credential store");
        Ok(())
    }
}

impl KeySource for KeyringProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn get_key(&self, _ctx: &KeyContext) -> KeyResult<EncryptionKey> {
        self.lookup()
    }
}
