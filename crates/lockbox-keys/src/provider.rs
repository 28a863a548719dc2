//! The key provider contract and the closed set of provider variants.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use lockbox_crypto::EncryptionKey;

use crate::env::EnvProvider;
use crate::error::{KeyError, KeyResult};
use crate::exec::ExecProvider;
use crate::keyfile::KeyfileProvider;
use crate::keyring::KeyringProvider;
use crate::passphrase::PassphraseProvider;

/// Per-call context for key resolution.
///
/// `deadline` bounds slow sources (only the exec provider honours it today);
/// `cancel` lets the caller abort a pending resolution.
#[derive(Debug, Clone)]
pub struct KeyContext {
    pub deadline: Option<Duration>,
    pub cancel: CancellationToken,
}

impl KeyContext {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }
}

impl Default for KeyContext {
    fn default() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Shared behaviour of every key source.
pub trait KeySource {
    /// Stable provider name as written in configuration.
    fn name(&self) -> &'static str;

    /// Resolve the archive key. Implementations must reject anything that is
    /// not exactly 32 bytes before returning.
    fn get_key(&self, ctx: &KeyContext) -> impl Future<Output = KeyResult<EncryptionKey>> + Send;
}

/// Outcome of handing a key back to the active provider.
#[derive(Debug)]
pub enum KeyPersistence {
    /// The provider durably stored the key.
    Stored,
    /// The provider cannot be written to; the operator must update the
    /// external source with this key.
    ManualUpdateRequired { provider: &'static str },
}

/// The active key provider. Exactly one is selected per archive.
#[derive(Debug)]
pub enum KeyProvider {
    Keyring(KeyringProvider),
    Keyfile(KeyfileProvider),
    Env(EnvProvider),
    Passphrase(PassphraseProvider),
    Exec(ExecProvider),
}

impl KeySource for KeyProvider {
    fn name(&self) -> &'static str {
        match self {
            Self::Keyring(p) => p.name(),
            Self::Keyfile(p) => p.name(),
            Self::Env(p) => p.name(),
            Self::Passphrase(p) => p.name(),
            Self::Exec(p) => p.name(),
        }
    }

    async fn get_key(&self, ctx: &KeyContext) -> KeyResult<EncryptionKey> {
        let key = match self {
            Self::Keyring(p) => p.get_key(ctx).await,
            Self::Keyfile(p) => p.get_key(ctx).await,
            Self::Env(p) => p.get_key(ctx).await,
            Self::Passphrase(p) => p.get_key(ctx).await,
            Self::Exec(p) => p.get_key(ctx).await,
        }?;
        tracing::debug!(
            provider = self.name(),
            fingerprint = %key.fingerprint(),
            "resolved encryption key"
        );
        Ok(key)
    }
}

impl KeyProvider {
    /// Whether [`KeyProvider::store_key`] can persist a key.
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Keyring(_) | Self::Keyfile(_) => true,
            Self::Env(_) | Self::Passphrase(_) | Self::Exec(_) => false,
        }
    }

    /// Hand a (new) key to the provider for durable storage.
    ///
    /// Read-only providers report `ManualUpdateRequired` instead of failing,
    /// so rotation can tell the operator what to do.
    pub fn store_key(&self, key: &EncryptionKey) -> KeyResult<KeyPersistence> {
        match self {
            Self::Keyring(p) => p.set_key(key)?,
            Self::Keyfile(p) => p.set_key(key)?,
            Self::Env(_) | Self::Passphrase(_) | Self::Exec(_) => {
                return Ok(KeyPersistence::ManualUpdateRequired {
                    provider: self.name(),
                })
            }
        }
        tracing::info!(
            provider = self.name(),
            fingerprint = %key.fingerprint(),
            "stored encryption key"
        );
        Ok(KeyPersistence::Stored)
    }

    /// Delete the stored key. Only the keyring supports this.
    pub fn delete_key(&self) -> KeyResult<()> {
        match self {
            Self::Keyring(p) => p.delete_key(),
            _ => Err(KeyError::ReadOnlyProvider(self.name())),
        }
    }
}
