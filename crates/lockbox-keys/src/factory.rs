//! Provider selection from configuration.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use secrecy::SecretString;

use lockbox_core::EncryptionConfig;
use lockbox_crypto::KdfParams;

use crate::env::EnvProvider;
use crate::error::{KeyError, KeyResult};
use crate::exec::ExecProvider;
use crate::keyfile::KeyfileProvider;
use crate::keyring::{CredentialStore, KeyringProvider, OsCredentialStore};
use crate::passphrase::PassphraseProvider;
use crate::provider::{KeyProvider, KeySource};

/// Runtime inputs that do not live in the config file.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Keyring account; normally the database path.
    pub scope: String,
    /// Only consulted by the passphrase provider.
    pub passphrase: Option<SecretString>,
    pub credential_store: Arc<dyn CredentialStore>,
    pub kdf_params: KdfParams,
}

impl ProviderOptions {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            passphrase: None,
            credential_store: Arc::new(OsCredentialStore),
            kdf_params: KdfParams::default(),
        }
    }

    pub fn with_passphrase(mut self, passphrase: SecretString) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = store;
        self
    }

    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }
}

/// Build the configured provider. An empty provider name means `keyring`.
///
/// Fails with `ProviderMisconfigured` for unknown names or missing required
/// fields, before any key source is touched.
pub fn from_config(cfg: &EncryptionConfig, opts: &ProviderOptions) -> KeyResult<KeyProvider> {
    let name = cfg.provider_name();
    let provider = match name {
        "keyring" => KeyProvider::Keyring(KeyringProvider::with_store(
            opts.scope.clone(),
            opts.credential_store.clone(),
        )),
        "keyfile" => {
            let path = cfg
                .keyfile
                .path
                .as_ref()
                .filter(|p| !p.as_os_str().is_empty())
                .ok_or_else(|| {
                    KeyError::misconfigured(name, "encryption.keyfile.path is required")
                })?;
            KeyProvider::Keyfile(KeyfileProvider::new(lockbox_core::config::expand_tilde(path)))
        }
        "env" => KeyProvider::Env(EnvProvider::new(Some(cfg.env.var.as_str()))),
        "exec" => {
            let command = cfg
                .exec
                .command
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    KeyError::misconfigured(name, "encryption.exec.command is required")
                })?;
            let mut p = ExecProvider::new(command);
            if cfg.exec.timeout_secs > 0 {
                p = p.with_default_timeout(Duration::from_secs(cfg.exec.timeout_secs));
            }
            KeyProvider::Exec(p)
        }
        "passphrase" => {
            let salt_b64 = cfg
                .passphrase
                .salt
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    KeyError::misconfigured(name, "encryption.passphrase.salt is required")
                })?;
            let salt = B64
                .decode(salt_b64)
                .map_err(|e| {
                    KeyError::misconfigured(name, format!("salt is not valid base64: {e}"))
                })?;
            let passphrase = opts
                .passphrase
                .clone()
                .ok_or_else(|| KeyError::misconfigured(name, "no passphrase available"))?;
            KeyProvider::Passphrase(PassphraseProvider::with_params(
                passphrase,
                salt,
                opts.kdf_params.clone(),
            )?)
        }
        other => {
            return Err(KeyError::misconfigured(
                other,
                format!(
                    "unknown provider (expected one of: {})",
                    lockbox_core::config::PROVIDER_NAMES.join(", ")
                ),
            ))
        }
    };
    tracing::debug!(provider = provider.name(), "selected key provider");
    Ok(provider)
}
