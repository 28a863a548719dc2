use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;

use lockbox_core::{ArchiveLayout, LockboxConfig};
use lockbox_crypto::{EncryptionKey, KdfParams};
use lockbox_keys::{
    from_config, CredentialStore, KeyProvider, KeyfileProvider, KeyringProvider, OsCredentialStore,
    ProviderOptions,
};
use lockbox_store::{AttachmentStore, Store, TokenStore};

use crate::error::VaultResult;

/// One archive: its configuration, where that configuration lives, and the
/// runtime inputs needed to build key providers.
#[derive(Debug, Clone)]
pub struct Archive {
    pub config: LockboxConfig,
    pub config_path: PathBuf,
    credential_store: Arc<dyn CredentialStore>,
    passphrase: Option<SecretString>,
    kdf_params: KdfParams,
}

impl Archive {
    pub fn new(config: LockboxConfig, config_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            config_path: config_path.into(),
            credential_store: Arc::new(OsCredentialStore),
            passphrase: None,
            kdf_params: KdfParams::default(),
        }
    }

    /// Load the config at `path` (defaults if absent).
    pub fn load(path: &Path) -> VaultResult<Self> {
        Ok(Self::new(LockboxConfig::load(path)?, path))
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = store;
        self
    }

    pub fn with_passphrase(mut self, passphrase: SecretString) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }

    pub fn layout(&self) -> ArchiveLayout {
        self.config.layout()
    }

    /// Keyring account for this archive: the database path.
    pub fn scope(&self) -> String {
        self.layout().database.to_string_lossy().into_owned()
    }

    pub fn provider_options(&self) -> ProviderOptions {
        let mut opts = ProviderOptions::new(self.scope())
            .with_credential_store(self.credential_store.clone())
            .with_kdf_params(self.kdf_params.clone());
        if let Some(pw) = &self.passphrase {
            opts = opts.with_passphrase(pw.clone());
        }
        opts
    }

    /// The configured provider.
    pub fn provider(&self) -> VaultResult<KeyProvider> {
        Ok(from_config(&self.config.encryption, &self.provider_options())?)
    }

    /// The keyring provider for this archive, regardless of configuration.
    pub fn keyring(&self) -> KeyringProvider {
        KeyringProvider::with_store(self.scope(), self.credential_store.clone())
    }

    pub fn keyfile(&self, path: &Path) -> KeyfileProvider {
        KeyfileProvider::new(lockbox_core::config::expand_tilde(path))
    }

    pub fn save(&self) -> VaultResult<()> {
        self.config.save(&self.config_path)?;
        Ok(())
    }

    /// Open the database honouring `encryption.enabled`.
    pub fn open_store(&self, key: Option<&EncryptionKey>) -> VaultResult<Store> {
        let layout = self.layout();
        if let Some(parent) = layout.database.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::VaultError::io("creating", parent, e))?;
        }
        Ok(Store::open_for_config(&layout.database, &self.config.encryption, key)?)
    }

    pub fn attachments(&self) -> AttachmentStore {
        AttachmentStore::new(self.layout().attachments)
    }

    pub fn tokens(&self) -> TokenStore {
        TokenStore::new(self.layout().tokens)
    }
}
