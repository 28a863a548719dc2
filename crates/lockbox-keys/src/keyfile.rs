use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use lockbox_crypto::{write_atomic, EncryptionKey};

use crate::error::{KeyError, KeyResult};
use crate::provider::{KeyContext, KeySource};

const PROVIDER: &str = "keyfile";

/// Reads a base64-encoded key from a file. Surrounding whitespace is ignored;
/// anything that does not decode to exactly 32 bytes is an error.
#[derive(Debug, Clone)]
pub struct KeyfileProvider {
    path: PathBuf,
}

impl KeyfileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> KeyError {
        KeyError::KeyfileIo {
            provider: PROVIDER,
            path: self.path.clone(),
            source,
        }
    }

    /// Write the key as `base64 + "\n"`, replacing the file atomically.
    pub fn set_key(&self, key: &EncryptionKey) -> KeyResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let mut line = Zeroizing::new(String::with_capacity(45));
        line.push_str(&key.to_base64());
        line.push('\n');
        write_atomic(&self.path, line.as_bytes()).map_err(|e| KeyError::from_crypto(PROVIDER, e))?;
        tracing::debug!(path = %self.path.display(), "wrote keyfile");
        Ok(())
    }
}

impl KeySource for KeyfileProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn get_key(&self, _ctx: &KeyContext) -> KeyResult<EncryptionKey> {
        let contents =
            Zeroizing::new(std::fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?);
        EncryptionKey::from_base64(contents.trim()).map_err(|e| KeyError::from_crypto(PROVIDER, e))
    }
}
